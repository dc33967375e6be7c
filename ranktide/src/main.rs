//! ranktide - CLI for the search performance monitor
//!
//! Wires the time/on-demand triggers to the core pipeline: daily metric
//! collection, gap reconciliation, and weekly report generation.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/ranktide/data.db (~/.local/share/ranktide/data.db)
//! - Logs: $XDG_STATE_HOME/ranktide/ranktide.log (~/.local/state/ranktide/ranktide.log)
//! - Config: $XDG_CONFIG_HOME/ranktide/config.toml (~/.config/ranktide/config.toml)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};

use ranktide_core::collector::latest_collectable_date;
use ranktide_core::enrich::HttpEnricher;
use ranktide_core::provider::HttpSearchProvider;
use ranktide_core::types::{Granularity, JobKind, Site};
use ranktide_core::{
    Config, Database, GapReconciler, InsightSynthesizer, MetricsCollector, ReportService,
    RunOutcome, Scheduler,
};

#[derive(Parser)]
#[command(name = "ranktide")]
#[command(about = "Multi-tenant search performance monitor")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect metrics (scheduled daily run, or one site ad hoc)
    Collect {
        /// Collect only this site (by domain), bypassing the schedule gate
        #[arg(long)]
        site: Option<String>,

        /// Date to collect (default: latest collectable date)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Detect and re-collect missing (site, date) data
    Reconcile {
        /// Lookback window in days
        #[arg(long, default_value = "14")]
        days: i64,
    },

    /// Generate reports (scheduled weekly run, or one site ad hoc)
    Report {
        /// Report only this site (by domain), bypassing the schedule gate
        #[arg(long)]
        site: Option<String>,

        /// Period start (default: trailing week ending at the lag floor)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Period end (default: latest collectable date)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Comparison granularity
        #[arg(long, default_value = "weekly")]
        granularity: Granularity,
    },

    /// Manage monitored sites
    #[command(subcommand)]
    Sites(SitesCommand),

    /// Manage job schedules
    #[command(subcommand)]
    Schedule(ScheduleCommand),
}

#[derive(Subcommand)]
enum SitesCommand {
    /// List all registered sites
    List,
    /// Register a new site
    Add {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        name: String,
        /// Provider property reference (default: sc-domain:<domain>)
        #[arg(long)]
        provider_ref: Option<String>,
        #[arg(long)]
        owner: String,
    },
    /// Soft-disable a site (metrics stay queryable)
    Disable {
        #[arg(long)]
        domain: String,
    },
    /// Re-enable a site
    Enable {
        #[arg(long)]
        domain: String,
    },
    /// Grant a principal access to a site
    Grant {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        domain: String,
    },
    /// Revoke a granted access
    Revoke {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        domain: String,
    },
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Show schedule state for both jobs
    Show,
    /// Enable a job
    Enable { job: JobKindArg },
    /// Disable a job
    Disable { job: JobKindArg },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum JobKindArg {
    Collection,
    Reporting,
}

impl From<JobKindArg> for JobKind {
    fn from(value: JobKindArg) -> Self {
        match value {
            JobKindArg::Collection => JobKind::Collection,
            JobKindArg::Reporting => JobKind::Reporting,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        ranktide_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run database migrations")?;
    db.ensure_schedule_defaults()
        .context("failed to seed schedule defaults")?;

    match args.command {
        Command::Collect { site, date } => run_collect(&config, db, site, date).await,
        Command::Reconcile { days } => run_reconcile(&config, db, days).await,
        Command::Report {
            site,
            start,
            end,
            granularity,
        } => run_report(&config, db, site, start, end, granularity).await,
        Command::Sites(cmd) => run_sites(db, cmd),
        Command::Schedule(cmd) => run_schedule(db, cmd),
    }
}

fn build_collector(config: &Config, db: Arc<Database>) -> Result<Arc<MetricsCollector>> {
    let provider = HttpSearchProvider::new(config.provider.clone())
        .context("provider configuration invalid")?;
    Ok(Arc::new(MetricsCollector::new(db, Arc::new(provider))))
}

fn build_report_service(config: &Config, db: Arc<Database>) -> Result<ReportService> {
    let synthesizer = match &config.enrichment {
        Some(enrichment) => {
            let timeout = Duration::from_secs(enrichment.timeout_secs);
            let enricher =
                HttpEnricher::new(enrichment.clone()).context("enrichment configuration invalid")?;
            InsightSynthesizer::with_enricher(Arc::new(enricher), timeout, config.reporting.task_count)
        }
        None => InsightSynthesizer::baseline_only(config.reporting.task_count),
    };
    Ok(ReportService::new(db, synthesizer, config.reporting.top_n))
}

fn site_by_domain(db: &Database, domain: &str) -> Result<Site> {
    db.get_site_by_domain(domain)?
        .with_context(|| format!("no site registered for domain {}", domain))
}

async fn run_collect(
    config: &Config,
    db: Arc<Database>,
    site: Option<String>,
    date: Option<NaiveDate>,
) -> Result<()> {
    let collector = build_collector(config, db.clone())?;
    let date = date.unwrap_or_else(|| latest_collectable_date(Utc::now().date_naive()));

    if let Some(domain) = site {
        let site = site_by_domain(&db, &domain)?;
        let outcome = collector.collect(&site, date).await?;
        println!(
            "Collected {}: {} clicks, {} pages, {} queries for {}",
            domain, outcome.clicks_written, outcome.pages_written, outcome.queries_written, date
        );
        return Ok(());
    }

    // Scheduled daily run over every active site, gated by the schedule row
    let scheduler = Scheduler::new(db.clone());
    let outcome = scheduler
        .run(JobKind::Collection, || async {
            let sites = db.list_active_sites()?;
            for site in &sites {
                if let Err(e) = collector.collect(site, date).await {
                    tracing::warn!(site = %site.domain, error = %e, "Collection failed");
                }
            }
            Ok(())
        })
        .await?;

    match outcome {
        RunOutcome::Completed => println!("Collection run complete for {}", date),
        RunOutcome::Failed(e) => bail!("collection run failed: {}", e),
        RunOutcome::Skipped(cause) => println!("Collection run skipped: {:?}", cause),
    }
    Ok(())
}

async fn run_reconcile(config: &Config, db: Arc<Database>, days: i64) -> Result<()> {
    let collector = build_collector(config, db.clone())?;
    let reconciler = GapReconciler::new(db, collector);

    let outcome = reconciler.reconcile_window(days).await?;
    println!(
        "Reconciliation over {} days: {} missing, {} synced, {} failed",
        days,
        outcome.dates_found.len(),
        outcome.dates_synced.len(),
        outcome.dates_failed.len()
    );
    for failure in &outcome.failures {
        println!("  {} {}: {}", failure.site_id, failure.date, failure.error);
    }
    Ok(())
}

async fn run_report(
    config: &Config,
    db: Arc<Database>,
    site: Option<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    granularity: Granularity,
) -> Result<()> {
    let service = build_report_service(config, db.clone())?;

    let end = end.unwrap_or_else(|| latest_collectable_date(Utc::now().date_naive()));
    let start = start.unwrap_or(end - chrono::Duration::days(6));

    if let Some(domain) = site {
        let site = site_by_domain(&db, &domain)?;
        let report = service.generate(&site.id, start, end, granularity).await?;
        print_report(&site.domain, &report);
        return Ok(());
    }

    // Scheduled weekly run over every active site
    let scheduler = Scheduler::new(db.clone());
    let outcome = scheduler
        .run(JobKind::Reporting, || async {
            let sites = db.list_active_sites()?;
            for site in &sites {
                match service.generate(&site.id, start, end, granularity).await {
                    Ok(report) => print_report(&site.domain, &report),
                    Err(e) => {
                        tracing::warn!(site = %site.domain, error = %e, "Report generation failed")
                    }
                }
            }
            Ok(())
        })
        .await?;

    match outcome {
        RunOutcome::Completed => println!("Reporting run complete"),
        RunOutcome::Failed(e) => bail!("reporting run failed: {}", e),
        RunOutcome::Skipped(cause) => println!("Reporting run skipped: {:?}", cause),
    }
    Ok(())
}

fn print_report(domain: &str, report: &ranktide_core::types::Report) {
    println!(
        "\n{} {} to {} (coverage {:.0}%)",
        domain,
        report.period_start,
        report.period_end,
        report.data_coverage * 100.0
    );
    println!(
        "  clicks {:+.1}%  impressions {:+.1}%  ctr {:+.1}%  position {:+.1}",
        report.comparison.clicks_change,
        report.comparison.impressions_change,
        report.comparison.ctr_change,
        report.comparison.position_change
    );
    for insight in &report.insights {
        println!("  {}", insight);
    }
    for recommendation in &report.recommendations {
        println!("  -> {}", recommendation);
    }
}

fn run_sites(db: Arc<Database>, cmd: SitesCommand) -> Result<()> {
    match cmd {
        SitesCommand::List => {
            for site in db.list_sites()? {
                println!(
                    "{}  {}  owner={}  {}",
                    site.domain,
                    if site.active { "active" } else { "disabled" },
                    site.owner_id,
                    site.id
                );
            }
        }
        SitesCommand::Add {
            domain,
            name,
            provider_ref,
            owner,
        } => {
            if db.get_site_by_domain(&domain)?.is_some() {
                bail!("domain {} is already registered", domain);
            }
            let site = Site {
                id: uuid::Uuid::new_v4().to_string(),
                provider_ref: provider_ref.unwrap_or_else(|| format!("sc-domain:{}", domain)),
                domain,
                display_name: name,
                owner_id: owner,
                active: true,
                created_at: Utc::now(),
            };
            db.upsert_site(&site)?;
            println!("Registered {} as {}", site.domain, site.id);
        }
        SitesCommand::Disable { domain } => {
            let site = site_by_domain(&db, &domain)?;
            db.set_site_active(&site.id, false)?;
            println!("Disabled {}", domain);
        }
        SitesCommand::Enable { domain } => {
            let site = site_by_domain(&db, &domain)?;
            db.set_site_active(&site.id, true)?;
            println!("Enabled {}", domain);
        }
        SitesCommand::Grant { principal, domain } => {
            let site = site_by_domain(&db, &domain)?;
            db.upsert_access_grant(&principal, &site.id)?;
            println!("Granted {} access to {}", principal, domain);
        }
        SitesCommand::Revoke { principal, domain } => {
            let site = site_by_domain(&db, &domain)?;
            db.revoke_access_grant(&principal, &site.id)?;
            println!("Revoked {} access to {}", principal, domain);
        }
    }
    Ok(())
}

fn run_schedule(db: Arc<Database>, cmd: ScheduleCommand) -> Result<()> {
    match cmd {
        ScheduleCommand::Show => {
            for kind in [JobKind::Collection, JobKind::Reporting] {
                if let Some(config) = db.get_schedule(kind)? {
                    println!(
                        "{}: {}  expr=\"{}\"  last_run={}  last_error={}",
                        config.job.as_str(),
                        if config.enabled { "enabled" } else { "disabled" },
                        config.expression,
                        config
                            .last_run_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string()),
                        config.last_error.as_deref().unwrap_or("none"),
                    );
                }
            }
        }
        ScheduleCommand::Enable { job } => {
            db.set_schedule_enabled(job.into(), true)?;
            println!("Enabled");
        }
        ScheduleCommand::Disable { job } => {
            db.set_schedule_enabled(job.into(), false)?;
            println!("Disabled");
        }
    }
    Ok(())
}
