//! Database repository layer
//!
//! Provides query and upsert operations for all entity types. All metric
//! writers go through `INSERT ... ON CONFLICT ... DO UPDATE` keyed by the
//! compound uniqueness constraints, so concurrent re-collection of the same
//! (site, date) converges last-write-wins. The compound keys are the only
//! concurrency guard the store needs.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Site operations
    // ============================================

    /// Insert or update a site.
    ///
    /// The domain is immutable after onboarding: conflicts on id update
    /// everything except the domain.
    pub fn upsert_site(&self, site: &Site) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sites (id, domain, display_name, provider_ref, owner_id, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                provider_ref = excluded.provider_ref,
                owner_id = excluded.owner_id,
                active = excluded.active
            "#,
            params![
                site.id,
                site.domain,
                site.display_name,
                site.provider_ref,
                site.owner_id,
                site.active,
                site.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a site by ID
    pub fn get_site(&self, id: &str) -> Result<Option<Site>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM sites WHERE id = ?", [id], Self::row_to_site)
            .optional()
            .map_err(Error::from)
    }

    /// Get a site by domain
    pub fn get_site_by_domain(&self, domain: &str) -> Result<Option<Site>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM sites WHERE domain = ?",
            [domain],
            Self::row_to_site,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List all sites, active and disabled
    pub fn list_sites(&self) -> Result<Vec<Site>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM sites ORDER BY domain ASC")?;
        let sites = stmt
            .query_map([], Self::row_to_site)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sites)
    }

    /// List active sites only (collection and reporting scope)
    pub fn list_active_sites(&self) -> Result<Vec<Site>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM sites WHERE active = 1 ORDER BY domain ASC")?;
        let sites = stmt
            .query_map([], Self::row_to_site)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sites)
    }

    /// Soft-enable or soft-disable a site
    pub fn set_site_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE sites SET active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        if changed == 0 {
            return Err(Error::SiteNotFound(id.to_string()));
        }
        Ok(())
    }

    fn row_to_site(row: &Row) -> rusqlite::Result<Site> {
        let created_at_str: String = row.get("created_at")?;
        Ok(Site {
            id: row.get("id")?,
            domain: row.get("domain")?,
            display_name: row.get("display_name")?,
            provider_ref: row.get("provider_ref")?,
            owner_id: row.get("owner_id")?,
            active: row.get("active")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    // ============================================
    // Access grant operations
    // ============================================

    /// Grant a principal access to a site (idempotent)
    pub fn upsert_access_grant(&self, principal_id: &str, site_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO access_grants (principal_id, site_id, granted_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![principal_id, site_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Revoke a previously granted access
    pub fn revoke_access_grant(&self, principal_id: &str, site_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM access_grants WHERE principal_id = ?1 AND site_id = ?2",
            params![principal_id, site_id],
        )?;
        Ok(())
    }

    /// Site IDs explicitly granted to a principal
    pub fn granted_site_ids(&self, principal_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT site_id FROM access_grants WHERE principal_id = ?")?;
        let ids = stmt
            .query_map([principal_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Site IDs owned by a principal
    pub fn owned_site_ids(&self, principal_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM sites WHERE owner_id = ?")?;
        let ids = stmt
            .query_map([principal_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ============================================
    // Metric operations
    // ============================================

    /// Insert or update one daily total row
    pub fn upsert_daily_metric(&self, metric: &DailyMetric) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::exec_upsert_daily(&conn, metric)?;
        Ok(())
    }

    /// Store a full collection result (daily totals + breakdowns) in one
    /// transaction.
    ///
    /// Called by the collector after all fetches for a (site, date) have
    /// succeeded, so a failed fetch never leaves a partial write behind.
    pub fn store_collection(
        &self,
        daily: &DailyMetric,
        pages: &[PageMetric],
        queries: &[QueryMetric],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        Self::exec_upsert_daily(&tx, daily)?;
        for page in pages {
            tx.execute(
                r#"
                INSERT INTO page_metrics (site_id, date, page, clicks, impressions, ctr, position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(site_id, date, page) DO UPDATE SET
                    clicks = excluded.clicks,
                    impressions = excluded.impressions,
                    ctr = excluded.ctr,
                    position = excluded.position
                "#,
                params![
                    page.site_id,
                    page.date.to_string(),
                    page.page,
                    page.clicks,
                    page.impressions,
                    page.ctr,
                    page.position,
                ],
            )?;
        }
        for query in queries {
            tx.execute(
                r#"
                INSERT INTO query_metrics (site_id, date, query, clicks, impressions, ctr, position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(site_id, date, query) DO UPDATE SET
                    clicks = excluded.clicks,
                    impressions = excluded.impressions,
                    ctr = excluded.ctr,
                    position = excluded.position
                "#,
                params![
                    query.site_id,
                    query.date.to_string(),
                    query.query,
                    query.clicks,
                    query.impressions,
                    query.ctr,
                    query.position,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn exec_upsert_daily(conn: &Connection, metric: &DailyMetric) -> rusqlite::Result<()> {
        conn.execute(
            r#"
            INSERT INTO daily_metrics (site_id, date, clicks, impressions, ctr, position, collected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(site_id, date) DO UPDATE SET
                clicks = excluded.clicks,
                impressions = excluded.impressions,
                ctr = excluded.ctr,
                position = excluded.position,
                collected_at = excluded.collected_at
            "#,
            params![
                metric.site_id,
                metric.date.to_string(),
                metric.clicks,
                metric.impressions,
                metric.ctr,
                metric.position,
                metric.collected_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get the daily row for one (site, date)
    pub fn get_daily_metric(&self, site_id: &str, date: NaiveDate) -> Result<Option<DailyMetric>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM daily_metrics WHERE site_id = ?1 AND date = ?2",
            params![site_id, date.to_string()],
            Self::row_to_daily,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Whether a daily row exists for one (site, date)
    pub fn has_daily_metric(&self, site_id: &str, date: NaiveDate) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM daily_metrics WHERE site_id = ?1 AND date = ?2",
            params![site_id, date.to_string()],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Daily rows for a site over an inclusive date range, oldest first
    pub fn get_daily_metrics(
        &self,
        site_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyMetric>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM daily_metrics
             WHERE site_id = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date ASC",
        )?;
        let metrics = stmt
            .query_map(
                params![site_id, start.to_string(), end.to_string()],
                Self::row_to_daily,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(metrics)
    }

    /// Page breakdown rows for one (site, date)
    pub fn get_page_metrics(&self, site_id: &str, date: NaiveDate) -> Result<Vec<PageMetric>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM page_metrics WHERE site_id = ?1 AND date = ?2 ORDER BY clicks DESC",
        )?;
        let metrics = stmt
            .query_map(params![site_id, date.to_string()], |row| {
                Ok(PageMetric {
                    site_id: row.get("site_id")?,
                    date: Self::get_date(row, "date")?,
                    page: row.get("page")?,
                    clicks: row.get("clicks")?,
                    impressions: row.get("impressions")?,
                    ctr: row.get("ctr")?,
                    position: row.get("position")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(metrics)
    }

    /// Query breakdown rows for one (site, date)
    pub fn get_query_metrics(&self, site_id: &str, date: NaiveDate) -> Result<Vec<QueryMetric>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM query_metrics WHERE site_id = ?1 AND date = ?2 ORDER BY clicks DESC",
        )?;
        let metrics = stmt
            .query_map(params![site_id, date.to_string()], |row| {
                Ok(QueryMetric {
                    site_id: row.get("site_id")?,
                    date: Self::get_date(row, "date")?,
                    query: row.get("query")?,
                    clicks: row.get("clicks")?,
                    impressions: row.get("impressions")?,
                    ctr: row.get("ctr")?,
                    position: row.get("position")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(metrics)
    }

    fn row_to_daily(row: &Row) -> rusqlite::Result<DailyMetric> {
        let collected_at_str: String = row.get("collected_at")?;
        Ok(DailyMetric {
            site_id: row.get("site_id")?,
            date: Self::get_date(row, "date")?,
            clicks: row.get("clicks")?,
            impressions: row.get("impressions")?,
            ctr: row.get("ctr")?,
            position: row.get("position")?,
            collected_at: DateTime::parse_from_rfc3339(&collected_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn get_date(row: &Row, column: &str) -> rusqlite::Result<NaiveDate> {
        let s: String = row.get(column)?;
        Ok(s.parse().unwrap_or_default())
    }

    // ============================================
    // Aggregate queries
    // ============================================

    /// Sum/average statistics for a site over an inclusive period.
    ///
    /// CTR and position are averaged over days that have data; sums are
    /// plain sums. `days_with_data` feeds coverage accounting.
    pub fn period_totals(
        &self,
        site_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PeriodTotals> {
        let conn = self.conn.lock().unwrap();
        let totals = conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(clicks), 0),
                COALESCE(SUM(impressions), 0),
                COALESCE(AVG(ctr), 0.0),
                COALESCE(AVG(position), 0.0),
                COUNT(*)
            FROM daily_metrics
            WHERE site_id = ?1 AND date >= ?2 AND date <= ?3
            "#,
            params![site_id, start.to_string(), end.to_string()],
            |row| {
                Ok(PeriodTotals {
                    clicks: row.get(0)?,
                    impressions: row.get(1)?,
                    ctr: row.get(2)?,
                    position: row.get(3)?,
                    days_with_data: row.get(4)?,
                })
            },
        )?;
        Ok(totals)
    }

    /// Top pages for a period, ranked by clicks desc, ties by impressions desc
    pub fn top_pages(
        &self,
        site_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        limit: usize,
    ) -> Result<Vec<RankedEntry>> {
        self.ranked_entries("page_metrics", "page", site_id, start, end, limit)
    }

    /// Top queries for a period, ranked by clicks desc, ties by impressions desc
    pub fn top_queries(
        &self,
        site_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        limit: usize,
    ) -> Result<Vec<RankedEntry>> {
        self.ranked_entries("query_metrics", "query", site_id, start, end, limit)
    }

    fn ranked_entries(
        &self,
        table: &str,
        key_column: &str,
        site_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        limit: usize,
    ) -> Result<Vec<RankedEntry>> {
        let conn = self.conn.lock().unwrap();
        // Table and column names come from the two callers above, never
        // from input.
        let sql = format!(
            r#"
            SELECT
                "{key}",
                SUM(clicks) as clicks,
                SUM(impressions) as impressions,
                AVG(ctr) as ctr,
                AVG(position) as position
            FROM {table}
            WHERE site_id = ?1 AND date >= ?2 AND date <= ?3
            GROUP BY "{key}"
            ORDER BY clicks DESC, impressions DESC
            LIMIT ?4
            "#,
            key = key_column,
            table = table,
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(
                params![site_id, start.to_string(), end.to_string(), limit as i64],
                |row| {
                    Ok(RankedEntry {
                        key: row.get(0)?,
                        clicks: row.get(1)?,
                        impressions: row.get(2)?,
                        ctr: row.get(3)?,
                        position: row.get(4)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ============================================
    // Report operations
    // ============================================

    /// Insert or update a report for one (site, period)
    pub fn upsert_report(&self, report: &Report) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO reports (site_id, period_start, period_end, granularity, comparison,
                                 trailing, top_pages, top_queries, insights, recommendations,
                                 data_coverage, created_at, delivered_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(site_id, period_start, period_end) DO UPDATE SET
                granularity = excluded.granularity,
                comparison = excluded.comparison,
                trailing = excluded.trailing,
                top_pages = excluded.top_pages,
                top_queries = excluded.top_queries,
                insights = excluded.insights,
                recommendations = excluded.recommendations,
                data_coverage = excluded.data_coverage,
                created_at = excluded.created_at
            "#,
            params![
                report.site_id,
                report.period_start.to_string(),
                report.period_end.to_string(),
                report.granularity.as_str(),
                serde_json::to_string(&report.comparison)?,
                report
                    .trailing
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&report.top_pages)?,
                serde_json::to_string(&report.top_queries)?,
                serde_json::to_string(&report.insights)?,
                serde_json::to_string(&report.recommendations)?,
                report.data_coverage,
                report.created_at.to_rfc3339(),
                report.delivered_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Get the report for one (site, period)
    pub fn get_report(
        &self,
        site_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<Report>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM reports
             WHERE site_id = ?1 AND period_start = ?2 AND period_end = ?3",
            params![site_id, period_start.to_string(), period_end.to_string()],
            Self::row_to_report,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Reports for a single site, newest period first
    pub fn list_reports(&self, site_id: &str) -> Result<Vec<Report>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM reports WHERE site_id = ? ORDER BY period_start DESC")?;
        let reports = stmt
            .query_map([site_id], Self::row_to_report)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(reports)
    }

    /// Stamp delivered_at after the downstream sender confirms handoff
    pub fn mark_report_delivered(
        &self,
        site_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
        delivered_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE reports
            SET delivered_at = ?1
            WHERE site_id = ?2 AND period_start = ?3 AND period_end = ?4
            "#,
            params![
                delivered_at.to_rfc3339(),
                site_id,
                period_start.to_string(),
                period_end.to_string(),
            ],
        )?;
        Ok(())
    }

    fn row_to_report(row: &Row) -> rusqlite::Result<Report> {
        let granularity_str: String = row.get("granularity")?;
        let comparison_str: String = row.get("comparison")?;
        let trailing_str: Option<String> = row.get("trailing")?;
        let top_pages_str: String = row.get("top_pages")?;
        let top_queries_str: String = row.get("top_queries")?;
        let insights_str: String = row.get("insights")?;
        let recommendations_str: String = row.get("recommendations")?;
        let created_at_str: String = row.get("created_at")?;
        let delivered_at_str: Option<String> = row.get("delivered_at")?;

        Ok(Report {
            site_id: row.get("site_id")?,
            period_start: Self::get_date(row, "period_start")?,
            period_end: Self::get_date(row, "period_end")?,
            granularity: granularity_str.parse().unwrap_or(Granularity::Weekly),
            comparison: serde_json::from_str(&comparison_str).unwrap_or(PeriodComparison {
                current: PeriodTotals::default(),
                previous: PeriodTotals::default(),
                clicks_change: 0.0,
                impressions_change: 0.0,
                ctr_change: 0.0,
                position_change: 0.0,
            }),
            trailing: trailing_str.and_then(|s| serde_json::from_str(&s).ok()),
            top_pages: serde_json::from_str(&top_pages_str).unwrap_or_default(),
            top_queries: serde_json::from_str(&top_queries_str).unwrap_or_default(),
            insights: serde_json::from_str(&insights_str).unwrap_or_default(),
            recommendations: serde_json::from_str(&recommendations_str).unwrap_or_default(),
            data_coverage: row.get("data_coverage")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            delivered_at: delivered_at_str
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }

    // ============================================
    // Schedule operations
    // ============================================

    /// Seed default schedule rows for both job kinds if absent
    pub fn ensure_schedule_defaults(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for (job, expression) in [
            (JobKind::Collection, "0 6 * * *"),
            (JobKind::Reporting, "0 7 * * 1"),
        ] {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO schedule_configs (job, expression, enabled, running)
                VALUES (?1, ?2, 1, 0)
                "#,
                params![job.as_str(), expression],
            )?;
        }
        Ok(())
    }

    /// Get schedule state for one job kind
    pub fn get_schedule(&self, job: JobKind) -> Result<Option<ScheduleConfig>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM schedule_configs WHERE job = ?",
            [job.as_str()],
            Self::row_to_schedule,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Enable or disable a job
    pub fn set_schedule_enabled(&self, job: JobKind, enabled: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE schedule_configs SET enabled = ?1 WHERE job = ?2",
            params![enabled, job.as_str()],
        )?;
        Ok(())
    }

    /// Change a job's trigger expression
    pub fn set_schedule_expression(&self, job: JobKind, expression: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE schedule_configs SET expression = ?1 WHERE job = ?2",
            params![expression, job.as_str()],
        )?;
        Ok(())
    }

    /// Atomically claim a run slot for a job.
    ///
    /// Returns true only when the job exists, is enabled, and is not
    /// already running; the `running` flag is the overlap guard.
    pub fn try_begin_run(&self, job: JobKind) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE schedule_configs SET running = 1
             WHERE job = ?1 AND enabled = 1 AND running = 0",
            [job.as_str()],
        )?;
        Ok(changed == 1)
    }

    /// Release the run slot and record the outcome.
    ///
    /// Failure records last_error but never disables the job.
    pub fn finish_run(
        &self,
        job: JobKind,
        finished_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE schedule_configs
            SET running = 0, last_run_at = ?1, last_error = ?2
            WHERE job = ?3
            "#,
            params![finished_at.to_rfc3339(), error, job.as_str()],
        )?;
        Ok(())
    }

    fn row_to_schedule(row: &Row) -> rusqlite::Result<ScheduleConfig> {
        let job_str: String = row.get("job")?;
        let last_run_str: Option<String> = row.get("last_run_at")?;
        Ok(ScheduleConfig {
            job: job_str.parse().unwrap_or(JobKind::Collection),
            expression: row.get("expression")?,
            enabled: row.get("enabled")?,
            running: row.get("running")?,
            last_run_at: last_run_str
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            last_error: row.get("last_error")?,
        })
    }

    // ============================================
    // Reconcile job operations
    // ============================================

    /// Insert a new reconcile job record
    pub fn insert_reconcile_job(&self, job: &ReconcileJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO reconcile_jobs (id, requested_days, dates_found, dates_synced,
                                        dates_failed, status, detail, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                job.id,
                job.requested_days,
                job.dates_found,
                job.dates_synced,
                job.dates_failed,
                job.status.as_str(),
                job.detail.to_string(),
                job.started_at.to_rfc3339(),
                job.finished_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Update a reconcile job's mutable fields as the pass progresses
    pub fn update_reconcile_job(&self, job: &ReconcileJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE reconcile_jobs
            SET dates_found = ?1, dates_synced = ?2, dates_failed = ?3,
                status = ?4, detail = ?5, finished_at = ?6
            WHERE id = ?7
            "#,
            params![
                job.dates_found,
                job.dates_synced,
                job.dates_failed,
                job.status.as_str(),
                job.detail.to_string(),
                job.finished_at.map(|t| t.to_rfc3339()),
                job.id,
            ],
        )?;
        Ok(())
    }

    /// Get a reconcile job by ID (poll surface for background passes)
    pub fn get_reconcile_job(&self, id: &str) -> Result<Option<ReconcileJob>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM reconcile_jobs WHERE id = ?",
            [id],
            Self::row_to_reconcile_job,
        )
        .optional()
        .map_err(Error::from)
    }

    fn row_to_reconcile_job(row: &Row) -> rusqlite::Result<ReconcileJob> {
        let status_str: String = row.get("status")?;
        let detail_str: String = row.get("detail")?;
        let started_at_str: String = row.get("started_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;
        Ok(ReconcileJob {
            id: row.get("id")?,
            requested_days: row.get("requested_days")?,
            dates_found: row.get("dates_found")?,
            dates_synced: row.get("dates_synced")?,
            dates_failed: row.get("dates_failed")?,
            status: status_str.parse().unwrap_or(ReconcileJobStatus::Failed),
            detail: serde_json::from_str(&detail_str).unwrap_or(serde_json::json!({})),
            started_at: DateTime::parse_from_rfc3339(&started_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            finished_at: finished_at_str
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn test_site(id: &str, domain: &str, owner: &str) -> Site {
        Site {
            id: id.to_string(),
            domain: domain.to_string(),
            display_name: domain.to_string(),
            provider_ref: format!("sc-domain:{}", domain),
            owner_id: owner.to_string(),
            active: true,
            created_at: Utc::now(),
        }
    }

    fn daily(site_id: &str, date: &str, clicks: i64) -> DailyMetric {
        DailyMetric {
            site_id: site_id.to_string(),
            date: date.parse().unwrap(),
            clicks,
            impressions: clicks * 10,
            ctr: 0.1,
            position: 12.5,
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_site_upsert_preserves_domain() {
        let db = test_db();
        let mut site = test_site("s1", "a.example.com", "p1");
        db.upsert_site(&site).unwrap();

        // A second upsert may change the display name but not the domain
        site.display_name = "Site A".to_string();
        site.domain = "evil.example.com".to_string();
        db.upsert_site(&site).unwrap();

        let stored = db.get_site("s1").unwrap().unwrap();
        assert_eq!(stored.display_name, "Site A");
        assert_eq!(stored.domain, "a.example.com");
    }

    #[test]
    fn test_daily_metric_upsert_is_idempotent() {
        let db = test_db();
        db.upsert_site(&test_site("s1", "a.example.com", "p1"))
            .unwrap();

        db.upsert_daily_metric(&daily("s1", "2026-06-01", 100)).unwrap();
        db.upsert_daily_metric(&daily("s1", "2026-06-01", 150)).unwrap();

        let rows = db
            .get_daily_metrics("s1", "2026-06-01".parse().unwrap(), "2026-06-01".parse().unwrap())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].clicks, 150);
    }

    #[test]
    fn test_period_totals_and_coverage_counting() {
        let db = test_db();
        db.upsert_site(&test_site("s1", "a.example.com", "p1"))
            .unwrap();

        db.upsert_daily_metric(&daily("s1", "2026-06-01", 100)).unwrap();
        db.upsert_daily_metric(&daily("s1", "2026-06-02", 50)).unwrap();

        let totals = db
            .period_totals("s1", "2026-06-01".parse().unwrap(), "2026-06-07".parse().unwrap())
            .unwrap();
        assert_eq!(totals.clicks, 150);
        assert_eq!(totals.impressions, 1500);
        assert_eq!(totals.days_with_data, 2);
    }

    #[test]
    fn test_period_totals_empty_period_is_zero() {
        let db = test_db();
        db.upsert_site(&test_site("s1", "a.example.com", "p1"))
            .unwrap();

        let totals = db
            .period_totals("s1", "2026-06-01".parse().unwrap(), "2026-06-07".parse().unwrap())
            .unwrap();
        assert_eq!(totals.clicks, 0);
        assert_eq!(totals.days_with_data, 0);
    }

    #[test]
    fn test_top_pages_ranking_with_tie_break() {
        let db = test_db();
        db.upsert_site(&test_site("s1", "a.example.com", "p1"))
            .unwrap();

        let date: NaiveDate = "2026-06-01".parse().unwrap();
        let page = |path: &str, clicks: i64, impressions: i64| PageMetric {
            site_id: "s1".to_string(),
            date,
            page: path.to_string(),
            clicks,
            impressions,
            ctr: 0.1,
            position: 8.0,
        };
        db.store_collection(
            &daily("s1", "2026-06-01", 100),
            &[page("/a", 10, 100), page("/b", 10, 500), page("/c", 30, 50)],
            &[],
        )
        .unwrap();

        let top = db
            .top_pages("s1", date, date, 2)
            .unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key, "/c");
        // /a and /b tie on clicks; /b wins on impressions
        assert_eq!(top[1].key, "/b");
    }

    #[test]
    fn test_schedule_run_guard() {
        let db = test_db();
        db.ensure_schedule_defaults().unwrap();

        assert!(db.try_begin_run(JobKind::Collection).unwrap());
        // Second trigger while running must be refused
        assert!(!db.try_begin_run(JobKind::Collection).unwrap());

        db.finish_run(JobKind::Collection, Utc::now(), None).unwrap();
        assert!(db.try_begin_run(JobKind::Collection).unwrap());
    }

    #[test]
    fn test_schedule_disabled_refuses_run() {
        let db = test_db();
        db.ensure_schedule_defaults().unwrap();
        db.set_schedule_enabled(JobKind::Reporting, false).unwrap();

        assert!(!db.try_begin_run(JobKind::Reporting).unwrap());
        let config = db.get_schedule(JobKind::Reporting).unwrap().unwrap();
        assert!(!config.enabled);
        assert!(!config.running);
    }

    #[test]
    fn test_failed_run_records_error_but_stays_enabled() {
        let db = test_db();
        db.ensure_schedule_defaults().unwrap();

        assert!(db.try_begin_run(JobKind::Collection).unwrap());
        db.finish_run(JobKind::Collection, Utc::now(), Some("provider quota exhausted"))
            .unwrap();

        let config = db.get_schedule(JobKind::Collection).unwrap().unwrap();
        assert!(config.enabled);
        assert_eq!(config.last_error.as_deref(), Some("provider quota exhausted"));
        assert!(config.last_run_at.is_some());
    }

    #[test]
    fn test_report_upsert_and_delivery() {
        let db = test_db();
        db.upsert_site(&test_site("s1", "a.example.com", "p1"))
            .unwrap();

        let start: NaiveDate = "2026-06-01".parse().unwrap();
        let end: NaiveDate = "2026-06-07".parse().unwrap();
        let report = Report {
            site_id: "s1".to_string(),
            period_start: start,
            period_end: end,
            granularity: Granularity::Weekly,
            comparison: PeriodComparison {
                current: PeriodTotals::default(),
                previous: PeriodTotals::default(),
                clicks_change: 0.0,
                impressions_change: 0.0,
                ctr_change: 0.0,
                position_change: 0.0,
            },
            trailing: None,
            top_pages: vec![],
            top_queries: vec![],
            insights: vec!["traffic held steady".to_string()],
            recommendations: vec![],
            data_coverage: 1.0,
            created_at: Utc::now(),
            delivered_at: None,
        };
        db.upsert_report(&report).unwrap();
        db.upsert_report(&report).unwrap();

        let stored = db.get_report("s1", start, end).unwrap().unwrap();
        assert!(stored.delivered_at.is_none());
        assert_eq!(stored.insights.len(), 1);

        db.mark_report_delivered("s1", start, end, Utc::now()).unwrap();
        let stored = db.get_report("s1", start, end).unwrap().unwrap();
        assert!(stored.delivered_at.is_some());
    }

    #[test]
    fn test_grants_round_trip() {
        let db = test_db();
        db.upsert_site(&test_site("s1", "a.example.com", "p1"))
            .unwrap();

        db.upsert_access_grant("p2", "s1").unwrap();
        db.upsert_access_grant("p2", "s1").unwrap();
        assert_eq!(db.granted_site_ids("p2").unwrap(), vec!["s1".to_string()]);

        db.revoke_access_grant("p2", "s1").unwrap();
        assert!(db.granted_site_ids("p2").unwrap().is_empty());
    }
}
