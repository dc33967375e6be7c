//! Core domain types for ranktide
//!
//! These types form the canonical data model for per-tenant search
//! performance tracking.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Site** | One monitored website; the unit of tenant data isolation |
//! | **Principal** | An authenticated actor (operator or tenant-scoped client) |
//! | **DailyMetric** | Site-wide totals for one calendar date |
//! | **PageMetric / QueryMetric** | Per-page / per-search-query breakdown for one date |
//! | **Report** | Aggregates + deltas + narrative for one (site, period) |
//! | **Period** | An inclusive date range (calendar week, trailing 30 days, ...) |
//! | **Coverage** | Fraction of a period's days that have collected data |
//!
//! Principals are deliberately thin: authentication happens outside this
//! core, so a [`Principal`] is just an identity plus a role. The access
//! scoper turns it into a set of visible site ids.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Sites and principals
// ============================================

/// A monitored tenant website.
///
/// Created once at onboarding. Sites are never deleted; deactivation flips
/// `active` so historical metrics stay queryable. The domain is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    /// Unique identifier (UUID)
    pub id: String,
    /// Globally unique domain, e.g. "shop.example.com"
    pub domain: String,
    /// Human-friendly display name
    pub display_name: String,
    /// Reference the upstream analytics provider knows this site by
    /// (e.g. "sc-domain:shop.example.com" or a property URL)
    pub provider_ref: String,
    /// Principal that owns this site
    pub owner_id: String,
    /// Inactive sites are skipped by collection and reporting
    pub active: bool,
    /// When the site was onboarded
    pub created_at: DateTime<Utc>,
}

/// Role of an authenticated actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Elevated role: sees every active site
    Operator,
    /// Tenant-scoped: sees owned and explicitly granted sites only
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Client => "client",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operator" => Ok(Role::Operator),
            "client" => Ok(Role::Client),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// An authenticated actor, as handed to us by the (external) auth layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn operator(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Operator,
        }
    }

    pub fn client(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Client,
        }
    }
}

/// Grant of site access to a principal beyond ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub principal_id: String,
    pub site_id: String,
    pub granted_at: DateTime<Utc>,
}

// ============================================
// Metrics
// ============================================

/// Site-wide totals for one calendar date.
///
/// At most one row exists per (site, date); collection upserts, never
/// duplicate-inserts. CTR and position are derived upstream and stored
/// as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub site_id: String,
    pub date: NaiveDate,
    pub clicks: i64,
    pub impressions: i64,
    /// Click-through rate as a fraction (0.042 = 4.2%)
    pub ctr: f64,
    /// Average result position; lower is better
    pub position: f64,
    /// When this row was last written by collection
    pub collected_at: DateTime<Utc>,
}

/// Per-page breakdown for one (site, date). Unique on (site, date, page).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMetric {
    pub site_id: String,
    pub date: NaiveDate,
    /// Page path, e.g. "/pricing"
    pub page: String,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

/// Per-query breakdown for one (site, date). Unique on (site, date, query).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetric {
    pub site_id: String,
    pub date: NaiveDate,
    /// Search query string as reported upstream
    pub query: String,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

// ============================================
// Reports
// ============================================

/// Granularity of the primary comparison period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            _ => Err(format!("unknown granularity: {}", s)),
        }
    }
}

/// Sum/average statistics over one period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub clicks: i64,
    pub impressions: i64,
    /// Mean of daily CTR values over days with data
    pub ctr: f64,
    /// Mean of daily average positions over days with data
    pub position: f64,
    /// Days in the period that actually have a daily row
    pub days_with_data: i64,
}

/// Current-vs-previous comparison for two equal-length periods.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodComparison {
    pub current: PeriodTotals,
    pub previous: PeriodTotals,
    /// Percentage change; 0.0 when the previous period had none
    pub clicks_change: f64,
    pub impressions_change: f64,
    pub ctr_change: f64,
    /// Point change in average position; negative is an improvement
    pub position_change: f64,
}

/// Aggregate ranking entry for a page or query over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// Page path or query string
    pub key: String,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

/// A synthesized report for one (site, period).
///
/// Unique on (site, period_start, period_end). Created by the aggregator;
/// the only later mutation is stamping `delivered_at` after the downstream
/// sender confirms handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub site_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub granularity: Granularity,
    /// Primary comparison: this period vs the immediately preceding one
    pub comparison: PeriodComparison,
    /// Wider framing: trailing 30 days vs the preceding 30 days
    pub trailing: Option<PeriodComparison>,
    pub top_pages: Vec<RankedEntry>,
    pub top_queries: Vec<RankedEntry>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    /// days_with_data / expected_days for the primary period
    pub data_coverage: f64,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

// ============================================
// Scheduling
// ============================================

/// Scheduled job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Daily metric collection across active sites
    Collection,
    /// Weekly report generation
    Reporting,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Collection => "collection",
            JobKind::Reporting => "reporting",
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collection" => Ok(JobKind::Collection),
            "reporting" => Ok(JobKind::Reporting),
            _ => Err(format!("unknown job kind: {}", s)),
        }
    }
}

/// Persisted state for one scheduled job.
///
/// Re-read before every run so enable/disable takes effect without a
/// restart. `running` is the overlap guard: a trigger that finds it set
/// skips the run instead of stacking a second one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub job: JobKind,
    /// Trigger expression, e.g. "0 6 * * *" (interpreted by the caller)
    pub expression: String,
    pub enabled: bool,
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ============================================
// Reconciliation jobs
// ============================================

/// Lifecycle of a background reconciliation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileJobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ReconcileJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileJobStatus::Queued => "queued",
            ReconcileJobStatus::Running => "running",
            ReconcileJobStatus::Completed => "completed",
            ReconcileJobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ReconcileJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ReconcileJobStatus::Queued),
            "running" => Ok(ReconcileJobStatus::Running),
            "completed" => Ok(ReconcileJobStatus::Completed),
            "failed" => Ok(ReconcileJobStatus::Failed),
            _ => Err(format!("unknown reconcile job status: {}", s)),
        }
    }
}

/// Pollable record of one background reconciliation pass.
///
/// Replaces the fire-and-forget pattern: the triggering caller gets the job
/// id back immediately and polls this row for completion and per-date
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileJob {
    pub id: String,
    pub requested_days: i64,
    pub dates_found: i64,
    pub dates_synced: i64,
    pub dates_failed: i64,
    pub status: ReconcileJobStatus,
    /// Per-date outcome detail (dates, per-site failures with error kinds)
    pub detail: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
