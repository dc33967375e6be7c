//! Report aggregation: period statistics, deltas, rankings, coverage
//!
//! All math runs over store reads at call time; nothing is cached between
//! calls, so a report generated right after a background collection pass
//! sees the fresh rows.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::insight::InsightSynthesizer;
use crate::types::{Granularity, PeriodComparison, Report};

/// Width of the secondary long-term framing window, in days.
const TRAILING_WINDOW_DAYS: i64 = 30;

/// Percentage change, defined as 0 when the previous value is 0.
fn pct_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

/// The immediately preceding period of identical length.
///
/// `previous_end = start - 1 day`, `previous_start = previous_end - (end - start)`.
pub fn previous_period(start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate) {
    let previous_end = start - Duration::days(1);
    let previous_start = previous_end - (end - start);
    (previous_start, previous_end)
}

/// Computes sum/average statistics and current-vs-previous deltas.
pub struct ReportAggregator {
    db: Arc<Database>,
}

impl ReportAggregator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Compare a period against the immediately preceding period of equal
    /// length.
    ///
    /// Clicks/impressions/CTR deltas are percentages; the position delta is
    /// a point change where negative means improved ranking.
    pub fn compare_periods(
        &self,
        site_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PeriodComparison> {
        let current = self.db.period_totals(site_id, start, end)?;
        let (prev_start, prev_end) = previous_period(start, end);
        let previous = self.db.period_totals(site_id, prev_start, prev_end)?;

        Ok(PeriodComparison {
            current,
            previous,
            clicks_change: pct_change(current.clicks as f64, previous.clicks as f64),
            impressions_change: pct_change(current.impressions as f64, previous.impressions as f64),
            ctr_change: pct_change(current.ctr, previous.ctr),
            position_change: current.position - previous.position,
        })
    }

    /// Aggregate one (site, period) into a report skeleton.
    ///
    /// The narrative fields come back empty; [`ReportService::generate`]
    /// fills them via the synthesizer. `data_coverage` is days-with-data
    /// over expected days so a sparsely-collected period flags its own
    /// incompleteness.
    pub fn aggregate(
        &self,
        site_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
        granularity: Granularity,
        top_n: usize,
    ) -> Result<Report> {
        if period_end < period_start {
            return Err(Error::Report(format!(
                "period end {} precedes period start {}",
                period_end, period_start
            )));
        }

        let comparison = self.compare_periods(site_id, period_start, period_end)?;

        // Independent long-term framing: trailing 30 days ending at the
        // period end vs the 30 days before that.
        let trailing_start = period_end - Duration::days(TRAILING_WINDOW_DAYS - 1);
        let trailing = self.compare_periods(site_id, trailing_start, period_end)?;

        let top_pages = self.db.top_pages(site_id, period_start, period_end, top_n)?;
        let top_queries = self.db.top_queries(site_id, period_start, period_end, top_n)?;

        let expected_days = (period_end - period_start).num_days() + 1;
        let data_coverage = comparison.current.days_with_data as f64 / expected_days as f64;

        Ok(Report {
            site_id: site_id.to_string(),
            period_start,
            period_end,
            granularity,
            comparison,
            trailing: Some(trailing),
            top_pages,
            top_queries,
            insights: Vec::new(),
            recommendations: Vec::new(),
            data_coverage,
            created_at: Utc::now(),
            delivered_at: None,
        })
    }
}

/// Composes aggregation and insight synthesis into persisted reports.
pub struct ReportService {
    db: Arc<Database>,
    aggregator: ReportAggregator,
    synthesizer: InsightSynthesizer,
    top_n: usize,
}

impl ReportService {
    pub fn new(db: Arc<Database>, synthesizer: InsightSynthesizer, top_n: usize) -> Self {
        let aggregator = ReportAggregator::new(db.clone());
        Self {
            db,
            aggregator,
            synthesizer,
            top_n,
        }
    }

    /// Build, synthesize, and persist the report for one (site, period).
    ///
    /// Re-generating an existing (site, period) overwrites the previous
    /// report; `delivered_at` is only set later via [`Self::mark_delivered`].
    pub async fn generate(
        &self,
        site_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Report> {
        let site = self
            .db
            .get_site(site_id)?
            .ok_or_else(|| Error::SiteNotFound(site_id.to_string()))?;

        let mut report =
            self.aggregator
                .aggregate(site_id, period_start, period_end, granularity, self.top_n)?;

        let synthesis = self
            .synthesizer
            .synthesize(&report.comparison, &report.top_pages, &report.top_queries)
            .await;
        report.insights = synthesis.insights;
        report.recommendations = synthesis.recommendations;

        self.db.upsert_report(&report)?;

        tracing::info!(
            site = %site.domain,
            period_start = %period_start,
            period_end = %period_end,
            coverage = report.data_coverage,
            "Report generated"
        );

        Ok(report)
    }

    /// Stamp a report delivered after the downstream sender confirms handoff.
    pub fn mark_delivered(
        &self,
        site_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<()> {
        self.db
            .mark_report_delivered(site_id, period_start, period_end, Utc::now())
    }
}
