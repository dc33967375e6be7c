//! Metrics collection for one (site, date)
//!
//! The collector pulls daily totals plus page and query breakdowns from the
//! provider capability and upserts them into the store. All three fetches
//! complete before anything is written, so a fetch failure aborts the call
//! with zero rows written; the writes themselves land in one transaction.
//! Re-collecting an already-collected date overwrites with the latest
//! values.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::provider::SearchAnalyticsProvider;
use crate::types::{DailyMetric, PageMetric, QueryMetric, Site};

/// The provider's observed reporting lag: data for the most recent days is
/// incomplete upstream, so collection never requests dates more recent than
/// `today - REPORTING_LAG_DAYS`.
pub const REPORTING_LAG_DAYS: i64 = 3;

/// The most recent date worth collecting, given today's date.
pub fn latest_collectable_date(today: NaiveDate) -> NaiveDate {
    today - Duration::days(REPORTING_LAG_DAYS)
}

/// Result of collecting one (site, date).
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionOutcome {
    /// Total clicks recorded for the date
    pub clicks_written: i64,
    /// Number of page breakdown rows written
    pub pages_written: usize,
    /// Number of query breakdown rows written
    pub queries_written: usize,
}

/// Pulls metrics from the provider and upserts them into the store.
pub struct MetricsCollector {
    db: Arc<Database>,
    provider: Arc<dyn SearchAnalyticsProvider>,
}

impl MetricsCollector {
    pub fn new(db: Arc<Database>, provider: Arc<dyn SearchAnalyticsProvider>) -> Self {
        Self { db, provider }
    }

    /// Collect all metrics for one (site, date).
    ///
    /// Fails atomically: a provider error on any of the three fetches
    /// leaves the store untouched for this (site, date).
    pub async fn collect(&self, site: &Site, date: NaiveDate) -> Result<CollectionOutcome> {
        let floor = latest_collectable_date(Utc::now().date_naive());
        if date > floor {
            return Err(Error::Collection(format!(
                "date {} is inside the provider reporting lag (latest collectable is {})",
                date, floor
            )));
        }

        let totals = self.provider.fetch_daily_totals(&site.provider_ref, date).await?;
        let pages = self.provider.fetch_page_breakdown(&site.provider_ref, date).await?;
        let queries = self
            .provider
            .fetch_query_breakdown(&site.provider_ref, date)
            .await?;

        // A date the provider has no data for still gets a zero row, so
        // coverage accounting can tell "collected, empty" from "never
        // collected" and reconciliation converges.
        let totals = totals.unwrap_or(crate::provider::TotalsRow {
            clicks: 0,
            impressions: 0,
            ctr: 0.0,
            position: 0.0,
        });

        let daily = DailyMetric {
            site_id: site.id.clone(),
            date,
            clicks: totals.clicks,
            impressions: totals.impressions,
            ctr: totals.ctr,
            position: totals.position,
            collected_at: Utc::now(),
        };
        let pages: Vec<PageMetric> = pages
            .into_iter()
            .map(|row| PageMetric {
                site_id: site.id.clone(),
                date,
                page: row.page,
                clicks: row.clicks,
                impressions: row.impressions,
                ctr: row.ctr,
                position: row.position,
            })
            .collect();
        let queries: Vec<QueryMetric> = queries
            .into_iter()
            .map(|row| QueryMetric {
                site_id: site.id.clone(),
                date,
                query: row.query,
                clicks: row.clicks,
                impressions: row.impressions,
                ctr: row.ctr,
                position: row.position,
            })
            .collect();

        self.db.store_collection(&daily, &pages, &queries)?;

        tracing::info!(
            site = %site.domain,
            %date,
            clicks = daily.clicks,
            pages = pages.len(),
            queries = queries.len(),
            "Collected metrics"
        );

        Ok(CollectionOutcome {
            clicks_written: daily.clicks,
            pages_written: pages.len(),
            queries_written: queries.len(),
        })
    }
}
