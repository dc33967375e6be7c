//! Gap reconciliation: detect and re-collect missing (site, date) data
//!
//! A date counts as missing when ANY active site lacks a daily row for it.
//! Coverage is evaluated per site, not by mere existence of some row,
//! because silently skipping one tenant's data would break the multi-tenant
//! isolation guarantee. Collection failures are isolated per (site, date):
//! one tenant's auth failure never blocks sibling sites or later dates.
//!
//! Background passes run on a detached task but leave a pollable
//! `reconcile_jobs` record behind, carrying per-date outcome, so callers
//! observe completion through the store instead of trusting a
//! fire-and-forget.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::collector::{latest_collectable_date, MetricsCollector};
use crate::db::Database;
use crate::error::Result;
use crate::types::{ReconcileJob, ReconcileJobStatus, Site};

/// One failed (site, date) collection attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteDateFailure {
    pub site_id: String,
    pub date: NaiveDate,
    pub error: String,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Candidate dates found missing (any active site lacked a row)
    pub dates_found: Vec<NaiveDate>,
    /// Dates where at least one site's collection succeeded
    pub dates_synced: Vec<NaiveDate>,
    /// Dates where every site's collection failed
    pub dates_failed: Vec<NaiveDate>,
    /// Every failed (site, date) attempt, with the reason
    pub failures: Vec<SiteDateFailure>,
}

/// Immediate acknowledgment for a background reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileAck {
    /// Job record id to poll via the store
    pub job_id: String,
    /// Number of missing dates queued for collection
    pub dates_queued: usize,
}

/// Detects coverage gaps over a lookback window and drives re-collection.
pub struct GapReconciler {
    db: Arc<Database>,
    collector: Arc<MetricsCollector>,
}

impl GapReconciler {
    pub fn new(db: Arc<Database>, collector: Arc<MetricsCollector>) -> Self {
        Self { db, collector }
    }

    /// Candidate dates for a window: `today - 3` back `window_days` days,
    /// newest first.
    pub fn candidate_dates(today: NaiveDate, window_days: i64) -> Vec<NaiveDate> {
        let newest = latest_collectable_date(today);
        (0..window_days).map(|i| newest - Duration::days(i)).collect()
    }

    /// Dates in the window that are missing for at least one of the sites.
    fn find_missing_dates(
        &self,
        sites: &[Site],
        today: NaiveDate,
        window_days: i64,
    ) -> Result<Vec<NaiveDate>> {
        let mut missing = Vec::new();
        for date in Self::candidate_dates(today, window_days) {
            for site in sites {
                if !self.db.has_daily_metric(&site.id, date)? {
                    missing.push(date);
                    break;
                }
            }
        }
        Ok(missing)
    }

    /// Run a reconciliation pass over the lookback window, synchronously.
    pub async fn reconcile_window(&self, window_days: i64) -> Result<ReconcileOutcome> {
        self.reconcile_window_from(Utc::now().date_naive(), window_days)
            .await
    }

    /// Reconciliation pass anchored at an explicit `today` (testable seam).
    pub async fn reconcile_window_from(
        &self,
        today: NaiveDate,
        window_days: i64,
    ) -> Result<ReconcileOutcome> {
        let sites = self.db.list_active_sites()?;
        if sites.is_empty() {
            tracing::warn!("No active sites, nothing to reconcile");
            return Ok(ReconcileOutcome::default());
        }

        let missing = self.find_missing_dates(&sites, today, window_days)?;
        tracing::info!(
            window_days,
            dates_missing = missing.len(),
            sites = sites.len(),
            "Starting reconciliation pass"
        );

        let mut outcome = ReconcileOutcome {
            dates_found: missing.clone(),
            ..Default::default()
        };

        for date in missing {
            let mut succeeded = 0usize;
            for site in &sites {
                match self.collector.collect(site, date).await {
                    Ok(_) => succeeded += 1,
                    Err(e) => {
                        // Isolated: keep going for sibling sites and dates
                        tracing::warn!(site = %site.domain, %date, error = %e, "Collection failed");
                        outcome.failures.push(SiteDateFailure {
                            site_id: site.id.clone(),
                            date,
                            error: e.to_string(),
                        });
                    }
                }
            }
            // One successful site is enough to call the date synced; only a
            // date every site failed for counts as failed.
            if succeeded > 0 {
                outcome.dates_synced.push(date);
            } else {
                outcome.dates_failed.push(date);
            }
        }

        tracing::info!(
            found = outcome.dates_found.len(),
            synced = outcome.dates_synced.len(),
            failed = outcome.dates_failed.len(),
            "Reconciliation pass complete"
        );

        Ok(outcome)
    }

    /// Start a background reconciliation pass.
    ///
    /// Returns immediately with the job id and the count of missing dates
    /// queued; the pass itself runs on a detached task that keeps the
    /// `reconcile_jobs` row updated as it progresses.
    pub fn spawn(&self, window_days: i64) -> Result<ReconcileAck> {
        let today = Utc::now().date_naive();
        let sites = self.db.list_active_sites()?;
        let missing = self.find_missing_dates(&sites, today, window_days)?;

        let mut job = ReconcileJob {
            id: uuid::Uuid::new_v4().to_string(),
            requested_days: window_days,
            dates_found: missing.len() as i64,
            dates_synced: 0,
            dates_failed: 0,
            status: ReconcileJobStatus::Queued,
            detail: serde_json::json!({}),
            started_at: Utc::now(),
            finished_at: None,
        };
        self.db.insert_reconcile_job(&job)?;

        let ack = ReconcileAck {
            job_id: job.id.clone(),
            dates_queued: missing.len(),
        };

        let reconciler = GapReconciler {
            db: Arc::clone(&self.db),
            collector: Arc::clone(&self.collector),
        };
        tokio::spawn(async move {
            job.status = ReconcileJobStatus::Running;
            if let Err(e) = reconciler.db.update_reconcile_job(&job) {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job running");
            }

            match reconciler.reconcile_window_from(today, window_days).await {
                Ok(outcome) => {
                    job.dates_found = outcome.dates_found.len() as i64;
                    job.dates_synced = outcome.dates_synced.len() as i64;
                    job.dates_failed = outcome.dates_failed.len() as i64;
                    job.status = ReconcileJobStatus::Completed;
                    job.detail =
                        serde_json::to_value(&outcome).unwrap_or(serde_json::json!({}));
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Reconciliation pass failed");
                    job.status = ReconcileJobStatus::Failed;
                    job.detail = serde_json::json!({ "error": e.to_string() });
                }
            }
            job.finished_at = Some(Utc::now());
            if let Err(e) = reconciler.db.update_reconcile_job(&job) {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
            }
        });

        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_dates_respect_lag_floor() {
        let today: NaiveDate = "2026-06-10".parse().unwrap();
        let dates = GapReconciler::candidate_dates(today, 4);

        assert_eq!(dates.len(), 4);
        assert_eq!(dates[0], "2026-06-07".parse::<NaiveDate>().unwrap());
        assert_eq!(dates[3], "2026-06-04".parse::<NaiveDate>().unwrap());
    }

    #[test]
    fn test_candidate_dates_empty_window() {
        let today: NaiveDate = "2026-06-10".parse().unwrap();
        assert!(GapReconciler::candidate_dates(today, 0).is_empty());
    }
}
