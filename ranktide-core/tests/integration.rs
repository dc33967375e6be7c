//! Integration tests for the collection, reconciliation, and reporting
//! pipeline
//!
//! These tests run the real components against an in-memory database and a
//! stub provider with per-site canned data and failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use ranktide_core::provider::{PageRow, QueryRow, SearchAnalyticsProvider, TotalsRow};
use ranktide_core::types::*;
use ranktide_core::{
    AccessScoper, Database, Error, FetchErrorKind, GapReconciler, InsightSynthesizer,
    MetricsCollector, ReportService, Result,
};

/// Stub provider with per-site canned totals and failure injection.
struct StubProvider {
    /// site_ref -> totals served for every requested date
    totals: Mutex<HashMap<String, TotalsRow>>,
    /// site_refs whose fetches always fail
    failing: Mutex<HashMap<String, FetchErrorKind>>,
    /// number of fetch_daily_totals calls observed
    calls: AtomicUsize,
}

impl StubProvider {
    fn new() -> Self {
        Self {
            totals: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn serve(&self, site_ref: &str, totals: TotalsRow) {
        self.totals
            .lock()
            .unwrap()
            .insert(site_ref.to_string(), totals);
    }

    fn fail(&self, site_ref: &str, kind: FetchErrorKind) {
        self.failing
            .lock()
            .unwrap()
            .insert(site_ref.to_string(), kind);
    }

    fn check(&self, site_ref: &str) -> Result<()> {
        if let Some(kind) = self.failing.lock().unwrap().get(site_ref) {
            return Err(Error::fetch(*kind, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchAnalyticsProvider for StubProvider {
    async fn fetch_daily_totals(
        &self,
        site_ref: &str,
        _date: NaiveDate,
    ) -> Result<Option<TotalsRow>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check(site_ref)?;
        Ok(self.totals.lock().unwrap().get(site_ref).copied())
    }

    async fn fetch_page_breakdown(&self, site_ref: &str, _date: NaiveDate) -> Result<Vec<PageRow>> {
        self.check(site_ref)?;
        Ok(vec![PageRow {
            page: "/pricing".to_string(),
            clicks: 7,
            impressions: 210,
            ctr: 0.033,
            position: 5.5,
        }])
    }

    async fn fetch_query_breakdown(
        &self,
        site_ref: &str,
        _date: NaiveDate,
    ) -> Result<Vec<QueryRow>> {
        self.check(site_ref)?;
        Ok(vec![QueryRow {
            query: "pricing comparison".to_string(),
            clicks: 4,
            impressions: 90,
            ctr: 0.044,
            position: 6.1,
        }])
    }
}

fn site(id: &str, domain: &str, owner: &str) -> Site {
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

fn pipeline() -> (Arc<Database>, Arc<StubProvider>, Arc<GapReconciler>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.migrate().unwrap();
    let provider = Arc::new(StubProvider::new());
    let collector = Arc::new(MetricsCollector::new(db.clone(), provider.clone()));
    let reconciler = Arc::new(GapReconciler::new(db.clone(), collector));
    (db, provider, reconciler)
}

fn totals(clicks: i64) -> TotalsRow {
    TotalsRow {
        clicks,
        impressions: clicks * 20,
        ctr: 0.05,
        position: 7.0,
    }
}

fn seed_daily(db: &Database, site_id: &str, date: NaiveDate, clicks: i64, position: f64) {
    db.upsert_daily_metric(&DailyMetric {
        site_id: site_id.to_string(),
        date,
        clicks,
        impressions: clicks * 20,
        ctr: 0.05,
        position,
        collected_at: Utc::now(),
    })
    .unwrap();
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ============================================
// Collection
// ============================================

#[tokio::test]
async fn test_idempotent_upsert_keeps_second_calls_values() {
    let (db, provider, _) = pipeline();
    let a = site("s1", "a.example.com", "alice");
    db.upsert_site(&a).unwrap();
    let collector = MetricsCollector::new(db.clone(), provider.clone());

    let date: NaiveDate = "2026-01-10".parse().unwrap();

    provider.serve(&a.provider_ref, totals(100));
    collector.collect(&a, date).await.unwrap();

    provider.serve(&a.provider_ref, totals(130));
    collector.collect(&a, date).await.unwrap();

    let rows = db.get_daily_metrics("s1", date, date).unwrap();
    assert_eq!(rows.len(), 1, "exactly one row per (site, date)");
    assert_eq!(rows[0].clicks, 130, "last write wins");

    // Breakdown rows converge too
    assert_eq!(db.get_page_metrics("s1", date).unwrap().len(), 1);
    assert_eq!(db.get_query_metrics("s1", date).unwrap().len(), 1);
}

// ============================================
// Gap reconciliation
// ============================================

#[tokio::test]
async fn test_per_site_gap_isolation() {
    let (db, provider, reconciler) = pipeline();
    let a = site("a", "a.example.com", "alice");
    let b = site("b", "b.example.com", "bob");
    db.upsert_site(&a).unwrap();
    db.upsert_site(&b).unwrap();
    provider.serve(&a.provider_ref, totals(10));
    provider.serve(&b.provider_ref, totals(20));

    // A fully covered over the window, B completely empty
    for date in GapReconciler::candidate_dates(today(), 10) {
        seed_daily(&db, "a", date, 5, 8.0);
    }

    let outcome = reconciler.reconcile_window(10).await.unwrap();

    // Every candidate date is missing because B lacks it, despite A's
    // full coverage
    assert_eq!(outcome.dates_found.len(), 10);
    assert_eq!(outcome.dates_synced.len(), 10);
    assert!(outcome.dates_failed.is_empty());
}

#[tokio::test]
async fn test_partial_success_promotes_date_to_synced() {
    let (db, provider, reconciler) = pipeline();
    let a = site("a", "a.example.com", "alice");
    let b = site("b", "b.example.com", "bob");
    db.upsert_site(&a).unwrap();
    db.upsert_site(&b).unwrap();
    provider.serve(&a.provider_ref, totals(10));
    provider.fail(&b.provider_ref, FetchErrorKind::Auth);

    let outcome = reconciler.reconcile_window(3).await.unwrap();

    assert_eq!(outcome.dates_found.len(), 3);
    // A succeeded for every date, so none are failed
    assert_eq!(outcome.dates_synced.len(), 3);
    assert!(outcome.dates_failed.is_empty());
    // B's failures are still individually recorded for diagnosis
    assert_eq!(outcome.failures.len(), 3);
    assert!(outcome.failures.iter().all(|f| f.site_id == "b"));
    assert!(outcome.failures[0].error.contains("auth"));
}

#[tokio::test]
async fn test_all_sites_failing_marks_date_failed() {
    let (db, provider, reconciler) = pipeline();
    let a = site("a", "a.example.com", "alice");
    db.upsert_site(&a).unwrap();
    provider.fail(&a.provider_ref, FetchErrorKind::Transient);

    let outcome = reconciler.reconcile_window(2).await.unwrap();

    assert_eq!(outcome.dates_found.len(), 2);
    assert!(outcome.dates_synced.is_empty());
    assert_eq!(outcome.dates_failed.len(), 2);
}

#[tokio::test]
async fn test_already_covered_window_finds_nothing() {
    let (db, provider, reconciler) = pipeline();
    let a = site("a", "a.example.com", "alice");
    db.upsert_site(&a).unwrap();
    provider.serve(&a.provider_ref, totals(10));

    for date in GapReconciler::candidate_dates(today(), 5) {
        seed_daily(&db, "a", date, 5, 8.0);
    }

    let before = provider.calls.load(Ordering::SeqCst);
    let outcome = reconciler.reconcile_window(5).await.unwrap();

    assert!(outcome.dates_found.is_empty());
    assert_eq!(
        provider.calls.load(Ordering::SeqCst),
        before,
        "covered dates must not hit the provider"
    );
}

#[tokio::test]
async fn test_background_pass_leaves_pollable_job_record() {
    let (db, provider, reconciler) = pipeline();
    let a = site("a", "a.example.com", "alice");
    db.upsert_site(&a).unwrap();
    provider.serve(&a.provider_ref, totals(10));

    let ack = reconciler.spawn(4).unwrap();
    assert_eq!(ack.dates_queued, 4);

    // Poll the store for completion, as a real caller would
    let mut job = None;
    for _ in 0..100 {
        let current = db.get_reconcile_job(&ack.job_id).unwrap().unwrap();
        if current.status == ReconcileJobStatus::Completed {
            job = Some(current);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let job = job.expect("job should complete");
    assert_eq!(job.dates_found, 4);
    assert_eq!(job.dates_synced, 4);
    assert_eq!(job.dates_failed, 0);
    assert!(job.finished_at.is_some());
    assert!(job.detail.get("dates_synced").is_some());
}

// ============================================
// Reporting
// ============================================

#[tokio::test]
async fn test_weekly_report_deltas_and_coverage() {
    let (db, _, _) = pipeline();
    db.upsert_site(&site("s1", "a.example.com", "alice")).unwrap();

    // Previous week: 100 clicks on one day, position 8.0.
    seed_daily(&db, "s1", "2026-06-01".parse().unwrap(), 100, 8.0);
    // Current week: 150 clicks spread over 5 of 7 days, position 5.0.
    for (day, clicks) in [("08", 30), ("09", 30), ("10", 30), ("11", 30), ("12", 30)] {
        seed_daily(
            &db,
            "s1",
            format!("2026-06-{}", day).parse().unwrap(),
            clicks,
            5.0,
        );
    }

    let service = ReportService::new(db.clone(), InsightSynthesizer::baseline_only(3), 10);
    let report = service
        .generate(
            "s1",
            "2026-06-08".parse().unwrap(),
            "2026-06-14".parse().unwrap(),
            Granularity::Weekly,
        )
        .await
        .unwrap();

    assert_eq!(report.comparison.clicks_change, 50.0);
    assert_eq!(report.comparison.position_change, -3.0);
    assert!((report.data_coverage - 5.0 / 7.0).abs() < 1e-9);
    assert!(!report.insights.is_empty());
    assert!(!report.recommendations.is_empty());

    // Persisted and unique on (site, period)
    let stored = db
        .get_report(
            "s1",
            "2026-06-08".parse().unwrap(),
            "2026-06-14".parse().unwrap(),
        )
        .unwrap()
        .unwrap();
    assert!(stored.delivered_at.is_none());

    service
        .mark_delivered(
            "s1",
            "2026-06-08".parse().unwrap(),
            "2026-06-14".parse().unwrap(),
        )
        .unwrap();
    let stored = db
        .get_report(
            "s1",
            "2026-06-08".parse().unwrap(),
            "2026-06-14".parse().unwrap(),
        )
        .unwrap()
        .unwrap();
    assert!(stored.delivered_at.is_some());
}

#[tokio::test]
async fn test_report_with_zero_previous_period_is_defined() {
    let (db, _, _) = pipeline();
    db.upsert_site(&site("s1", "a.example.com", "alice")).unwrap();
    seed_daily(&db, "s1", "2026-06-08".parse().unwrap(), 10, 4.0);

    let service = ReportService::new(db, InsightSynthesizer::baseline_only(3), 10);
    let report = service
        .generate(
            "s1",
            "2026-06-08".parse().unwrap(),
            "2026-06-14".parse().unwrap(),
            Granularity::Weekly,
        )
        .await
        .unwrap();

    assert_eq!(report.comparison.clicks_change, 0.0);
    assert!(report.comparison.clicks_change.is_finite());
}

#[tokio::test]
async fn test_top_queries_ranked_into_report() {
    let (db, provider, _) = pipeline();
    let a = site("s1", "a.example.com", "alice");
    db.upsert_site(&a).unwrap();
    provider.serve(&a.provider_ref, totals(50));
    let collector = MetricsCollector::new(db.clone(), provider.clone());
    let date: NaiveDate = "2026-06-08".parse().unwrap();
    collector.collect(&a, date).await.unwrap();

    let service = ReportService::new(db, InsightSynthesizer::baseline_only(3), 10);
    let report = service
        .generate(
            "s1",
            date,
            "2026-06-14".parse().unwrap(),
            Granularity::Weekly,
        )
        .await
        .unwrap();

    assert_eq!(report.top_pages[0].key, "/pricing");
    assert_eq!(report.top_queries[0].key, "pricing comparison");
}

// ============================================
// Access scoping
// ============================================

#[tokio::test]
async fn test_scoped_reads_end_to_end() {
    let (db, _, _) = pipeline();
    db.upsert_site(&site("x", "x.example.com", "owner-x")).unwrap();
    db.upsert_site(&site("y", "y.example.com", "owner-y")).unwrap();
    let date: NaiveDate = "2026-06-01".parse().unwrap();
    seed_daily(&db, "x", date, 10, 5.0);
    seed_daily(&db, "y", date, 20, 6.0);

    // carol has only a grant to x, no ownership anywhere
    db.upsert_access_grant("carol", "x").unwrap();
    let scoper = AccessScoper::new(db.clone());
    let carol = Principal::client("carol");

    let ids = scoper.accessible_site_ids(&carol).unwrap();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains("x"));

    // Scoped read returns carol's rows for x...
    let rows = scoper.daily_metrics_for(&carol, "x", date, date).unwrap();
    assert_eq!(rows.len(), 1);

    // ...and zero rows for y even though y's rows exist in the store
    let rows = scoper.daily_metrics_for(&carol, "y", date, date).unwrap();
    assert!(rows.is_empty());
}
