//! Upstream search analytics capability
//!
//! The provider is an opaque fetch capability: given a site reference and a
//! date it returns zero or more metric rows, or fails with a classified
//! [`FetchErrorKind`](crate::error::FetchErrorKind). Token acquisition and
//! provider-specific API quirks live outside this core; everything here
//! assumes a bearer credential is already in hand.

pub mod http;

pub use http::HttpSearchProvider;

use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Site-wide totals for one date, as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotalsRow {
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

/// One page's metrics for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRow {
    pub page: String,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

/// One search query's metrics for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub query: String,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

/// The external analytics fetch capability.
///
/// Implementations must bound every call with a timeout; a timed-out fetch
/// is reported as a transient fetch error, identically to any other network
/// failure.
#[async_trait]
pub trait SearchAnalyticsProvider: Send + Sync {
    /// Fetch site-wide totals for one date.
    ///
    /// `Ok(None)` means the provider has no data for that date (distinct
    /// from an error): the upstream reported an empty result set.
    async fn fetch_daily_totals(&self, site_ref: &str, date: NaiveDate)
        -> Result<Option<TotalsRow>>;

    /// Fetch the per-page breakdown for one date.
    async fn fetch_page_breakdown(&self, site_ref: &str, date: NaiveDate) -> Result<Vec<PageRow>>;

    /// Fetch the per-query breakdown for one date.
    async fn fetch_query_breakdown(&self, site_ref: &str, date: NaiveDate)
        -> Result<Vec<QueryRow>>;
}
