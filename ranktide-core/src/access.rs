//! Access scoping: which sites a principal may see
//!
//! Every metrics read for a dashboard or API consumer passes through this
//! module before touching the store. It is the only mechanism preventing
//! cross-tenant data leakage, so no query path may bypass it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::db::Database;
use crate::error::Result;
use crate::types::{DailyMetric, Principal, Report, Role};

/// Resolves and enforces the set of site IDs a principal may see.
pub struct AccessScoper {
    db: Arc<Database>,
}

impl AccessScoper {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The set of site IDs this principal is permitted to see.
    ///
    /// Two-tier policy: operators see every active site; everyone else sees
    /// the union of sites they own and sites granted via access grants.
    pub fn accessible_site_ids(&self, principal: &Principal) -> Result<HashSet<String>> {
        match principal.role {
            Role::Operator => Ok(self
                .db
                .list_active_sites()?
                .into_iter()
                .map(|site| site.id)
                .collect()),
            Role::Client => {
                let mut ids: HashSet<String> =
                    self.db.owned_site_ids(&principal.id)?.into_iter().collect();
                ids.extend(self.db.granted_site_ids(&principal.id)?);
                Ok(ids)
            }
        }
    }

    /// All reports visible to this principal, newest first per site.
    pub fn reports_for(&self, principal: &Principal) -> Result<Vec<Report>> {
        let mut reports = Vec::new();
        for site_id in self.accessible_site_ids(principal)? {
            reports.extend(self.db.list_reports(&site_id)?);
        }
        Ok(reports)
    }

    /// Daily metrics for one site over a range, scoped.
    ///
    /// Returns zero rows when the site is outside the principal's scope,
    /// even if rows exist in the store.
    pub fn daily_metrics_for(
        &self,
        principal: &Principal,
        site_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyMetric>> {
        if !self.accessible_site_ids(principal)?.contains(site_id) {
            tracing::debug!(
                principal = %principal.id,
                site = %site_id,
                "Metrics read refused: site outside principal scope"
            );
            return Ok(Vec::new());
        }
        self.db.get_daily_metrics(site_id, start, end)
    }
}
