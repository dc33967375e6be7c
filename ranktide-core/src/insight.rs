//! Insight synthesis: deltas in, narrative out
//!
//! The baseline is a fixed decision table over delta buckets. It is
//! deterministic and always succeeds, which makes it the floor the optional
//! LLM enrichment can only build on: the enricher runs under a hard timeout
//! and any failure, timeout, or malformed output returns the baseline
//! unmodified. Report generation can never fail because enrichment did.

use std::sync::Arc;
use std::time::Duration;

use crate::enrich::{EnrichmentContext, Enricher};
use crate::types::{PeriodComparison, RankedEntry};

/// Clicks/impressions percentage thresholds for the decision table.
const SEVERE_DROP_PCT: f64 = -20.0;
const MILD_DROP_PCT: f64 = -5.0;
const FLAT_BAND_PCT: f64 = 5.0;
const STRONG_GROWTH_PCT: f64 = 20.0;
/// CTR percentage drop that flags a listing-attractiveness problem.
const CTR_DROP_PCT: f64 = -10.0;
/// Position point gain (negative = better) that flags a rising opportunity.
const POSITION_GAIN_POINTS: f64 = -1.0;

/// Templated recommendations are capped at a small fixed count.
const MAX_RECOMMENDATIONS: usize = 4;

/// Output of one synthesis pass.
///
/// `insights` and `recommendations` land on the persisted report; `tasks`
/// travels with the report to the delivery renderer and always has exactly
/// the configured count.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub tasks: Vec<String>,
}

/// Turns aggregate deltas into insight and recommendation strings.
pub struct InsightSynthesizer {
    enricher: Option<Arc<dyn Enricher>>,
    enrichment_timeout: Duration,
    task_count: usize,
}

impl InsightSynthesizer {
    /// Baseline-only synthesizer (no enrichment capability configured).
    pub fn baseline_only(task_count: usize) -> Self {
        Self {
            enricher: None,
            enrichment_timeout: Duration::from_secs(0),
            task_count,
        }
    }

    /// Synthesizer with a best-effort enrichment capability.
    pub fn with_enricher(
        enricher: Arc<dyn Enricher>,
        enrichment_timeout: Duration,
        task_count: usize,
    ) -> Self {
        Self {
            enricher: Some(enricher),
            enrichment_timeout,
            task_count,
        }
    }

    /// Synthesize narrative for one period comparison.
    pub async fn synthesize(
        &self,
        comparison: &PeriodComparison,
        top_pages: &[RankedEntry],
        top_queries: &[RankedEntry],
    ) -> SynthesisOutput {
        let mut output = self.baseline(comparison, top_pages, top_queries);

        let Some(enricher) = &self.enricher else {
            return output;
        };

        let context = EnrichmentContext {
            comparison: *comparison,
            top_pages: top_pages.to_vec(),
            top_queries: top_queries.to_vec(),
            task_count: self.task_count,
        };

        match tokio::time::timeout(self.enrichment_timeout, enricher.enrich(&context)).await {
            Ok(Ok(narrative)) => {
                let summary = narrative.summary.trim();
                let tasks_valid = narrative.tasks.len() == self.task_count
                    && narrative.tasks.iter().all(|t| !t.trim().is_empty());
                if summary.is_empty() || !tasks_valid {
                    tracing::warn!("Enrichment returned malformed output, using baseline");
                    return output;
                }
                output.insights.insert(0, summary.to_string());
                output.tasks = narrative.tasks;
                output
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Enrichment failed, using baseline");
                output
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.enrichment_timeout,
                    "Enrichment timed out, using baseline"
                );
                output
            }
        }
    }

    /// The deterministic decision table.
    fn baseline(
        &self,
        comparison: &PeriodComparison,
        _top_pages: &[RankedEntry],
        top_queries: &[RankedEntry],
    ) -> SynthesisOutput {
        let mut insights = Vec::new();
        let mut recommendations = Vec::new();

        let clicks_flat = comparison.clicks_change.abs() < FLAT_BAND_PCT;
        let impressions_flat = comparison.impressions_change.abs() < FLAT_BAND_PCT;

        if comparison.clicks_change <= SEVERE_DROP_PCT {
            insights.push(format!(
                "[critical] Clicks fell {:.1}% versus the previous period; a drop this size usually points at a ranking or algorithm shift",
                comparison.clicks_change.abs()
            ));
            recommendations.push(
                "Run a technical audit: index coverage, crawl errors, and recent template changes"
                    .to_string(),
            );
        } else if comparison.clicks_change <= MILD_DROP_PCT {
            insights.push(format!(
                "[warning] Clicks declined {:.1}% versus the previous period",
                comparison.clicks_change.abs()
            ));
        } else if comparison.clicks_change >= STRONG_GROWTH_PCT {
            insights.push(format!(
                "[positive] Clicks grew {:.1}% versus the previous period",
                comparison.clicks_change
            ));
        }

        if impressions_flat && comparison.ctr_change <= CTR_DROP_PCT {
            insights.push(format!(
                "[warning] Impressions held steady while CTR fell {:.1}%: listings are being seen but not chosen",
                comparison.ctr_change.abs()
            ));
            recommendations.push(
                "Rewrite titles and meta descriptions on the top pages to recover click-through"
                    .to_string(),
            );
        }

        if comparison.position_change <= POSITION_GAIN_POINTS && clicks_flat {
            insights.push(format!(
                "[info] Average position improved {:.1} points with flat clicks: rising visibility not yet converted",
                comparison.position_change.abs()
            ));
            recommendations.push(
                "Expand content around the improving queries to convert visibility into clicks"
                    .to_string(),
            );
        }

        if comparison.impressions_change >= STRONG_GROWTH_PCT && clicks_flat {
            insights.push(format!(
                "[info] Impressions grew {:.1}% without a matching clicks gain",
                comparison.impressions_change
            ));
            recommendations
                .push("Review content gaps against the queries gaining impressions".to_string());
        }

        if let Some(top) = top_queries.first() {
            insights.push(format!(
                "[info] Top query \"{}\" drove {} clicks this period",
                top.key, top.clicks
            ));
        }

        if insights.is_empty() {
            insights
                .push("[info] Performance held steady versus the previous period".to_string());
        }
        if recommendations.is_empty() {
            recommendations
                .push("Keep the current publishing cadence and monitor next period".to_string());
        }
        recommendations.truncate(MAX_RECOMMENDATIONS);

        let tasks = self.action_items(comparison);

        SynthesisOutput {
            insights,
            recommendations,
            tasks,
        }
    }

    /// Actionable follow-up tasks for the period.
    ///
    /// Always returns exactly `task_count` items, detected technical issues
    /// ranked ahead of general optimization suggestions.
    pub fn action_items(&self, comparison: &PeriodComparison) -> Vec<String> {
        let mut pool = Vec::new();

        // Technical issues first
        if comparison.clicks_change <= SEVERE_DROP_PCT {
            pool.push("Check index coverage and crawl errors in the provider console".to_string());
            pool.push("Audit changes deployed this period for ranking regressions".to_string());
        }
        if comparison.ctr_change <= CTR_DROP_PCT {
            pool.push("Rewrite metadata on the three pages losing the most clicks".to_string());
        }

        // General optimization
        pool.push("Refresh content on the top landing pages".to_string());
        pool.push("Add internal links toward pages with improving positions".to_string());
        pool.push("Draft new content targeting one rising query".to_string());
        pool.push("Review page speed on the highest-impression pages".to_string());

        pool.truncate(self.task_count);
        while pool.len() < self.task_count {
            pool.push("Review the search performance dashboard for anomalies".to_string());
        }
        pool
    }
}
