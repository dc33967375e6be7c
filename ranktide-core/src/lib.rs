//! # ranktide-core
//!
//! Core library for ranktide - a multi-tenant search performance monitor.
//!
//! This library provides:
//! - Domain types for sites, metrics, reports, and schedules
//! - Database storage layer with SQLite
//! - Metric collection from the upstream analytics provider
//! - Gap reconciliation over lookback windows
//! - Report aggregation and insight synthesis
//! - Per-principal access scoping
//!
//! ## Architecture
//!
//! A daily trigger runs the collector for every active site; a weekly
//! trigger runs the aggregator + synthesizer to build reports; an on-demand
//! trigger runs the gap reconciler, which drives the collector for missing
//! (site, date) pairs. Every dashboard read passes through the access
//! scoper before touching the store.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ranktide_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use access::AccessScoper;
pub use collector::{CollectionOutcome, MetricsCollector, REPORTING_LAG_DAYS};
pub use config::Config;
pub use db::Database;
pub use error::{Error, FetchErrorKind, Result};
pub use insight::{InsightSynthesizer, SynthesisOutput};
pub use reconcile::{GapReconciler, ReconcileAck, ReconcileOutcome};
pub use report::{ReportAggregator, ReportService};
pub use scheduler::{RunOutcome, Scheduler, SkipCause};
pub use types::*;

// Public modules
pub mod access;
pub mod collector;
pub mod config;
pub mod db;
pub mod enrich;
pub mod error;
pub mod insight;
pub mod logging;
pub mod provider;
pub mod reconcile;
pub mod report;
pub mod scheduler;
pub mod types;
