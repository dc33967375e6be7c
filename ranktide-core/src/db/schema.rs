//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Tenant registry
    -- ============================================

    CREATE TABLE IF NOT EXISTS sites (
        id               TEXT PRIMARY KEY,
        domain           TEXT NOT NULL UNIQUE,
        display_name     TEXT NOT NULL,
        provider_ref     TEXT NOT NULL,
        owner_id         TEXT NOT NULL,
        active           INTEGER NOT NULL DEFAULT 1,
        created_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_sites_owner ON sites(owner_id);
    CREATE INDEX IF NOT EXISTS idx_sites_active ON sites(active);

    CREATE TABLE IF NOT EXISTS access_grants (
        principal_id     TEXT NOT NULL,
        site_id          TEXT NOT NULL REFERENCES sites(id),
        granted_at       DATETIME NOT NULL,

        UNIQUE(principal_id, site_id)
    );

    CREATE INDEX IF NOT EXISTS idx_grants_principal ON access_grants(principal_id);

    -- ============================================
    -- Collected metrics
    -- ============================================

    CREATE TABLE IF NOT EXISTS daily_metrics (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id          TEXT NOT NULL REFERENCES sites(id),
        date             TEXT NOT NULL,
        clicks           INTEGER NOT NULL,
        impressions      INTEGER NOT NULL,
        ctr              REAL NOT NULL,
        position         REAL NOT NULL,
        collected_at     DATETIME NOT NULL,

        UNIQUE(site_id, date)
    );

    CREATE INDEX IF NOT EXISTS idx_daily_site_date ON daily_metrics(site_id, date);

    CREATE TABLE IF NOT EXISTS page_metrics (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id          TEXT NOT NULL REFERENCES sites(id),
        date             TEXT NOT NULL,
        page             TEXT NOT NULL,
        clicks           INTEGER NOT NULL,
        impressions      INTEGER NOT NULL,
        ctr              REAL NOT NULL,
        position         REAL NOT NULL,

        UNIQUE(site_id, date, page)
    );

    CREATE INDEX IF NOT EXISTS idx_pages_site_date ON page_metrics(site_id, date);

    CREATE TABLE IF NOT EXISTS query_metrics (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id          TEXT NOT NULL REFERENCES sites(id),
        date             TEXT NOT NULL,
        query            TEXT NOT NULL,
        clicks           INTEGER NOT NULL,
        impressions      INTEGER NOT NULL,
        ctr              REAL NOT NULL,
        position         REAL NOT NULL,

        UNIQUE(site_id, date, query)
    );

    CREATE INDEX IF NOT EXISTS idx_queries_site_date ON query_metrics(site_id, date);

    -- ============================================
    -- Derived reports
    -- ============================================

    CREATE TABLE IF NOT EXISTS reports (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id          TEXT NOT NULL REFERENCES sites(id),
        period_start     TEXT NOT NULL,
        period_end       TEXT NOT NULL,
        granularity      TEXT NOT NULL,
        comparison       JSON NOT NULL,
        trailing         JSON,
        top_pages        JSON NOT NULL,
        top_queries      JSON NOT NULL,
        insights         JSON NOT NULL,
        recommendations  JSON NOT NULL,
        data_coverage    REAL NOT NULL,
        created_at       DATETIME NOT NULL,
        delivered_at     DATETIME,

        UNIQUE(site_id, period_start, period_end)
    );

    CREATE INDEX IF NOT EXISTS idx_reports_site ON reports(site_id, period_start);

    -- ============================================
    -- Job schedule state
    -- ============================================

    CREATE TABLE IF NOT EXISTS schedule_configs (
        job              TEXT PRIMARY KEY,
        expression       TEXT NOT NULL,
        enabled          INTEGER NOT NULL DEFAULT 1,
        running          INTEGER NOT NULL DEFAULT 0,
        last_run_at      DATETIME,
        last_error       TEXT
    );
    "#,
    // Version 2: Pollable reconciliation job records (replaces the
    // fire-and-forget background pass)
    r#"
    CREATE TABLE IF NOT EXISTS reconcile_jobs (
        id               TEXT PRIMARY KEY,
        requested_days   INTEGER NOT NULL,
        dates_found      INTEGER NOT NULL DEFAULT 0,
        dates_synced     INTEGER NOT NULL DEFAULT 0,
        dates_failed     INTEGER NOT NULL DEFAULT 0,
        status           TEXT NOT NULL,
        detail           JSON NOT NULL DEFAULT '{}',
        started_at       DATETIME NOT NULL,
        finished_at      DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_reconcile_jobs_status ON reconcile_jobs(status);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
