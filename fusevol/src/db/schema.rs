//! Schema migrations for the volume database.
//!
//! Migrations are applied in order, each exactly once. The newest applied
//! version is kept in the single-row `schema_version` table.

pub(super) const VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

pub(super) struct Migration {
    pub version: i32,
    pub sql: &'static str,
}

pub(super) const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    // Volume records: JSON blob plus the columns used for lookup and ordering.
    sql: "
CREATE TABLE volumes (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT,
    created_at TEXT NOT NULL,
    volume TEXT NOT NULL
);
CREATE INDEX idx_volumes_name ON volumes(name);
",
}];

/// Version a fully migrated database reports.
pub(super) fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}
