//! Volume record database.
//!
//! One SQLite file under `<home>/db`. Records are JSON blobs with a few
//! columns alongside for lookup and ordering. Opening a database migrates it
//! to the newest schema; a file written by a newer fusevol is refused rather
//! than modified.

mod schema;
mod volumes;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};

use fusevol_shared::errors::{FusevolError, FusevolResult};

pub use volumes::SqliteVolumeStore;

/// Helper macro to convert rusqlite errors to FusevolError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| FusevolError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// Shared handle to the volume database.
///
/// Cloning shares the connection; statements from all clones are serialized
/// by the mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at `db_path` and migrate it.
    pub fn open(db_path: &Path) -> FusevolResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = db_err!(Connection::open(db_path))?;

        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA busy_timeout=100000;
            "
        ))?;

        migrate(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

fn schema_version(conn: &Connection) -> FusevolResult<i32> {
    let version: Option<i32> = db_err!(
        conn.query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()
    )?;
    Ok(version.unwrap_or(0))
}

/// Bring the schema up to `schema::latest_version()`.
fn migrate(conn: &mut Connection) -> FusevolResult<()> {
    db_err!(conn.execute_batch(schema::VERSION_TABLE))?;

    let current = schema_version(conn)?;
    let latest = schema::latest_version();
    if current > latest {
        return Err(FusevolError::Database(format!(
            "database schema version {} was written by a newer fusevol (this build supports up to {})",
            current, latest
        )));
    }

    for migration in schema::MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = db_err!(conn.transaction())?;
        db_err!(tx.execute_batch(migration.sql))?;
        db_err!(tx.execute(
            "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET version = excluded.version, updated_at = excluded.updated_at",
            rusqlite::params![migration.version, Utc::now().to_rfc3339()],
        ))?;
        db_err!(tx.commit())?;
        tracing::info!(version = migration.version, "Applied database migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_db_open() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("db").join("test.db");
        let _db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_db_reopen_keeps_schema_version() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        drop(Database::open(&db_path).unwrap());

        let db = Database::open(&db_path).unwrap();
        assert_eq!(schema_version(&db.conn()).unwrap(), schema::latest_version());
    }

    #[test]
    fn test_db_from_newer_build_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        db.conn()
            .execute("UPDATE schema_version SET version = version + 1", [])
            .unwrap();
        drop(db);

        let err = Database::open(&db_path).err().unwrap();
        assert!(err.to_string().contains("newer fusevol"));
    }
}
