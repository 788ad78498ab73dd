//! SQLite-backed `VolumeStore`.

use chrono::SecondsFormat;
use rusqlite::{ErrorCode, OptionalExtension, params};

use fusevol_shared::errors::{FusevolError, FusevolResult};

use super::{Database, db_err};
use crate::volume::{Volume, VolumeStore};

/// Volume record store on top of `Database`.
///
/// Every method is a single statement under the connection mutex, which
/// gives per-record linearizability.
#[derive(Clone)]
pub struct SqliteVolumeStore {
    db: Database,
}

impl SqliteVolumeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn decode(json: &str) -> FusevolResult<Volume> {
    serde_json::from_str(json)
        .map_err(|e| FusevolError::Database(format!("corrupt volume record: {}", e)))
}

impl VolumeStore for SqliteVolumeStore {
    fn get(&self, id: &str) -> FusevolResult<Volume> {
        let conn = self.db.conn();
        let json: Option<String> = db_err!(
            conn.query_row("SELECT volume FROM volumes WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
        )?;

        match json {
            Some(json) => decode(&json),
            None => Err(FusevolError::NotFound(id.to_string())),
        }
    }

    fn create(&self, volume: &Volume) -> FusevolResult<()> {
        let json = serde_json::to_string(volume)?;
        let conn = self.db.conn();
        let result = conn.execute(
            "INSERT INTO volumes (id, name, created_at, volume) VALUES (?1, ?2, ?3, ?4)",
            params![
                volume.id,
                volume.locator.name,
                volume.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                json
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(FusevolError::AlreadyExists(format!("volume {}", volume.id)))
            }
            Err(e) => Err(FusevolError::Database(e.to_string())),
        }
    }

    fn update(&self, volume: &Volume) -> FusevolResult<()> {
        let json = serde_json::to_string(volume)?;
        let conn = self.db.conn();
        let rows = db_err!(conn.execute(
            "UPDATE volumes SET volume = ?2 WHERE id = ?1",
            params![volume.id, json],
        ))?;

        if rows == 0 {
            return Err(FusevolError::NotFound(volume.id.clone()));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> FusevolResult<()> {
        let conn = self.db.conn();
        let rows = db_err!(conn.execute("DELETE FROM volumes WHERE id = ?1", [id]))?;

        if rows == 0 {
            return Err(FusevolError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn list(&self) -> FusevolResult<Vec<Volume>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare("SELECT volume FROM volumes ORDER BY created_at DESC"))?;
        let rows = db_err!(stmt.query_map([], |row| row.get::<_, String>(0)))?;

        let mut volumes = Vec::new();
        for json in rows {
            let json = db_err!(json)?;
            volumes.push(decode(&json)?);
        }
        Ok(volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{VolumeFilter, VolumeLocator, VolumeSource, VolumeSpec};
    use chrono::Duration;
    use std::path::Path;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteVolumeStore) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (dir, SqliteVolumeStore::new(db))
    }

    fn create_test_volume(id: &str, name: &str) -> Volume {
        Volume::new(
            id.to_string(),
            VolumeLocator::named(name),
            VolumeSource::default(),
            VolumeSpec::default(),
        )
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, store) = create_test_store();
        let volume = create_test_volume("v1", "data");

        store.create(&volume).unwrap();

        assert_eq!(store.get("v1").unwrap(), volume);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = create_test_store();
        assert!(matches!(store.get("nope"), Err(FusevolError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_create_fails() {
        let (_dir, store) = create_test_store();
        let volume = create_test_volume("v1", "data");

        store.create(&volume).unwrap();
        let result = store.create(&volume);

        assert!(matches!(result, Err(FusevolError::AlreadyExists(_))));
    }

    #[test]
    fn test_update_persists_attach_path() {
        let (_dir, store) = create_test_store();
        let mut volume = create_test_volume("v1", "data");
        store.create(&volume).unwrap();

        volume.attach(Path::new("/mnt/a"));
        store.update(&volume).unwrap();

        let stored = store.get("v1").unwrap();
        assert_eq!(stored.attach_path(), Some(Path::new("/mnt/a")));
    }

    #[test]
    fn test_update_and_delete_missing_are_not_found() {
        let (_dir, store) = create_test_store();
        let volume = create_test_volume("ghost", "data");

        assert!(matches!(store.update(&volume), Err(FusevolError::NotFound(_))));
        assert!(matches!(store.delete("ghost"), Err(FusevolError::NotFound(_))));
    }

    #[test]
    fn test_delete_removes_record() {
        let (_dir, store) = create_test_store();
        store.create(&create_test_volume("v1", "data")).unwrap();

        store.delete("v1").unwrap();

        assert!(matches!(store.get("v1"), Err(FusevolError::NotFound(_))));
    }

    #[test]
    fn test_list_newest_first_and_enumerate() {
        let (_dir, store) = create_test_store();
        let mut older = create_test_volume("old", "logs");
        older.created_at = older.created_at - Duration::minutes(5);
        let newer = create_test_volume("new", "data");

        store.create(&older).unwrap();
        store.create(&newer).unwrap();

        let ids: Vec<_> = store.list().unwrap().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);

        let filter = VolumeFilter {
            name: Some("logs".into()),
            ..Default::default()
        };
        let matched = store.enumerate(&filter).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "old");
    }
}
