use crate::domain::models::BlockingSnapshot;
use crate::infrastructure::error::InfraError;
use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Context-local persistence for the last known snapshot. A freshly created
/// context loads this before its own first refresh completes.
pub trait SnapshotCacheRepository: Send + Sync {
    fn load(&self) -> Result<Option<BlockingSnapshot>, InfraError>;
    fn save(&self, snapshot: &BlockingSnapshot) -> Result<(), InfraError>;
    fn clear(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSnapshotCacheRepository {
    db_path: PathBuf,
}

impl SqliteSnapshotCacheRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl SnapshotCacheRepository for SqliteSnapshotCacheRepository {
    fn load(&self) -> Result<Option<BlockingSnapshot>, InfraError> {
        let connection = self.connect()?;
        let payload: Option<String> = connection
            .query_row("SELECT payload FROM snapshot_cache WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        // A corrupt cached payload must never take the context down; it just
        // forces the next refresh to rebuild from the server.
        match serde_json::from_str::<BlockingSnapshot>(&payload) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(error) => {
                warn!("discarding unreadable snapshot cache: {error}");
                Ok(None)
            }
        }
    }

    fn save(&self, snapshot: &BlockingSnapshot) -> Result<(), InfraError> {
        let payload = serde_json::to_string(snapshot)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO snapshot_cache (id, payload, fetched_at)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
               payload = excluded.payload,
               fetched_at = excluded.fetched_at",
            params![payload, snapshot.fetched_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM snapshot_cache WHERE id = 1", [])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotCacheRepository {
    snapshot: Mutex<Option<BlockingSnapshot>>,
}

impl SnapshotCacheRepository for InMemorySnapshotCacheRepository {
    fn load(&self) -> Result<Option<BlockingSnapshot>, InfraError> {
        let snapshot = self.snapshot.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("snapshot cache lock poisoned: {error}"))
        })?;
        Ok(snapshot.clone())
    }

    fn save(&self, snapshot: &BlockingSnapshot) -> Result<(), InfraError> {
        let mut guard = self.snapshot.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("snapshot cache lock poisoned: {error}"))
        })?;
        *guard = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        let mut guard = self.snapshot.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("snapshot cache lock poisoned: {error}"))
        })?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use chrono::{DateTime, Utc};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDb {
        path: PathBuf,
    }

    impl TempDb {
        fn new() -> Self {
            let sequence = NEXT_DB.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "focusflow-snapshot-cache-{}-{}.sqlite",
                std::process::id(),
                sequence
            ));
            initialize_database(&path).expect("initialize database");
            Self { path }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_snapshot() -> BlockingSnapshot {
        BlockingSnapshot {
            blocked_domains: vec![crate::domain::models::BlockedDomain {
                id: 1,
                domain: "youtube.com".to_string(),
            }],
            active_session: None,
            session_duration_ms: 25 * 60 * 1000,
            fetched_at: fixed_time("2026-02-16T09:00:00Z"),
        }
    }

    #[test]
    fn sqlite_save_and_load_roundtrip() {
        let db = TempDb::new();
        let repository = SqliteSnapshotCacheRepository::new(&db.path);

        assert!(repository.load().expect("load empty").is_none());

        let snapshot = sample_snapshot();
        repository.save(&snapshot).expect("save snapshot");
        let loaded = repository.load().expect("load snapshot").expect("snapshot present");
        assert_eq!(loaded, snapshot);

        repository.clear().expect("clear snapshot");
        assert!(repository.load().expect("load after clear").is_none());
    }

    #[test]
    fn sqlite_corrupt_payload_is_treated_as_absent() {
        let db = TempDb::new();
        let repository = SqliteSnapshotCacheRepository::new(&db.path);

        let connection = Connection::open(&db.path).expect("open connection");
        connection
            .execute(
                "INSERT INTO snapshot_cache (id, payload, fetched_at) VALUES (1, ?1, ?2)",
                params!["{not json", "2026-02-16T09:00:00Z"],
            )
            .expect("seed corrupt payload");

        assert!(repository.load().expect("load should not fail").is_none());
    }

    #[test]
    fn in_memory_roundtrip() {
        let repository = InMemorySnapshotCacheRepository::default();
        let snapshot = sample_snapshot();

        repository.save(&snapshot).expect("save snapshot");
        assert_eq!(
            repository.load().expect("load snapshot"),
            Some(snapshot)
        );

        repository.clear().expect("clear");
        assert!(repository.load().expect("load after clear").is_none());
    }
}
