use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub origin: u64,
    pub key: String,
    pub new_value: Option<String>,
}

/// Storage medium behind the shared key-value slots.
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, InfraError>;
    fn write(&self, key: &str, value: &str) -> Result<(), InfraError>;
    fn remove(&self, key: &str) -> Result<(), InfraError>;
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError>;
    fn set(&self, key: &str, value: &str) -> Result<(), InfraError>;
    fn delete(&self, key: &str) -> Result<(), InfraError>;
    /// Changes written through other handles; own writes are never reported.
    fn subscribe(&self) -> StorageChanges;
}

#[derive(Debug, Default)]
pub struct InMemoryStorageBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl StorageBackend for InMemoryStorageBackend {
    fn read(&self, key: &str) -> Result<Option<String>, InfraError> {
        let entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::Storage(format!("key-value lock poisoned: {error}")))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::Storage(format!("key-value lock poisoned: {error}")))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::Storage(format!("key-value lock poisoned: {error}")))?;
        entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStorageBackend {
    db_path: PathBuf,
}

impl SqliteStorageBackend {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, InfraError> {
        let db_path = db_path.as_ref().to_path_buf();
        initialize_database(&db_path)?;
        Ok(Self { db_path })
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl StorageBackend for SqliteStorageBackend {
    fn read(&self, key: &str) -> Result<Option<String>, InfraError> {
        let connection = self.connect()?;
        let value: Option<String> = connection
            .query_row(
                "SELECT value FROM key_value WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO key_value (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM key_value WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Backing shared by every tab handle of the process.
#[derive(Clone)]
pub struct SharedStorage {
    backend: Arc<dyn StorageBackend>,
    changes: broadcast::Sender<StorageChange>,
}

impl SharedStorage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { backend, changes }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorageBackend::default()))
    }

    pub fn open_tab(&self) -> TabStorage {
        TabStorage {
            handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            shared: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TabStorage {
    handle_id: u64,
    shared: SharedStorage,
}

impl TabStorage {
    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    fn publish(&self, key: &str, new_value: Option<&str>) {
        // No receivers is fine: nobody else has the dashboard open.
        let _ = self.shared.changes.send(StorageChange {
            origin: self.handle_id,
            key: key.to_string(),
            new_value: new_value.map(ToOwned::to_owned),
        });
    }
}

impl KeyValueStore for TabStorage {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        self.shared.backend.read(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
        self.shared.backend.write(key, value)?;
        self.publish(key, Some(value));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), InfraError> {
        self.shared.backend.remove(key)?;
        self.publish(key, None);
        Ok(())
    }

    fn subscribe(&self) -> StorageChanges {
        StorageChanges {
            handle_id: self.handle_id,
            receiver: self.shared.changes.subscribe(),
        }
    }
}

pub struct StorageChanges {
    handle_id: u64,
    receiver: broadcast::Receiver<StorageChange>,
}

impl StorageChanges {
    /// Next change made by another handle, `None` once the storage is gone.
    pub async fn recv(&mut self) -> Option<StorageChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.origin == self.handle_id => continue,
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "storage change listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    static NEXT_TEMP_DIR: AtomicU64 = AtomicU64::new(0);

    struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "reminder-kv-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp directory");
            Self { path }
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[tokio::test]
    async fn writes_are_reported_to_other_tabs_only() {
        let shared = SharedStorage::in_memory();
        let tab_a = shared.open_tab();
        let tab_b = shared.open_tab();
        let mut changes_a = tab_a.subscribe();
        let mut changes_b = tab_b.subscribe();

        tab_a.set("slot", "\"a\"").expect("write slot");

        let change = changes_b.recv().await.expect("change for tab b");
        assert_eq!(change.origin, tab_a.handle_id());
        assert_eq!(change.new_value.as_deref(), Some("\"a\""));
        assert_eq!(tab_b.get("slot").expect("read slot").as_deref(), Some("\"a\""));

        let own = tokio::time::timeout(Duration::from_millis(20), changes_a.recv()).await;
        assert!(own.is_err(), "writer must not see its own change");
    }

    #[tokio::test]
    async fn delete_is_reported_as_missing_value() {
        let shared = SharedStorage::in_memory();
        let writer = shared.open_tab();
        let reader = shared.open_tab();
        let mut changes = reader.subscribe();

        writer.set("slot", "1").expect("write slot");
        writer.delete("slot").expect("delete slot");

        assert_eq!(changes.recv().await.and_then(|change| change.new_value), Some("1".to_string()));
        assert_eq!(changes.recv().await.map(|change| change.new_value), Some(None));
        assert_eq!(reader.get("slot").expect("read slot"), None);
    }

    #[test]
    fn sqlite_backend_roundtrip() {
        let temp = TempDir::new();
        let backend = SqliteStorageBackend::open(temp.path.join("storage.sqlite")).expect("open backend");

        assert_eq!(backend.read("config").expect("read"), None);
        backend.write("config", "{\"toastEnabled\":false}").expect("write");
        backend.write("config", "{\"toastEnabled\":true}").expect("overwrite");
        assert_eq!(
            backend.read("config").expect("read").as_deref(),
            Some("{\"toastEnabled\":true}")
        );
        backend.remove("config").expect("remove");
        assert_eq!(backend.read("config").expect("read"), None);
    }

    #[test]
    fn sqlite_backend_is_shared_between_openers() {
        let temp = TempDir::new();
        let path = temp.path.join("storage.sqlite");
        let first = SqliteStorageBackend::open(&path).expect("open first");
        let second = SqliteStorageBackend::open(&path).expect("open second");

        first.write("active_tab", "\"tab-1\"").expect("write");
        assert_eq!(second.read("active_tab").expect("read").as_deref(), Some("\"tab-1\""));
    }
}
