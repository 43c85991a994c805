use crate::domain::models::{ConfigUpdate, ReminderConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value::{KeyValueStore, StorageChanges};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const CONFIG_STORAGE_KEY: &str = "c8y_rpConfig";

/// Dashboard preferences persisted as one JSON value in the shared key-value store.
pub struct ConfigStore {
    storage: Arc<dyn KeyValueStore>,
    config_tx: watch::Sender<ReminderConfig>,
}

impl ConfigStore {
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let initial = read_config(storage.as_ref());
        let (config_tx, _) = watch::channel(initial);
        Self { storage, config_tx }
    }

    /// Persisted value; a missing or unreadable payload yields the defaults.
    pub fn get(&self) -> ReminderConfig {
        read_config(self.storage.as_ref())
    }

    /// Last value published to subscribers.
    pub fn current(&self) -> ReminderConfig {
        self.config_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReminderConfig> {
        self.config_tx.subscribe()
    }

    pub fn set(&self, update: &ConfigUpdate) -> Result<ReminderConfig, InfraError> {
        let mut config = self.get();
        update.apply(&mut config);
        self.store(config)
    }

    pub fn reset(&self) -> Result<ReminderConfig, InfraError> {
        self.store(ReminderConfig::default())
    }

    /// Drops a persisted type filter, e.g. when the type catalog no longer exists.
    pub fn reset_filter(&self) -> Result<ReminderConfig, InfraError> {
        if self.get().filter_by_type.is_none() {
            return Ok(self.current());
        }
        tracing::info!("clearing obsolete reminder type filter");
        self.set(&ConfigUpdate::FilterByType(None))
    }

    /// Re-reads the value written by another tab. Returns it only when it differs.
    pub fn reload_external(&self) -> Option<ReminderConfig> {
        let config = self.get();
        let changed = self.config_tx.send_if_modified(|current| {
            if *current == config {
                return false;
            }
            *current = config.clone();
            true
        });
        changed.then_some(config)
    }

    fn store(&self, config: ReminderConfig) -> Result<ReminderConfig, InfraError> {
        let raw = serde_json::to_string(&config)?;
        self.storage.set(CONFIG_STORAGE_KEY, &raw)?;
        tracing::debug!(?config, "reminder config stored");
        self.config_tx.send_replace(config.clone());
        Ok(config)
    }
}

fn read_config(storage: &dyn KeyValueStore) -> ReminderConfig {
    match storage.get(CONFIG_STORAGE_KEY) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|error| {
            tracing::debug!(%error, "stored reminder config unreadable, using defaults");
            ReminderConfig::default()
        }),
        Ok(None) => ReminderConfig::default(),
        Err(error) => {
            tracing::warn!(%error, "could not read reminder config, using defaults");
            ReminderConfig::default()
        }
    }
}

/// Calls `on_settled` once per burst of config writes from other tabs, `window` after the last
/// one. Stops when the change stream closes or `on_settled` returns false.
pub fn spawn_config_debouncer<F>(mut changes: StorageChanges, window: Duration, on_settled: F) -> JoinHandle<()>
where
    F: Fn() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Some(change) if change.key == CONFIG_STORAGE_KEY => {
                        deadline = Some(Instant::now() + window);
                    }
                    Some(_) => {}
                    None => return,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    if !on_settled() {
                        return;
                    }
                }
            }
        }
    })
}
