use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value::KeyValueStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

pub const ACTIVE_TAB_STORAGE_KEY: &str = "c8y_rpActiveTab";

/// Last-focused-wins election among the tabs sharing one key-value store.
///
/// Focus claims the shared slot, blur only marks the tab locally unfocused, so the last tab the
/// user looked at keeps notifying while the window is in the background.
pub struct ActiveTabOracle {
    tab_id: Uuid,
    storage: Arc<dyn KeyValueStore>,
    focused: AtomicBool,
}

impl ActiveTabOracle {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            tab_id: Uuid::new_v4(),
            storage,
            focused: AtomicBool::new(false),
        }
    }

    /// A tab opened in the foreground claims the slot right away.
    pub fn init(&self, visible: bool) -> Result<(), InfraError> {
        self.focused.store(visible, Ordering::SeqCst);
        if visible {
            self.claim()?;
        }
        tracing::info!(tab_id = %self.tab_id, visible, "tab registered");
        Ok(())
    }

    pub fn on_focus(&self) -> Result<(), InfraError> {
        self.focused.store(true, Ordering::SeqCst);
        self.claim()
    }

    pub fn on_blur(&self) {
        self.focused.store(false, Ordering::SeqCst);
    }

    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    pub fn tab_id(&self) -> Uuid {
        self.tab_id
    }

    /// Unreadable slots count as "not elected".
    pub fn is_elected_active(&self) -> bool {
        match self.storage.get(ACTIVE_TAB_STORAGE_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<String>(&raw)
                .ok()
                .and_then(|owner| Uuid::parse_str(&owner).ok())
                .is_some_and(|owner| owner == self.tab_id),
            Ok(None) => false,
            Err(error) => {
                tracing::warn!(%error, "could not read active tab slot");
                false
            }
        }
    }

    fn claim(&self) -> Result<(), InfraError> {
        let raw = serde_json::to_string(&self.tab_id.to_string())?;
        self.storage.set(ACTIVE_TAB_STORAGE_KEY, &raw)?;
        tracing::debug!(tab_id = %self.tab_id, "tab claimed active slot");
        Ok(())
    }
}
