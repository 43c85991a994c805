use crate::domain::models::{ReminderType, UNKNOWN_TYPE_NAME};
use crate::infrastructure::config::TypeCatalogSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::platform_client::TypeCatalog;

/// Reminder types configured for the tenant, sorted by name. Empty disables type filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderTypeCatalog {
    types: Vec<ReminderType>,
}

impl ReminderTypeCatalog {
    pub fn new(mut types: Vec<ReminderType>) -> Self {
        types.sort_by(|left, right| left.name.cmp(&right.name));
        Self { types }
    }

    /// Fetches the catalog once. Missing or unreadable options give an empty catalog.
    pub async fn load(catalog: &dyn TypeCatalog, settings: &TypeCatalogSettings) -> Self {
        match fetch_types(catalog, settings).await {
            Ok(types) => {
                tracing::info!(count = types.len(), "reminder types loaded");
                Self::new(types)
            }
            Err(error) => {
                tracing::info!(%error, "no reminder type config found");
                Self::default()
            }
        }
    }

    pub fn types(&self) -> &[ReminderType] {
        &self.types
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn type_name(&self, id: &str) -> &str {
        self.types
            .iter()
            .find(|reminder_type| reminder_type.id == id)
            .map_or(UNKNOWN_TYPE_NAME, |reminder_type| reminder_type.name.as_str())
    }
}

async fn fetch_types(
    catalog: &dyn TypeCatalog,
    settings: &TypeCatalogSettings,
) -> Result<Vec<ReminderType>, InfraError> {
    match catalog.detail(&settings.category, &settings.key).await? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(Vec::new()),
    }
}
