use crate::infrastructure::error::InfraError;
use crate::infrastructure::platform_client::PlatformCredentials;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypeCatalogSettings {
    pub category: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub schema: u8,
    pub base_url: String,
    pub reminder_type: String,
    pub initial_query_size: u32,
    pub max_counter: usize,
    pub debounce_ms: u64,
    pub type_catalog: TypeCatalogSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema: 1,
            base_url: "http://localhost:8111".to_string(),
            reminder_type: "c8y_Reminder".to_string(),
            initial_query_size: 100,
            max_counter: 10,
            debounce_ms: 100,
            type_catalog: TypeCatalogSettings {
                category: "c8y_reminder".to_string(),
                key: "types".to_string(),
            },
        }
    }
}

impl AppSettings {
    pub fn validate(&self) -> Result<(), InfraError> {
        if self.base_url.trim().is_empty() {
            return Err(InfraError::InvalidConfig("baseUrl must not be empty".to_string()));
        }
        if self.reminder_type.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "reminderType must not be empty".to_string(),
            ));
        }
        if self.initial_query_size == 0 {
            return Err(InfraError::InvalidConfig(
                "initialQuerySize must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn ensure_default_config(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&AppSettings::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

pub fn load_settings(config_dir: &Path) -> Result<AppSettings, InfraError> {
    let path = config_dir.join(APP_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    let settings: AppSettings = serde_json::from_value(parsed)?;
    settings.validate()?;
    Ok(settings)
}

pub fn apply_env_overrides<F>(settings: &mut AppSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(base_url) = optional_lookup_value(&lookup, &["REMINDER_C8Y_BASEURL", "C8Y_BASEURL"]) {
        settings.base_url = base_url;
    }
}

pub fn load_credentials_from_env() -> Result<Option<PlatformCredentials>, InfraError> {
    load_credentials_from_lookup(|key| std::env::var(key).ok())
}

/// `Ok(None)` when no credentials are configured; a lone user or password is an error.
pub fn load_credentials_from_lookup<F>(lookup: F) -> Result<Option<PlatformCredentials>, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let username = optional_lookup_value(&lookup, &["REMINDER_C8Y_USER", "C8Y_USER"]);
    let password = optional_lookup_value(&lookup, &["REMINDER_C8Y_PASSWORD", "C8Y_PASSWORD"]);
    match (username, password) {
        (None, None) => Ok(None),
        (Some(username), Some(password)) => Ok(Some(PlatformCredentials { username, password })),
        (Some(_), None) => Err(InfraError::InvalidConfig(
            "missing platform password (set one of: REMINDER_C8Y_PASSWORD, C8Y_PASSWORD)".to_string(),
        )),
        (None, Some(_)) => Err(InfraError::InvalidConfig(
            "missing platform user (set one of: REMINDER_C8Y_USER, C8Y_USER)".to_string(),
        )),
    }
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
