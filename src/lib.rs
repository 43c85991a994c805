pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
pub use application::commands::{
    DashboardState, DashboardView, create_reminder_impl, get_dashboard_impl, list_reminder_types_impl,
    reminder_type_name_impl, reset_config_impl, set_filter_impl, set_notification_config_impl,
    set_tab_focus_impl, start_dashboard_impl, stop_dashboard_impl, update_reminder_status_impl,
};
pub use application::engine::{EngineHandle, GroupsView, ReminderEngine};
use domain::models::{Reminder, ReminderConfig, ReminderType};
pub use infrastructure::error::InfraError;
use infrastructure::logging::init_logging;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_root: String,
    pub database_path: String,
}

fn resolve_root(root: Option<String>) -> Result<PathBuf, String> {
    match root {
        Some(path) => Ok(PathBuf::from(path)),
        None => std::env::current_dir().map_err(|error| error.to_string()),
    }
}

pub fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = resolve_root(root)?;
    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
    })
}

/// Host entry point: prepares the workspace, installs logging and builds the dashboard state.
/// Keep the returned guard alive for as long as logs should be flushed to disk.
pub fn init(root: Option<String>) -> Result<(DashboardState, WorkerGuard), String> {
    let workspace_root = resolve_root(root)?;
    let guard = init_logging(&workspace_root.join("logs")).map_err(|error| error.to_string())?;
    let state = DashboardState::new(workspace_root).map_err(|error| {
        tracing::error!(%error, "dashboard state initialisation failed");
        error.to_string()
    })?;
    tracing::info!(workspace_root = %state.workspace_root().display(), "dashboard state ready");
    Ok((state, guard))
}

pub async fn start_dashboard(
    state: &DashboardState,
    visible: bool,
    realtime: mpsc::Receiver<Value>,
) -> Result<DashboardView, String> {
    start_dashboard_impl(state, visible, realtime)
        .await
        .map_err(|error| state.command_error("start_dashboard", &error))
}

pub async fn get_dashboard(state: &DashboardState) -> Result<DashboardView, String> {
    get_dashboard_impl(state)
        .await
        .map_err(|error| state.command_error("get_dashboard", &error))
}

pub async fn create_reminder(
    state: &DashboardState,
    source_id: String,
    source_name: String,
    is_group: bool,
    text: String,
    time: String,
    reminder_type: Option<String>,
) -> Result<Reminder, String> {
    create_reminder_impl(state, source_id, source_name, is_group, text, time, reminder_type)
        .await
        .map_err(|error| state.command_error("create_reminder", &error))
}

pub async fn update_reminder_status(
    state: &DashboardState,
    reminder_id: String,
    status: String,
) -> Result<Reminder, String> {
    update_reminder_status_impl(state, reminder_id, status)
        .await
        .map_err(|error| state.command_error("update_reminder_status", &error))
}

pub async fn set_filter(state: &DashboardState, reminder_type: Option<String>) -> Result<ReminderConfig, String> {
    set_filter_impl(state, reminder_type)
        .await
        .map_err(|error| state.command_error("set_filter", &error))
}

pub async fn set_notification_config(
    state: &DashboardState,
    toast_enabled: Option<bool>,
    browser_enabled: Option<bool>,
) -> Result<ReminderConfig, String> {
    set_notification_config_impl(state, toast_enabled, browser_enabled)
        .await
        .map_err(|error| state.command_error("set_notification_config", &error))
}

pub async fn reset_config(state: &DashboardState) -> Result<ReminderConfig, String> {
    reset_config_impl(state)
        .await
        .map_err(|error| state.command_error("reset_config", &error))
}

pub fn set_tab_focus(state: &DashboardState, focused: bool) -> Result<bool, String> {
    set_tab_focus_impl(state, focused).map_err(|error| state.command_error("set_tab_focus", &error))
}

pub fn list_reminder_types(state: &DashboardState) -> Result<Vec<ReminderType>, String> {
    list_reminder_types_impl(state).map_err(|error| state.command_error("list_reminder_types", &error))
}

pub fn reminder_type_name(state: &DashboardState, reminder_type_id: String) -> Result<String, String> {
    reminder_type_name_impl(state, reminder_type_id)
        .map_err(|error| state.command_error("reminder_type_name", &error))
}

pub fn stop_dashboard(state: &DashboardState) -> Result<bool, String> {
    stop_dashboard_impl(state).map_err(|error| state.command_error("stop_dashboard", &error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn bootstrap_reports_database_location() {
        let root = std::env::temp_dir().join(format!("reminder-bootstrap-{}", std::process::id()));
        fs::create_dir_all(&root).expect("create root");

        let response = bootstrap(Some(root.display().to_string())).expect("bootstrap");
        assert!(response.database_path.ends_with("storage.sqlite"));
        assert_eq!(response.workspace_root, root.display().to_string());

        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn commands_report_errors_as_text() {
        let root = std::env::temp_dir().join(format!("reminder-lib-commands-{}", std::process::id()));
        fs::create_dir_all(&root).expect("create root");
        let state = DashboardState::new(root.clone()).expect("state");

        assert_eq!(
            get_dashboard(&state).await.expect_err("no engine"),
            "reminder engine is not running"
        );
        assert!(set_tab_focus(&state, true).is_err());

        let _ = fs::remove_dir_all(&root);
    }
}
