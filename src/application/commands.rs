use crate::application::bootstrap::bootstrap_workspace;
use crate::application::engine::{
    EngineCollaborators, EngineHandle, EngineSettings, NowProvider, ReminderEngine, ScheduledWakeup,
};
use crate::domain::grouping::GroupSnapshot;
use crate::domain::models::{
    ConfigUpdate, CounterSeverity, NewReminder, Reminder, ReminderConfig, ReminderGroup, ReminderStatus,
    ReminderType, SourceRef,
};
use crate::infrastructure::config::{AppSettings, apply_env_overrides, load_credentials_from_env};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value::{SharedStorage, SqliteStorageBackend};
use crate::infrastructure::notifier::{ChannelAlertSink, Notifier, UnsupportedNotifier};
use crate::infrastructure::platform_client::{EventSource, ReqwestPlatformClient, TypeCatalog};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

pub struct DashboardState {
    workspace_root: PathBuf,
    settings: AppSettings,
    storage: SharedStorage,
    events: Arc<dyn EventSource>,
    types: Arc<dyn TypeCatalog>,
    notifier: Arc<dyn Notifier>,
    alerts: Arc<ChannelAlertSink>,
    now_provider: Option<NowProvider>,
    engine: Mutex<Option<EngineHandle>>,
}

impl DashboardState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let mut settings = bootstrap.settings;
        apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

        let client = Arc::new(ReqwestPlatformClient::new(
            &settings.base_url,
            load_credentials_from_env()?,
            settings.reminder_type.clone(),
        )?);
        let storage = SharedStorage::new(Arc::new(SqliteStorageBackend::open(&bootstrap.database_path)?));

        Ok(Self {
            workspace_root,
            settings,
            storage,
            events: client.clone(),
            types: client,
            notifier: Arc::new(UnsupportedNotifier),
            alerts: Arc::new(ChannelAlertSink::new()),
            now_provider: None,
            engine: Mutex::new(None),
        })
    }

    pub fn with_platform(mut self, events: Arc<dyn EventSource>, types: Arc<dyn TypeCatalog>) -> Self {
        self.events = events;
        self.types = types;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = Some(now_provider);
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Backing store shared by every tab of this process.
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn alerts(&self) -> &ChannelAlertSink {
        &self.alerts
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::error!(command, %error, "command failed");
        error.to_string()
    }

    fn engine(&self) -> Result<EngineHandle, InfraError> {
        self.lock_engine()?.clone().ok_or(InfraError::EngineStopped)
    }

    fn lock_engine(&self) -> Result<MutexGuard<'_, Option<EngineHandle>>, InfraError> {
        self.engine
            .lock()
            .map_err(|error| InfraError::Storage(format!("engine lock poisoned: {error}")))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub groups: [ReminderGroup; 3],
    pub changed: GroupSnapshot,
    pub due_counter: usize,
    pub counter_severity: CounterSeverity,
    pub next_wakeup: Option<ScheduledWakeup>,
    pub config: ReminderConfig,
    pub reminder_types: Vec<ReminderType>,
    pub elected_active: bool,
}

/// Starts this tab's engine. A running engine is kept and its view returned.
pub async fn start_dashboard_impl(
    state: &DashboardState,
    visible: bool,
    realtime: mpsc::Receiver<Value>,
) -> Result<DashboardView, InfraError> {
    if state.lock_engine()?.is_some() {
        return get_dashboard_impl(state).await;
    }

    let collaborators = EngineCollaborators {
        events: Arc::clone(&state.events),
        types: Arc::clone(&state.types),
        notifier: Arc::clone(&state.notifier),
        alerts: state.alerts.clone(),
        storage: Arc::new(state.storage.open_tab()),
    };
    let mut engine = ReminderEngine::new(EngineSettings::from(&state.settings), collaborators);
    if let Some(now_provider) = &state.now_provider {
        engine = engine.with_now_provider(Arc::clone(now_provider));
    }
    let handle = engine.start(visible, realtime).await;

    let previous = state.lock_engine()?.replace(handle);
    if let Some(previous) = previous {
        previous.shutdown();
    }
    get_dashboard_impl(state).await
}

pub async fn get_dashboard_impl(state: &DashboardState) -> Result<DashboardView, InfraError> {
    let engine = state.engine()?;
    let snapshot = engine.snapshot().await?;
    let changed = engine.groups().borrow().changed.clone();
    let due_counter = *engine.due_counter().borrow();
    Ok(DashboardView {
        groups: snapshot.groups,
        changed,
        due_counter,
        counter_severity: CounterSeverity::for_count(due_counter, state.settings.max_counter),
        next_wakeup: snapshot.next_wakeup,
        config: snapshot.config,
        reminder_types: engine.reminder_types().to_vec(),
        elected_active: engine.is_elected_active(),
    })
}

pub async fn create_reminder_impl(
    state: &DashboardState,
    source_id: String,
    source_name: String,
    is_group: bool,
    text: String,
    time: String,
    reminder_type: Option<String>,
) -> Result<Reminder, InfraError> {
    let time = parse_rfc3339(&time)?;
    state
        .engine()?
        .create_reminder(NewReminder {
            source: SourceRef {
                id: source_id,
                name: source_name,
            },
            reminder_type,
            text,
            time,
            is_group,
        })
        .await
}

pub async fn update_reminder_status_impl(
    state: &DashboardState,
    reminder_id: String,
    status: String,
) -> Result<Reminder, InfraError> {
    let status = ReminderStatus::parse(&status).map_err(InfraError::Validation)?;
    state.engine()?.update_status(&reminder_id, status).await
}

pub async fn set_filter_impl(
    state: &DashboardState,
    reminder_type: Option<String>,
) -> Result<ReminderConfig, InfraError> {
    state.engine()?.set_filter(reminder_type).await
}

pub async fn set_notification_config_impl(
    state: &DashboardState,
    toast_enabled: Option<bool>,
    browser_enabled: Option<bool>,
) -> Result<ReminderConfig, InfraError> {
    let engine = state.engine()?;
    let mut config = engine.config().borrow().clone();
    if let Some(enabled) = toast_enabled {
        config = engine.set_config(ConfigUpdate::ToastEnabled(enabled)).await?;
    }
    if let Some(enabled) = browser_enabled {
        config = engine.set_config(ConfigUpdate::BrowserEnabled(enabled)).await?;
    }
    Ok(config)
}

pub async fn reset_config_impl(state: &DashboardState) -> Result<ReminderConfig, InfraError> {
    state.engine()?.reset_config().await
}

/// Returns whether this tab is the one raising notifications afterwards.
pub fn set_tab_focus_impl(state: &DashboardState, focused: bool) -> Result<bool, InfraError> {
    let engine = state.engine()?;
    if focused {
        engine.focus()?;
    } else {
        engine.blur();
    }
    Ok(engine.is_elected_active())
}

pub fn list_reminder_types_impl(state: &DashboardState) -> Result<Vec<ReminderType>, InfraError> {
    Ok(state.engine()?.reminder_types().to_vec())
}

pub fn reminder_type_name_impl(state: &DashboardState, reminder_type_id: String) -> Result<String, InfraError> {
    Ok(state.engine()?.type_name(&reminder_type_id))
}

pub fn stop_dashboard_impl(state: &DashboardState) -> Result<bool, InfraError> {
    match state.lock_engine()?.take() {
        Some(engine) => {
            engine.shutdown();
            Ok(true)
        }
        None => Ok(false),
    }
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| InfraError::Validation(format!("invalid reminder time '{value}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::platform_client::{ListRemindersRequest, ReminderPage};
    use crate::domain::models::ReminderPatch;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "reminder-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn state(&self, events: Arc<InMemoryPlatform>) -> DashboardState {
            DashboardState::new(self.path.clone())
                .expect("initialize dashboard state")
                .with_platform(events.clone(), events)
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[derive(Default)]
    struct InMemoryPlatform {
        reminders: Mutex<Vec<Reminder>>,
    }

    #[async_trait]
    impl EventSource for InMemoryPlatform {
        async fn list(&self, request: ListRemindersRequest) -> Result<ReminderPage, InfraError> {
            let reminders = self.reminders.lock().expect("lock reminders").clone();
            if request.fragment_type.is_some() {
                let now = request.date_to.unwrap_or_else(Utc::now);
                let count = reminders.iter().filter(|reminder| reminder.is_due_active_at(now)).count();
                return Ok(ReminderPage {
                    reminders: Vec::new(),
                    total_pages: Some(count as u64),
                });
            }
            Ok(ReminderPage {
                reminders,
                total_pages: Some(1),
            })
        }

        async fn create(&self, reminder: &NewReminder) -> Result<Reminder, InfraError> {
            let mut reminders = self.reminders.lock().expect("lock reminders");
            let created = Reminder {
                id: format!("{}", 100 + reminders.len()),
                source: reminder.source.clone(),
                reminder_type: reminder.reminder_type.clone(),
                text: reminder.text.clone(),
                time: reminder.time,
                status: ReminderStatus::Active,
                is_group: reminder.is_group,
                is_cleared: false,
                last_updated: None,
                diff_ms: 0,
            };
            reminders.push(created.clone());
            Ok(created)
        }

        async fn update(&self, id: &str, patch: ReminderPatch) -> Result<Reminder, InfraError> {
            let mut reminders = self.reminders.lock().expect("lock reminders");
            let reminder = reminders
                .iter_mut()
                .find(|reminder| reminder.id == id)
                .ok_or_else(|| InfraError::Remote {
                    status: 404,
                    message: format!("Finding event with id {id} failed"),
                })?;
            reminder.set_status(patch.status);
            Ok(reminder.clone())
        }
    }

    #[async_trait]
    impl TypeCatalog for InMemoryPlatform {
        async fn detail(&self, _category: &str, _key: &str) -> Result<Option<String>, InfraError> {
            Ok(Some(r#"[{"id":"maintenance","name":"Maintenance"}]"#.to_string()))
        }
    }

    #[test]
    fn bootstrap_creates_workspace_layout() {
        let workspace = TempWorkspace::new();
        let state = workspace.state(Arc::new(InMemoryPlatform::default()));

        assert!(workspace.path.join("config").join("app.json").exists());
        assert!(workspace.path.join("state").join("storage.sqlite").exists());
        assert!(workspace.path.join("logs").is_dir());
        assert_eq!(state.settings().initial_query_size, 100);
    }

    #[tokio::test]
    async fn commands_require_a_started_dashboard() {
        let workspace = TempWorkspace::new();
        let state = workspace.state(Arc::new(InMemoryPlatform::default()));

        assert!(matches!(get_dashboard_impl(&state).await, Err(InfraError::EngineStopped)));
        assert!(!stop_dashboard_impl(&state).expect("stop"));
    }

    #[tokio::test]
    async fn create_update_and_filter_flow() {
        let workspace = TempWorkspace::new();
        let state = workspace.state(Arc::new(InMemoryPlatform::default()));
        let (_realtime, realtime_rx) = mpsc::channel(4);

        let view = start_dashboard_impl(&state, true, realtime_rx).await.expect("start");
        assert!(view.elected_active);
        assert_eq!(view.due_counter, 0);
        assert_eq!(view.counter_severity, CounterSeverity::None);

        let due_at = (Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        let created = create_reminder_impl(
            &state,
            "4711".to_string(),
            "Pump station".to_string(),
            false,
            "Check pressure valve".to_string(),
            due_at,
            Some("maintenance".to_string()),
        )
        .await
        .expect("create");

        let view = get_dashboard_impl(&state).await.expect("view");
        assert_eq!(view.groups[1].reminders.len(), 1);
        assert_eq!(view.next_wakeup.map(|wakeup| wakeup.reminder_id), Some(created.id.clone()));

        let updated = update_reminder_status_impl(&state, created.id.clone(), "acknowledged".to_string())
            .await
            .expect("update");
        assert_eq!(updated.status, ReminderStatus::Acknowledged);

        let config = set_filter_impl(&state, Some("maintenance".to_string()))
            .await
            .expect("set filter");
        assert_eq!(config.filter_by_type.as_deref(), Some("maintenance"));
        let config = set_notification_config_impl(&state, Some(false), Some(true))
            .await
            .expect("set notification config");
        assert!(!config.toast_enabled);
        assert!(config.browser_enabled);
        assert_eq!(reset_config_impl(&state).await.expect("reset"), ReminderConfig::default());

        assert_eq!(
            reminder_type_name_impl(&state, "maintenance".to_string()).expect("type name"),
            "Maintenance"
        );
        assert!(stop_dashboard_impl(&state).expect("stop"));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_remote_call() {
        let workspace = TempWorkspace::new();
        let platform = Arc::new(InMemoryPlatform::default());
        let state = workspace.state(Arc::clone(&platform));
        let (_realtime, realtime_rx) = mpsc::channel(4);
        start_dashboard_impl(&state, true, realtime_rx).await.expect("start");

        let result = create_reminder_impl(
            &state,
            "4711".to_string(),
            "Pump station".to_string(),
            false,
            "x".repeat(101),
            Utc::now().to_rfc3339(),
            None,
        )
        .await;
        assert!(matches!(result, Err(InfraError::Validation(_))));

        let result = update_reminder_status_impl(&state, "1".to_string(), "SNOOZED".to_string()).await;
        assert!(matches!(result, Err(InfraError::Validation(_))));

        let result = create_reminder_impl(
            &state,
            "4711".to_string(),
            "Pump station".to_string(),
            false,
            "valid".to_string(),
            "tomorrow".to_string(),
            None,
        )
        .await;
        assert!(matches!(result, Err(InfraError::Validation(_))));
        assert!(platform.reminders.lock().expect("lock reminders").is_empty());
    }

    #[tokio::test]
    async fn focus_changes_election() {
        let workspace = TempWorkspace::new();
        let state = workspace.state(Arc::new(InMemoryPlatform::default()));
        let (_realtime, realtime_rx) = mpsc::channel(4);
        let view = start_dashboard_impl(&state, false, realtime_rx).await.expect("start");
        assert!(!view.elected_active);

        assert!(set_tab_focus_impl(&state, true).expect("focus"));
        assert!(set_tab_focus_impl(&state, false).expect("blur"));
    }
}
