use crate::application::active_tab::ActiveTabOracle;
use crate::application::config_store::{ConfigStore, spawn_config_debouncer};
use crate::application::notification::NotificationDispatcher;
use crate::application::realtime::{MergeOutcome, apply_delta, spawn_realtime_pump};
use crate::application::reminder_store::ReminderStore;
use crate::application::reminder_types::ReminderTypeCatalog;
use crate::application::scheduler::ScheduleController;
use crate::domain::grouping::{GroupSnapshot, changed_ids, group_reminders, snapshot_ids};
use crate::domain::models::{
    ConfigUpdate, CounterSeverity, GroupStatus, NewReminder, RealtimeMessage, Reminder, ReminderConfig,
    ReminderFilter, ReminderGroup, ReminderPatch, ReminderStatus, ReminderType,
};
use crate::infrastructure::config::{AppSettings, TypeCatalogSettings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value::KeyValueStore;
use crate::infrastructure::notifier::{Alert, AlertSink, Notifier};
use crate::infrastructure::platform_client::{EventSource, ListRemindersRequest, TypeCatalog};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub reminder_type: String,
    pub initial_query_size: u32,
    pub max_counter: usize,
    pub config_debounce: Duration,
    pub type_catalog: TypeCatalogSettings,
    /// Prefix for absolute asset links, e.g. `https://tenant.example.com/apps/cockpit/`.
    pub asset_base_url: String,
}

impl From<&AppSettings> for EngineSettings {
    fn from(settings: &AppSettings) -> Self {
        Self {
            reminder_type: settings.reminder_type.clone(),
            initial_query_size: settings.initial_query_size,
            max_counter: settings.max_counter,
            config_debounce: Duration::from_millis(settings.debounce_ms),
            type_catalog: settings.type_catalog.clone(),
            asset_base_url: format!("{}/", settings.base_url.trim_end_matches('/')),
        }
    }
}

pub struct EngineCollaborators {
    pub events: Arc<dyn EventSource>,
    pub types: Arc<dyn TypeCatalog>,
    pub notifier: Arc<dyn Notifier>,
    pub alerts: Arc<dyn AlertSink>,
    /// This tab's handle on the shared key-value store.
    pub storage: Arc<dyn KeyValueStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupsView {
    pub groups: [ReminderGroup; 3],
    /// Ids that entered each group with the latest regroup.
    pub changed: GroupSnapshot,
}

impl GroupsView {
    pub fn empty() -> Self {
        Self {
            groups: [
                ReminderGroup::empty(GroupStatus::Due),
                ReminderGroup::empty(GroupStatus::Upcoming),
                ReminderGroup::empty(GroupStatus::Cleared),
            ],
            changed: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledWakeup {
    pub reminder_id: String,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub reminders: Vec<Reminder>,
    pub groups: [ReminderGroup; 3],
    pub due_active_count: usize,
    pub next_wakeup: Option<ScheduledWakeup>,
    pub config: ReminderConfig,
}

enum EngineCommand {
    ReplaceAll(Vec<Reminder>),
    Delta {
        message: RealtimeMessage,
        resp: oneshot::Sender<MergeOutcome>,
    },
    Created(Reminder),
    Updated(Reminder),
    SetConfig {
        update: ConfigUpdate,
        resp: oneshot::Sender<Result<ReminderConfig, InfraError>>,
    },
    ResetConfig {
        resp: oneshot::Sender<Result<ReminderConfig, InfraError>>,
    },
    ExternalConfigChanged,
    RemoteDueCount {
        generation: u64,
        count: usize,
    },
    Snapshot {
        resp: oneshot::Sender<EngineSnapshot>,
    },
    Shutdown,
}

/// Wires the collaborators together and starts the engine loop.
pub struct ReminderEngine {
    settings: EngineSettings,
    collaborators: EngineCollaborators,
    now_provider: NowProvider,
}

impl ReminderEngine {
    pub fn new(settings: EngineSettings, collaborators: EngineCollaborators) -> Self {
        Self {
            settings,
            collaborators,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Loads config, permission, types and the first page of reminders, then starts the loop,
    /// the realtime pump and the cross-tab config listener. Failures degrade, never abort.
    pub async fn start(self, visible: bool, realtime: mpsc::Receiver<Value>) -> EngineHandle {
        let Self {
            settings,
            collaborators,
            now_provider,
        } = self;

        let config = ConfigStore::load(Arc::clone(&collaborators.storage));
        let oracle = Arc::new(ActiveTabOracle::new(Arc::clone(&collaborators.storage)));
        if let Err(error) = oracle.init(visible) {
            tracing::warn!(%error, "could not claim the active tab slot");
        }

        let dispatcher = NotificationDispatcher::new(
            Arc::clone(&collaborators.notifier),
            Arc::clone(&collaborators.alerts),
            settings.asset_base_url.clone(),
        );
        dispatcher.request_permission().await;

        let types = Arc::new(ReminderTypeCatalog::load(collaborators.types.as_ref(), &settings.type_catalog).await);
        if types.is_empty() {
            if let Err(error) = config.reset_filter() {
                tracing::warn!(%error, "could not clear reminder type filter");
            }
        }

        let initial = fetch_initial_reminders(collaborators.events.as_ref(), &settings).await;

        let (commands, receiver) = mpsc::unbounded_channel();
        let mut worker = EngineWorker {
            store: ReminderStore::new(),
            scheduler: ScheduleController::new(),
            config,
            dispatcher,
            oracle: Arc::clone(&oracle),
            types: Arc::clone(&types),
            events: Arc::clone(&collaborators.events),
            reminder_type: settings.reminder_type.clone(),
            groups_tx: watch::channel(GroupsView::empty()).0,
            last_snapshot: Default::default(),
            commands: commands.downgrade(),
            now_provider: Arc::clone(&now_provider),
        };

        let handle = EngineHandle {
            commands,
            events: Arc::clone(&collaborators.events),
            alerts: Arc::clone(&collaborators.alerts),
            oracle,
            types,
            max_counter: settings.max_counter,
            groups_rx: worker.groups_tx.subscribe(),
            counter_rx: worker.store.subscribe_counter(),
            config_rx: worker.config.subscribe(),
            reminders_rx: worker.store.subscribe_reminders(),
        };

        worker.replace_all(initial);
        tokio::spawn(worker.run(receiver));

        spawn_realtime_pump(realtime, settings.reminder_type.clone(), handle.clone());
        let notifier = handle.clone();
        spawn_config_debouncer(
            collaborators.storage.subscribe(),
            settings.config_debounce,
            move || notifier.notify_external_config().is_ok(),
        );

        tracing::info!(reminder_type = %settings.reminder_type, "reminder engine started");
        handle
    }
}

async fn fetch_initial_reminders(events: &dyn EventSource, settings: &EngineSettings) -> Vec<Reminder> {
    let request = ListRemindersRequest::page(&settings.reminder_type, settings.initial_query_size, 1);
    match events.list(request).await {
        Ok(page) => {
            tracing::info!(count = page.reminders.len(), total_pages = ?page.total_pages, "initial reminders fetched");
            page.reminders
        }
        Err(error) => {
            tracing::warn!(%error, "initial reminder fetch failed, starting empty");
            Vec::new()
        }
    }
}

struct EngineWorker {
    store: ReminderStore,
    scheduler: ScheduleController,
    config: ConfigStore,
    dispatcher: NotificationDispatcher,
    oracle: Arc<ActiveTabOracle>,
    types: Arc<ReminderTypeCatalog>,
    events: Arc<dyn EventSource>,
    reminder_type: String,
    groups_tx: watch::Sender<GroupsView>,
    last_snapshot: GroupSnapshot,
    commands: mpsc::WeakUnboundedSender<EngineCommand>,
    now_provider: NowProvider,
}

impl EngineWorker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<EngineCommand>) {
        loop {
            let deadline = self.scheduler.deadline();
            tokio::select! {
                command = receiver.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle(command) {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timer_fired();
                }
            }
        }
        tracing::info!("reminder engine stopped");
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    /// Returns false when the loop should stop.
    fn handle(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::ReplaceAll(reminders) => {
                self.replace_all(reminders);
            }
            EngineCommand::Delta { message, resp } => {
                let now = self.now();
                let outcome = apply_delta(&mut self.store, message, now);
                tracing::debug!(
                    action = ?outcome.action,
                    reminder_id = %outcome.reminder_id,
                    applied = outcome.applied,
                    "realtime delta merged"
                );
                self.after_mutation(now);
                self.request_remote_count(now);
                resp.send(outcome).ok();
            }
            EngineCommand::Created(reminder) => {
                let now = self.now();
                self.store.upsert(reminder, now);
                self.after_mutation(now);
            }
            EngineCommand::Updated(reminder) => {
                let now = self.now();
                if self.store.replace_existing(reminder, now).is_some() {
                    self.after_mutation(now);
                }
            }
            EngineCommand::SetConfig { update, resp } => {
                let result = self.config.set(&update);
                if result.is_ok() {
                    self.regroup(self.now());
                }
                resp.send(result).ok();
            }
            EngineCommand::ResetConfig { resp } => {
                let result = self.config.reset();
                if result.is_ok() {
                    self.regroup(self.now());
                }
                resp.send(result).ok();
            }
            EngineCommand::ExternalConfigChanged => {
                if let Some(config) = self.config.reload_external() {
                    tracing::debug!(?config, "config changed in another tab");
                    self.regroup(self.now());
                }
            }
            EngineCommand::RemoteDueCount { generation, count } => {
                if generation == self.store.generation() {
                    self.store.set_remote_count(count);
                } else {
                    tracing::debug!(generation, current = self.store.generation(), "stale remote due count dropped");
                }
            }
            EngineCommand::Snapshot { resp } => {
                resp.send(self.snapshot()).ok();
            }
            EngineCommand::Shutdown => return false,
        }
        true
    }

    fn replace_all(&mut self, reminders: Vec<Reminder>) {
        let now = self.now();
        self.store.replace_all(reminders, now);
        self.after_mutation(now);
        self.request_remote_count(now);
    }

    fn after_mutation(&mut self, now: DateTime<Utc>) {
        self.scheduler.rearm(self.store.all(), now);
        self.regroup(now);
    }

    fn regroup(&mut self, now: DateTime<Utc>) {
        let filter = self.active_filter();
        let groups = group_reminders(self.store.all(), filter.as_ref(), now);
        let changed = changed_ids(&self.last_snapshot, &groups);
        self.last_snapshot = snapshot_ids(&groups);
        self.groups_tx.send_replace(GroupsView { groups, changed });
    }

    /// The type filter only applies while a type catalog exists.
    fn active_filter(&self) -> Option<ReminderFilter> {
        if self.types.is_empty() {
            return None;
        }
        ReminderFilter::from_config(&self.config.current())
    }

    fn on_timer_fired(&mut self) {
        let Some(fired) = self.scheduler.take_fired() else {
            return;
        };
        // The sleep may wake marginally before the wall clock reaches the due instant.
        let now = self.now().max(fired.due_at);
        self.store.refresh(now);
        self.after_mutation(now);

        let mut became_due: Vec<Reminder> = self
            .store
            .all()
            .iter()
            .filter(|reminder| reminder.status != ReminderStatus::Cleared && reminder.time == fired.due_at)
            .cloned()
            .collect();
        became_due.sort_by(|left, right| left.id.cmp(&right.id));

        let config = self.config.current();
        for reminder in &became_due {
            self.dispatcher.dispatch(reminder, &config, &self.oracle);
        }
    }

    fn request_remote_count(&self, now: DateTime<Utc>) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let events = Arc::clone(&self.events);
        let request = ListRemindersRequest::due_active_count(&self.reminder_type, now);
        let generation = self.store.generation();
        tokio::spawn(async move {
            match events.list(request).await {
                Ok(page) => {
                    let count = page.total_pages.unwrap_or(0) as usize;
                    commands.send(EngineCommand::RemoteDueCount { generation, count }).ok();
                }
                Err(error) => tracing::warn!(%error, "remote due counter query failed"),
            }
        });
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            reminders: self.store.all().to_vec(),
            groups: self.groups_tx.borrow().groups.clone(),
            due_active_count: self.store.due_active_count(),
            next_wakeup: self.scheduler.armed().map(|timer| ScheduledWakeup {
                reminder_id: timer.reminder_id.clone(),
                due_at: timer.due_at,
            }),
            config: self.config.current(),
        }
    }
}

/// Cloneable front of a running engine. Remote writes run here, outside the engine loop.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    events: Arc<dyn EventSource>,
    alerts: Arc<dyn AlertSink>,
    oracle: Arc<ActiveTabOracle>,
    types: Arc<ReminderTypeCatalog>,
    max_counter: usize,
    groups_rx: watch::Receiver<GroupsView>,
    counter_rx: watch::Receiver<usize>,
    config_rx: watch::Receiver<ReminderConfig>,
    reminders_rx: watch::Receiver<Vec<Reminder>>,
}

impl EngineHandle {
    pub fn groups(&self) -> watch::Receiver<GroupsView> {
        self.groups_rx.clone()
    }

    pub fn due_counter(&self) -> watch::Receiver<usize> {
        self.counter_rx.clone()
    }

    pub fn config(&self) -> watch::Receiver<ReminderConfig> {
        self.config_rx.clone()
    }

    pub fn reminders(&self) -> watch::Receiver<Vec<Reminder>> {
        self.reminders_rx.clone()
    }

    pub fn counter_severity(&self) -> CounterSeverity {
        CounterSeverity::for_count(*self.counter_rx.borrow(), self.max_counter)
    }

    pub fn reminder_types(&self) -> &[ReminderType] {
        self.types.types()
    }

    pub fn type_name(&self, id: &str) -> String {
        self.types.type_name(id).to_string()
    }

    pub fn focus(&self) -> Result<(), InfraError> {
        self.oracle.on_focus()
    }

    pub fn blur(&self) {
        self.oracle.on_blur();
    }

    pub fn is_elected_active(&self) -> bool {
        self.oracle.is_elected_active()
    }

    /// Creates the reminder remotely; the store only changes once the platform confirmed it.
    pub async fn create_reminder(&self, reminder: NewReminder) -> Result<Reminder, InfraError> {
        const FAILURE: &str = "Could not create reminder";

        let reminder = reminder.normalized();
        if let Err(message) = reminder.validate() {
            self.alerts.push(Alert::danger(FAILURE, message.clone()));
            return Err(InfraError::Validation(message));
        }

        match self.events.create(&reminder).await {
            Ok(created) => {
                tracing::info!(reminder_id = %created.id, source_id = %created.source.id, "reminder created");
                self.alerts.push(Alert::success("Reminder created"));
                self.send(EngineCommand::Created(created.clone()))?;
                Ok(created)
            }
            Err(error) => {
                tracing::error!(%error, "reminder create failed");
                self.alerts.push(Alert::danger(FAILURE, error.remote_text()));
                Err(error)
            }
        }
    }

    pub async fn update_status(&self, id: &str, status: ReminderStatus) -> Result<Reminder, InfraError> {
        match self.events.update(id, ReminderPatch::status(status)).await {
            Ok(updated) => {
                tracing::info!(reminder_id = %id, status = status.as_str(), "reminder status updated");
                self.alerts.push(Alert::success(format!(
                    "Reminder {}",
                    status.as_str().to_lowercase()
                )));
                self.send(EngineCommand::Updated(updated.clone()))?;
                Ok(updated)
            }
            Err(error) => {
                tracing::error!(%error, reminder_id = %id, "reminder status update failed");
                self.alerts.push(Alert::danger("Could not update reminder", error.remote_text()));
                Err(error)
            }
        }
    }

    pub async fn set_filter(&self, reminder_type: Option<String>) -> Result<ReminderConfig, InfraError> {
        self.set_config(ConfigUpdate::FilterByType(reminder_type)).await
    }

    pub async fn set_config(&self, update: ConfigUpdate) -> Result<ReminderConfig, InfraError> {
        let (resp, receiver) = oneshot::channel();
        self.send(EngineCommand::SetConfig { update, resp })?;
        receiver.await.map_err(|_| InfraError::EngineStopped)?
    }

    pub async fn reset_config(&self) -> Result<ReminderConfig, InfraError> {
        let (resp, receiver) = oneshot::channel();
        self.send(EngineCommand::ResetConfig { resp })?;
        receiver.await.map_err(|_| InfraError::EngineStopped)?
    }

    pub async fn apply_delta(&self, message: RealtimeMessage) -> Result<MergeOutcome, InfraError> {
        let (resp, receiver) = oneshot::channel();
        self.send(EngineCommand::Delta { message, resp })?;
        receiver.await.map_err(|_| InfraError::EngineStopped)
    }

    pub fn replace_all(&self, reminders: Vec<Reminder>) -> Result<(), InfraError> {
        self.send(EngineCommand::ReplaceAll(reminders))
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, InfraError> {
        let (resp, receiver) = oneshot::channel();
        self.send(EngineCommand::Snapshot { resp })?;
        receiver.await.map_err(|_| InfraError::EngineStopped)
    }

    pub fn notify_external_config(&self) -> Result<(), InfraError> {
        self.send(EngineCommand::ExternalConfigChanged)
    }

    pub fn shutdown(&self) {
        self.send(EngineCommand::Shutdown).ok();
    }

    fn send(&self, command: EngineCommand) -> Result<(), InfraError> {
        self.commands.send(command).map_err(|_| InfraError::EngineStopped)
    }
}
