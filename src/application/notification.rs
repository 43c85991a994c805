use crate::application::active_tab::ActiveTabOracle;
use crate::domain::models::{Reminder, ReminderConfig};
use crate::infrastructure::notifier::{Alert, AlertLevel, AlertSink, Notifier, SystemNotification};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const DUE_NOTIFICATION_TAG: &str = "reminder.due";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub elected: bool,
    pub system_notification: bool,
    pub toast: bool,
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    alerts: Arc<dyn AlertSink>,
    permission_granted: AtomicBool,
    asset_base_url: String,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, alerts: Arc<dyn AlertSink>, asset_base_url: impl Into<String>) -> Self {
        Self {
            notifier,
            alerts,
            permission_granted: AtomicBool::new(false),
            asset_base_url: asset_base_url.into(),
        }
    }

    /// Asks the host once; a failed request counts as denied.
    pub async fn request_permission(&self) -> bool {
        let granted = match self.notifier.request_permission().await {
            Ok(granted) => granted,
            Err(error) => {
                tracing::warn!(%error, "notification permission request failed");
                false
            }
        };
        self.permission_granted.store(granted, Ordering::SeqCst);
        tracing::info!(granted, "system notification permission");
        granted
    }

    pub fn has_permission(&self) -> bool {
        self.permission_granted.load(Ordering::SeqCst)
    }

    /// Raises the due notification for `reminder` if this tab holds the election.
    pub fn dispatch(&self, reminder: &Reminder, config: &ReminderConfig, oracle: &ActiveTabOracle) -> DispatchOutcome {
        if !oracle.is_elected_active() {
            tracing::debug!(reminder_id = %reminder.id, "not the active tab, skipping notification");
            return DispatchOutcome::default();
        }

        let mut outcome = DispatchOutcome {
            elected: true,
            ..DispatchOutcome::default()
        };
        if config.browser_enabled {
            outcome.system_notification = self.show_system_notification(reminder);
        }
        if config.toast_enabled {
            self.alerts.push(Alert {
                level: AlertLevel::Warning,
                text: reminder.source.name.clone(),
                detail: Some(due_text(reminder)),
                link: Some(format!("#{}", reminder.asset_path())),
            });
            outcome.toast = true;
        }
        tracing::info!(reminder_id = %reminder.id, ?outcome, "reminder due");
        outcome
    }

    /// Absolute link to the reminder's asset view, e.g. `https://tenant/apps/cockpit/#/device/42`.
    pub fn asset_url(&self, reminder: &Reminder) -> String {
        format!("{}#{}", self.asset_base_url, reminder.asset_path())
    }

    fn show_system_notification(&self, reminder: &Reminder) -> bool {
        if !self.has_permission() {
            tracing::error!("could not send system notification, missing permission");
            return false;
        }
        let notification = SystemNotification {
            title: reminder.source.name.clone(),
            body: due_text(reminder),
            tag: DUE_NOTIFICATION_TAG.to_string(),
            target_url: self.asset_url(reminder),
        };
        match self.notifier.show(notification) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, reminder_id = %reminder.id, "system notification failed");
                false
            }
        }
    }
}

fn due_text(reminder: &Reminder) -> String {
    format!("[DUE] {}", reminder.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ReminderStatus, SourceRef};
    use crate::infrastructure::error::InfraError;
    use crate::infrastructure::key_value::SharedStorage;
    use crate::infrastructure::notifier::ChannelAlertSink;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        grant: bool,
        shown: Mutex<Vec<SystemNotification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn request_permission(&self) -> Result<bool, InfraError> {
            Ok(self.grant)
        }

        fn show(&self, notification: SystemNotification) -> Result<(), InfraError> {
            self.shown.lock().expect("lock shown").push(notification);
            Ok(())
        }
    }

    fn due_reminder() -> Reminder {
        Reminder {
            id: "77".to_string(),
            source: SourceRef {
                id: "42".to_string(),
                name: "Boiler".to_string(),
            },
            reminder_type: None,
            text: "Bleed radiators".to_string(),
            time: DateTime::parse_from_rfc3339("2026-02-16T12:00:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc),
            status: ReminderStatus::Active,
            is_group: false,
            is_cleared: false,
            last_updated: None,
            diff_ms: 0,
        }
    }

    fn elected_oracle() -> ActiveTabOracle {
        let oracle = ActiveTabOracle::new(Arc::new(SharedStorage::in_memory().open_tab()));
        oracle.init(true).expect("init oracle");
        oracle
    }

    #[tokio::test]
    async fn elected_tab_sends_both_channels() {
        let notifier = Arc::new(RecordingNotifier {
            grant: true,
            ..RecordingNotifier::default()
        });
        let alerts = Arc::new(ChannelAlertSink::new());
        let mut received = alerts.subscribe();
        let dispatcher = NotificationDispatcher::new(notifier.clone(), alerts, "https://tenant.example.com/apps/cockpit/");
        assert!(dispatcher.request_permission().await);

        let config = ReminderConfig {
            browser_enabled: true,
            ..ReminderConfig::default()
        };
        let outcome = dispatcher.dispatch(&due_reminder(), &config, &elected_oracle());
        assert_eq!(
            outcome,
            DispatchOutcome {
                elected: true,
                system_notification: true,
                toast: true
            }
        );

        let shown = notifier.shown.lock().expect("lock shown").clone();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Boiler");
        assert_eq!(shown[0].body, "[DUE] Bleed radiators");
        assert_eq!(shown[0].tag, DUE_NOTIFICATION_TAG);
        assert_eq!(shown[0].target_url, "https://tenant.example.com/apps/cockpit/#/device/42");

        let toast = received.recv().await.expect("toast");
        assert_eq!(toast.level, AlertLevel::Warning);
        assert_eq!(toast.link.as_deref(), Some("#/device/42"));
    }

    #[tokio::test]
    async fn unelected_tab_stays_silent() {
        let notifier = Arc::new(RecordingNotifier {
            grant: true,
            ..RecordingNotifier::default()
        });
        let dispatcher = NotificationDispatcher::new(notifier.clone(), Arc::new(ChannelAlertSink::new()), "");
        dispatcher.request_permission().await;
        let oracle = ActiveTabOracle::new(Arc::new(SharedStorage::in_memory().open_tab()));
        oracle.init(false).expect("init oracle");

        let config = ReminderConfig {
            browser_enabled: true,
            ..ReminderConfig::default()
        };
        assert_eq!(dispatcher.dispatch(&due_reminder(), &config, &oracle), DispatchOutcome::default());
        assert!(notifier.shown.lock().expect("lock shown").is_empty());
    }

    #[tokio::test]
    async fn missing_permission_still_allows_toast() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(notifier.clone(), Arc::new(ChannelAlertSink::new()), "");
        assert!(!dispatcher.request_permission().await);

        let config = ReminderConfig {
            browser_enabled: true,
            toast_enabled: true,
            filter_by_type: None,
        };
        let outcome = dispatcher.dispatch(&due_reminder(), &config, &elected_oracle());
        assert!(outcome.toast);
        assert!(!outcome.system_notification);
        assert!(notifier.shown.lock().expect("lock shown").is_empty());
    }

    #[test]
    fn disabled_channels_send_nothing() {
        let dispatcher = NotificationDispatcher::new(
            Arc::new(RecordingNotifier::default()),
            Arc::new(ChannelAlertSink::new()),
            "",
        );
        let config = ReminderConfig {
            filter_by_type: None,
            toast_enabled: false,
            browser_enabled: false,
        };
        let outcome = dispatcher.dispatch(&due_reminder(), &config, &elected_oracle());
        assert!(outcome.elected);
        assert!(!outcome.toast && !outcome.system_notification);
    }
}
