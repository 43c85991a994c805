use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use tokio::sync::broadcast;

const ALERT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemNotification {
    pub title: String,
    pub body: String,
    pub tag: String,
    /// Opened when the notification is clicked.
    pub target_url: String,
}

/// Host notification system.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn request_permission(&self) -> Result<bool, InfraError>;

    fn show(&self, notification: SystemNotification) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub text: String,
    pub detail: Option<String>,
    pub link: Option<String>,
}

impl Alert {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Success,
            text: text.into(),
            detail: None,
            link: None,
        }
    }

    pub fn danger(text: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Danger,
            text: text.into(),
            detail: Some(detail.into()),
            link: None,
        }
    }
}

/// User-visible alert channel (toasts and command feedback).
pub trait AlertSink: Send + Sync {
    fn push(&self, alert: Alert);
}

#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    sender: broadcast::Sender<Alert>,
}

impl ChannelAlertSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }
}

impl Default for ChannelAlertSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertSink for ChannelAlertSink {
    fn push(&self, alert: Alert) {
        tracing::debug!(level = ?alert.level, text = %alert.text, "alert");
        let _ = self.sender.send(alert);
    }
}

/// For hosts without a notification system: permission is never granted.
#[derive(Debug, Default)]
pub struct UnsupportedNotifier;

#[async_trait]
impl Notifier for UnsupportedNotifier {
    async fn request_permission(&self) -> Result<bool, InfraError> {
        tracing::info!("host does not support system notifications");
        Ok(false)
    }

    fn show(&self, _notification: SystemNotification) -> Result<(), InfraError> {
        Err(InfraError::Validation(
            "system notifications are not supported by this host".to_string(),
        ))
    }
}
