use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const REMINDER_TEXT_MAX_CHARS: usize = 100;
pub const DEFAULT_MAX_COUNTER: usize = 10;
pub const UNKNOWN_TYPE_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderStatus {
    Active,
    Acknowledged,
    Cleared,
}

impl ReminderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Cleared => "CLEARED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "ACKNOWLEDGED" => Ok(Self::Acknowledged),
            "CLEARED" => Ok(Self::Cleared),
            other => Err(format!("unsupported reminder status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Device,
    Group,
}

impl AssetKind {
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reminder {
    pub id: String,
    pub source: SourceRef,
    pub reminder_type: Option<String>,
    pub text: String,
    pub time: DateTime<Utc>,
    pub status: ReminderStatus,
    pub is_group: bool,
    pub is_cleared: bool,
    pub last_updated: Option<DateTime<Utc>>,
    /// Milliseconds between the last store recompute and `time`; negative while upcoming.
    #[serde(skip)]
    pub diff_ms: i64,
}

impl Reminder {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "reminder.id")?;
        validate_non_empty(&self.source.id, "reminder.source.id")?;
        validate_text(&self.text, "reminder.text")?;
        if self.is_cleared != (self.status == ReminderStatus::Cleared) {
            return Err("reminder.is_cleared must mirror reminder.status".to_string());
        }
        Ok(())
    }

    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.time <= now
    }

    pub fn is_due_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReminderStatus::Active && self.is_due_at(now)
    }

    pub fn refresh_diff(&mut self, now: DateTime<Utc>) {
        self.diff_ms = (now - self.time).num_milliseconds();
    }

    pub fn set_status(&mut self, status: ReminderStatus) {
        self.status = status;
        self.is_cleared = status == ReminderStatus::Cleared;
    }

    pub fn asset_kind(&self) -> AssetKind {
        if self.is_group {
            AssetKind::Group
        } else {
            AssetKind::Device
        }
    }

    /// Route of the attached asset inside the host application, e.g. `/device/42`.
    pub fn asset_path(&self) -> String {
        format!("/{}/{}", self.asset_kind().path_segment(), self.source.id)
    }
}

/// Payload for creating a reminder through the event source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewReminder {
    pub source: SourceRef,
    pub reminder_type: Option<String>,
    pub text: String,
    pub time: DateTime<Utc>,
    pub is_group: bool,
}

impl NewReminder {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.source.id, "reminder.source.id")?;
        validate_text(&self.text, "reminder.text")?;
        if let Some(reminder_type) = &self.reminder_type {
            validate_non_empty(reminder_type, "reminder.reminder_type")?;
        }
        Ok(())
    }

    /// Reminders are due on whole minutes.
    pub fn normalized(&self) -> NewReminder {
        let time = self
            .time
            .with_second(0)
            .and_then(|value| value.with_nanosecond(0))
            .unwrap_or(self.time);
        NewReminder {
            source: self.source.clone(),
            reminder_type: self
                .reminder_type
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            text: self.text.trim().to_string(),
            time,
            is_group: self.is_group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderPatch {
    pub status: ReminderStatus,
    pub is_cleared: bool,
}

impl ReminderPatch {
    pub fn status(status: ReminderStatus) -> Self {
        Self {
            status,
            is_cleared: status == ReminderStatus::Cleared,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderType {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReminderConfig {
    pub filter_by_type: Option<String>,
    pub toast_enabled: bool,
    pub browser_enabled: bool,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            filter_by_type: None,
            toast_enabled: true,
            browser_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdate {
    FilterByType(Option<String>),
    ToastEnabled(bool),
    BrowserEnabled(bool),
}

impl ConfigUpdate {
    pub fn apply(&self, config: &mut ReminderConfig) {
        match self {
            Self::FilterByType(value) => {
                config.filter_by_type = value
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(ToOwned::to_owned);
            }
            Self::ToastEnabled(value) => config.toast_enabled = *value,
            Self::BrowserEnabled(value) => config.browser_enabled = *value,
        }
    }
}

/// Single-dimension equality filter over reminders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderFilter {
    ReminderType(String),
}

impl ReminderFilter {
    pub fn from_config(config: &ReminderConfig) -> Option<Self> {
        config
            .filter_by_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self::ReminderType(value.to_string()))
    }

    pub fn matches(&self, reminder: &Reminder) -> bool {
        match self {
            Self::ReminderType(expected) => reminder.reminder_type.as_deref() == Some(expected.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    Due,
    Upcoming,
    Cleared,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderGroup {
    pub status: GroupStatus,
    pub reminders: Vec<Reminder>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl ReminderGroup {
    pub fn empty(status: GroupStatus) -> Self {
        Self {
            status,
            reminders: Vec::new(),
            count: 0,
            total: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CounterSeverity {
    None,
    Warning,
    Danger,
}

impl CounterSeverity {
    pub fn for_count(count: usize, max_counter: usize) -> Self {
        if count >= max_counter.max(1) {
            Self::Danger
        } else if count >= 1 {
            Self::Warning
        } else {
            Self::None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RealtimeAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimePayload {
    Reminder(Reminder),
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeMessage {
    pub action: RealtimeAction,
    pub payload: RealtimePayload,
}

impl RealtimeMessage {
    pub fn create(reminder: Reminder) -> Self {
        Self {
            action: RealtimeAction::Create,
            payload: RealtimePayload::Reminder(reminder),
        }
    }

    pub fn update(reminder: Reminder) -> Self {
        Self {
            action: RealtimeAction::Update,
            payload: RealtimePayload::Reminder(reminder),
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            action: RealtimeAction::Delete,
            payload: RealtimePayload::Id(id.into()),
        }
    }

    pub fn reminder_id(&self) -> &str {
        match &self.payload {
            RealtimePayload::Reminder(reminder) => &reminder.id,
            RealtimePayload::Id(id) => id,
        }
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_text(value: &str, field_name: &str) -> Result<(), String> {
    validate_non_empty(value, field_name)?;
    if value.trim().chars().count() > REMINDER_TEXT_MAX_CHARS {
        return Err(format!(
            "{field_name} must be at most {REMINDER_TEXT_MAX_CHARS} characters"
        ));
    }
    Ok(())
}
