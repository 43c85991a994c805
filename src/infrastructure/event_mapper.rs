use crate::domain::models::{
    NewReminder, RealtimeAction, RealtimeMessage, RealtimePayload, Reminder, ReminderPatch,
    ReminderStatus, SourceRef,
};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

pub const REMINDER_EVENT_TYPE: &str = "c8y_Reminder";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventSourceRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Platform event carrying a reminder in its custom fragments.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ReminderEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "reminderType", default)]
    pub reminder_type: Option<String>,
    #[serde(rename = "isGroup", skip_serializing_if = "Option::is_none")]
    pub is_group: Option<Value>,
    #[serde(rename = "isCleared", skip_serializing_if = "Option::is_none")]
    pub is_cleared: Option<Value>,
}

pub fn decode_reminder(event: ReminderEvent) -> Result<Reminder, InfraError> {
    let id = event
        .id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| InfraError::Validation("reminder event is missing id".to_string()))?;
    let source = event
        .source
        .ok_or_else(|| InfraError::Validation(format!("reminder {id} is missing source")))?;
    let time_raw = event
        .time
        .ok_or_else(|| InfraError::Validation(format!("reminder {id} is missing time")))?;
    let status = match event.status.as_deref() {
        Some(raw) => ReminderStatus::parse(raw).map_err(InfraError::Validation)?,
        None => ReminderStatus::Active,
    };

    Ok(Reminder {
        source: SourceRef {
            name: source.name.unwrap_or_else(|| source.id.clone()),
            id: source.id,
        },
        reminder_type: event
            .reminder_type
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        text: event.text.unwrap_or_default(),
        time: parse_timestamp(&time_raw, "time")?,
        status,
        is_group: is_marker_present(event.is_group.as_ref()),
        is_cleared: status == ReminderStatus::Cleared,
        last_updated: event
            .last_updated
            .as_deref()
            .map(|value| parse_timestamp(value, "lastUpdated"))
            .transpose()?,
        diff_ms: 0,
        id,
    })
}

pub fn encode_new_reminder(reminder: &NewReminder, event_type: &str) -> ReminderEvent {
    ReminderEvent {
        id: None,
        event_type: Some(event_type.to_string()),
        source: Some(EventSourceRef {
            id: reminder.source.id.clone(),
            name: Some(reminder.source.name.clone()),
        }),
        text: Some(reminder.text.clone()),
        time: Some(reminder.time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        last_updated: None,
        status: Some(ReminderStatus::Active.as_str().to_string()),
        reminder_type: reminder.reminder_type.clone(),
        is_group: reminder.is_group.then(|| serde_json::json!({})),
        is_cleared: None,
    }
}

/// `isCleared` is always written so retention rules see it removed when a reminder is reopened.
pub fn encode_patch(patch: &ReminderPatch) -> Value {
    serde_json::json!({
        "status": patch.status.as_str(),
        "isCleared": if patch.is_cleared { serde_json::json!({}) } else { Value::Null },
    })
}

/// Decodes a realtime frame. Returns `Ok(None)` for frames about other event types.
pub fn decode_realtime_message(
    frame: &Value,
    reminder_type: &str,
) -> Result<Option<RealtimeMessage>, InfraError> {
    let action = frame
        .get("realtimeAction")
        .and_then(Value::as_str)
        .ok_or_else(|| InfraError::Validation("realtime frame is missing realtimeAction".to_string()))?;
    let action = match action {
        "CREATE" => RealtimeAction::Create,
        "UPDATE" => RealtimeAction::Update,
        "DELETE" => RealtimeAction::Delete,
        other => {
            return Err(InfraError::Validation(format!(
                "unsupported realtime action '{other}'"
            )));
        }
    };
    let data = frame
        .get("data")
        .ok_or_else(|| InfraError::Validation("realtime frame is missing data".to_string()))?;

    if action == RealtimeAction::Delete {
        let id = match data {
            Value::String(id) => id.clone(),
            Value::Number(id) => id.to_string(),
            other => {
                return Err(InfraError::Validation(format!(
                    "delete frame carries unexpected payload {other}"
                )));
            }
        };
        return Ok(Some(RealtimeMessage {
            action,
            payload: RealtimePayload::Id(id),
        }));
    }

    if data.get("type").and_then(Value::as_str) != Some(reminder_type) {
        return Ok(None);
    }

    let event: ReminderEvent = serde_json::from_value(data.clone())?;
    Ok(Some(RealtimeMessage {
        action,
        payload: RealtimePayload::Reminder(decode_reminder(event)?),
    }))
}

fn is_marker_present(value: Option<&Value>) -> bool {
    matches!(value, Some(marker) if !marker.is_null() && marker != &Value::Bool(false))
}

fn parse_timestamp(value: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| InfraError::Validation(format!("invalid {field_name} '{value}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(action: &str) -> Value {
        serde_json::json!({
            "realtimeAction": action,
            "data": {
                "id": "1001",
                "type": REMINDER_EVENT_TYPE,
                "source": { "id": "42", "name": "Compressor" },
                "text": "Replace belt",
                "time": "2026-02-16T09:00:00.000Z",
                "lastUpdated": "2026-02-16T08:00:00.000+01:00",
                "status": "CLEARED",
                "reminderType": "maintenance",
                "isGroup": {},
                "isCleared": {}
            }
        })
    }

    #[test]
    fn decodes_platform_event_into_reminder() {
        let message = decode_realtime_message(&sample_frame("UPDATE"), REMINDER_EVENT_TYPE)
            .expect("decode frame")
            .expect("reminder frame");
        let RealtimePayload::Reminder(reminder) = message.payload else {
            panic!("expected reminder payload");
        };
        assert_eq!(message.action, RealtimeAction::Update);
        assert_eq!(reminder.id, "1001");
        assert_eq!(reminder.source.name, "Compressor");
        assert_eq!(reminder.status, ReminderStatus::Cleared);
        assert!(reminder.is_group);
        assert!(reminder.is_cleared);
        assert_eq!(reminder.reminder_type.as_deref(), Some("maintenance"));
        assert_eq!(
            reminder.last_updated.map(|value| value.to_rfc3339()),
            Some("2026-02-16T07:00:00+00:00".to_string())
        );
    }

    #[test]
    fn ignores_frames_of_other_event_types() {
        let mut frame = sample_frame("CREATE");
        frame["data"]["type"] = Value::String("c8y_LocationUpdate".to_string());
        assert_eq!(
            decode_realtime_message(&frame, REMINDER_EVENT_TYPE).expect("decode frame"),
            None
        );
    }

    #[test]
    fn delete_frames_carry_bare_ids() {
        let frame = serde_json::json!({ "realtimeAction": "DELETE", "data": "1001" });
        let message = decode_realtime_message(&frame, REMINDER_EVENT_TYPE)
            .expect("decode frame")
            .expect("delete frame");
        assert_eq!(message, RealtimeMessage::delete("1001"));
    }

    #[test]
    fn rejects_unknown_actions() {
        let frame = serde_json::json!({ "realtimeAction": "PATCH", "data": {} });
        assert!(decode_realtime_message(&frame, REMINDER_EVENT_TYPE).is_err());
    }

    #[test]
    fn patch_writes_explicit_null_when_reopened() {
        let reopened = encode_patch(&ReminderPatch::status(ReminderStatus::Active));
        assert_eq!(reopened["status"], "ACTIVE");
        assert!(reopened.get("isCleared").is_some_and(Value::is_null));

        let cleared = encode_patch(&ReminderPatch::status(ReminderStatus::Cleared));
        assert_eq!(cleared["isCleared"], serde_json::json!({}));
    }

    #[test]
    fn new_reminder_encoding_marks_groups() {
        let new_reminder = NewReminder {
            source: SourceRef {
                id: "7".to_string(),
                name: "Line A".to_string(),
            },
            reminder_type: None,
            text: "Shift handover".to_string(),
            time: DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc),
            is_group: true,
        };
        let event = encode_new_reminder(&new_reminder, REMINDER_EVENT_TYPE);
        assert_eq!(event.time.as_deref(), Some("2026-02-16T09:00:00.000Z"));
        assert_eq!(event.status.as_deref(), Some("ACTIVE"));
        assert_eq!(event.is_group, Some(serde_json::json!({})));
    }
}
