use crate::application::engine::EngineHandle;
use crate::application::reminder_store::ReminderStore;
use crate::domain::models::{RealtimeAction, RealtimeMessage, RealtimePayload, ReminderStatus};
use crate::infrastructure::event_mapper::decode_realtime_message;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub action: RealtimeAction,
    pub reminder_id: String,
    /// False when the delta referenced an id the store does not hold.
    pub applied: bool,
    /// Counter after the incremental adjustment, before the full recompute.
    pub provisional_count: usize,
    pub due_active_count: usize,
}

/// Applies one delta to the store. The store's full recompute is authoritative for the counter.
pub fn apply_delta(store: &mut ReminderStore, message: RealtimeMessage, now: DateTime<Utc>) -> MergeOutcome {
    let before = store.due_active_count();
    let reminder_id = message.reminder_id().to_string();
    let action = message.action;

    let (applied, provisional_count) = match (action, message.payload) {
        (RealtimeAction::Create, RealtimePayload::Reminder(reminder)) => {
            let adds_due = reminder.is_due_active_at(now);
            let previous = store.upsert(reminder, now);
            let provisional = if adds_due && previous.is_none() { before + 1 } else { before };
            (true, provisional)
        }
        (RealtimeAction::Update, RealtimePayload::Reminder(reminder)) => {
            // An UPDATE for an unknown id is stale (e.g. already deleted); dropping it keeps
            // DELETE-then-UPDATE from resurrecting the reminder.
            let applied = store.replace_existing(reminder, now).is_some();
            (applied, before)
        }
        (RealtimeAction::Delete, _) => match store.remove_by_id(&reminder_id, now) {
            Some(removed) if removed.status == ReminderStatus::Active => (true, before.saturating_sub(1)),
            Some(_) => (true, before),
            None => (false, before),
        },
        (_, RealtimePayload::Id(_)) => {
            tracing::warn!(reminder_id = %reminder_id, ?action, "delta without reminder body ignored");
            (false, before)
        }
    };

    let due_active_count = store.due_active_count();
    if provisional_count != due_active_count {
        tracing::debug!(
            reminder_id = %reminder_id,
            provisional_count,
            due_active_count,
            "incremental counter corrected by recompute"
        );
    }

    MergeOutcome {
        action,
        reminder_id,
        applied,
        provisional_count,
        due_active_count,
    }
}

/// Decodes raw realtime frames and forwards reminder deltas to the engine in arrival order.
pub fn spawn_realtime_pump(
    mut frames: mpsc::Receiver<Value>,
    reminder_type: String,
    engine: EngineHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            match decode_realtime_message(&frame, &reminder_type) {
                Ok(Some(message)) => {
                    if engine.apply_delta(message).await.is_err() {
                        tracing::info!("engine stopped, realtime pump exiting");
                        return;
                    }
                }
                Ok(None) => {}
                Err(error) => tracing::warn!(%error, "discarding malformed realtime frame"),
            }
        }
        tracing::info!("realtime channel closed");
    })
}
