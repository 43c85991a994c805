use crate::domain::models::{Reminder, ReminderStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedTimer {
    pub reminder_id: String,
    pub due_at: DateTime<Utc>,
    pub delay: Duration,
    pub deadline: Instant,
}

/// Holds at most one armed timer. The engine loop sleeps until `deadline()`.
#[derive(Debug, Default)]
pub struct ScheduleController {
    armed: Option<ArmedTimer>,
}

impl ScheduleController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the current timer and arms one for the next future reminder, if any.
    pub fn rearm(&mut self, reminders: &[Reminder], now: DateTime<Utc>) -> Option<&ArmedTimer> {
        self.armed = next_due_reminder(reminders, now).map(|reminder| {
            let delay = (reminder.time - now).to_std().unwrap_or(Duration::ZERO);
            ArmedTimer {
                reminder_id: reminder.id.clone(),
                due_at: reminder.time,
                delay,
                deadline: Instant::now() + delay,
            }
        });

        match &self.armed {
            Some(timer) => tracing::debug!(
                reminder_id = %timer.reminder_id,
                delay_ms = timer.delay.as_millis() as u64,
                "reminder timer armed"
            ),
            None => tracing::debug!("no upcoming reminder, scheduler idle"),
        }
        self.armed.as_ref()
    }

    pub fn armed(&self) -> Option<&ArmedTimer> {
        self.armed.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|timer| timer.deadline)
    }

    /// Disarms and returns the timer that just fired.
    pub fn take_fired(&mut self) -> Option<ArmedTimer> {
        self.armed.take()
    }
}

/// Non-cleared reminder with the smallest `time > now`; equal instants resolve to the smallest id.
pub fn next_due_reminder(reminders: &[Reminder], now: DateTime<Utc>) -> Option<&Reminder> {
    reminders
        .iter()
        .filter(|reminder| reminder.status != ReminderStatus::Cleared && reminder.time > now)
        .min_by(|left, right| {
            left.time
                .cmp(&right.time)
                .then_with(|| left.id.cmp(&right.id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SourceRef;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T12:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn reminder(id: &str, status: ReminderStatus, offset_seconds: i64) -> Reminder {
        Reminder {
            id: id.to_string(),
            source: SourceRef {
                id: "dev-1".to_string(),
                name: "Device 1".to_string(),
            },
            reminder_type: None,
            text: "check".to_string(),
            time: fixed_now() + chrono::Duration::seconds(offset_seconds),
            status,
            is_group: false,
            is_cleared: status == ReminderStatus::Cleared,
            last_updated: None,
            diff_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn arms_for_nearest_reminder_then_the_next_one() {
        let reminders = vec![
            reminder("b", ReminderStatus::Active, 30),
            reminder("a", ReminderStatus::Active, 10),
        ];
        let mut scheduler = ScheduleController::new();

        let timer = scheduler.rearm(&reminders, fixed_now()).cloned().expect("armed");
        assert_eq!(timer.reminder_id, "a");
        assert_eq!(timer.delay, Duration::from_secs(10));

        tokio::time::sleep_until(timer.deadline).await;
        let fired = scheduler.take_fired().expect("fired timer");
        assert_eq!(fired.reminder_id, "a");

        let next = scheduler
            .rearm(&reminders, fixed_now() + chrono::Duration::seconds(10))
            .expect("armed again");
        assert_eq!(next.reminder_id, "b");
        assert_eq!(next.delay, Duration::from_secs(20));
    }

    #[test]
    fn stays_idle_without_future_reminders() {
        let reminders = vec![
            reminder("past", ReminderStatus::Active, -10),
            reminder("now", ReminderStatus::Active, 0),
            reminder("gone", ReminderStatus::Cleared, 60),
        ];
        let mut scheduler = ScheduleController::new();
        assert!(scheduler.rearm(&reminders, fixed_now()).is_none());
        assert!(scheduler.deadline().is_none());
    }

    #[test]
    fn equal_instants_resolve_to_smallest_id() {
        let reminders = vec![
            reminder("9", ReminderStatus::Acknowledged, 60),
            reminder("10", ReminderStatus::Active, 60),
            reminder("11", ReminderStatus::Active, 61),
        ];
        assert_eq!(
            next_due_reminder(&reminders, fixed_now()).map(|reminder| reminder.id.as_str()),
            Some("10")
        );
    }

    #[test]
    fn rearm_replaces_previous_timer() {
        let mut scheduler = ScheduleController::new();
        scheduler.rearm(&[reminder("1", ReminderStatus::Active, 60)], fixed_now());
        scheduler.rearm(&[reminder("2", ReminderStatus::Active, 5)], fixed_now());
        assert_eq!(scheduler.armed().map(|timer| timer.reminder_id.as_str()), Some("2"));

        scheduler.rearm(&[], fixed_now());
        assert!(scheduler.armed().is_none());
    }
}
