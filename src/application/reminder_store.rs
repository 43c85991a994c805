use crate::domain::models::Reminder;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Canonical reminder collection plus the derived due-and-active counter.
///
/// Every mutation recomputes `diff_ms` for all members and the counter, then publishes both
/// before returning, so subscribers never see a half-applied change.
#[derive(Debug)]
pub struct ReminderStore {
    reminders: Vec<Reminder>,
    due_active_count: usize,
    generation: u64,
    reminders_tx: watch::Sender<Vec<Reminder>>,
    counter_tx: watch::Sender<usize>,
}

impl ReminderStore {
    pub fn new() -> Self {
        let (reminders_tx, _) = watch::channel(Vec::new());
        let (counter_tx, _) = watch::channel(0);
        Self {
            reminders: Vec::new(),
            due_active_count: 0,
            generation: 0,
            reminders_tx,
            counter_tx,
        }
    }

    pub fn subscribe_reminders(&self) -> watch::Receiver<Vec<Reminder>> {
        self.reminders_tx.subscribe()
    }

    pub fn subscribe_counter(&self) -> watch::Receiver<usize> {
        self.counter_tx.subscribe()
    }

    pub fn all(&self) -> &[Reminder] {
        &self.reminders
    }

    pub fn get(&self, id: &str) -> Option<&Reminder> {
        self.reminders.iter().find(|reminder| reminder.id == id)
    }

    pub fn due_active_count(&self) -> usize {
        self.due_active_count
    }

    /// Bumped on every commit; used to discard results computed against an older state.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn replace_all(&mut self, reminders: Vec<Reminder>, now: DateTime<Utc>) {
        self.reminders = reminders;
        self.commit(now);
    }

    /// Replaces the member with the same id in place, or appends. Returns the previous value.
    pub fn upsert(&mut self, reminder: Reminder, now: DateTime<Utc>) -> Option<Reminder> {
        let previous = match self.reminders.iter_mut().find(|existing| existing.id == reminder.id) {
            Some(existing) => Some(std::mem::replace(existing, reminder)),
            None => {
                self.reminders.push(reminder);
                None
            }
        };
        self.commit(now);
        previous
    }

    /// Replaces an existing member only; unknown ids leave the store untouched.
    pub fn replace_existing(&mut self, reminder: Reminder, now: DateTime<Utc>) -> Option<Reminder> {
        let existing = self
            .reminders
            .iter_mut()
            .find(|existing| existing.id == reminder.id)?;
        let previous = std::mem::replace(existing, reminder);
        self.commit(now);
        Some(previous)
    }

    pub fn remove_by_id(&mut self, id: &str, now: DateTime<Utc>) -> Option<Reminder> {
        let removed = self
            .reminders
            .iter()
            .position(|reminder| reminder.id == id)
            .map(|index| self.reminders.remove(index));
        self.commit(now);
        removed
    }

    /// Recomputes derived fields without changing membership (time moved on).
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.commit(now);
    }

    /// Counter from the remote source of truth; valid until the next commit.
    pub fn set_remote_count(&mut self, count: usize) {
        if count != self.due_active_count {
            tracing::debug!(local = self.due_active_count, remote = count, "due counter reconciled from remote");
        }
        self.due_active_count = count;
        self.counter_tx.send_replace(count);
    }

    fn commit(&mut self, now: DateTime<Utc>) {
        for reminder in &mut self.reminders {
            reminder.refresh_diff(now);
        }
        self.due_active_count = count_due_active(&self.reminders, now);
        self.generation += 1;
        self.reminders_tx.send_replace(self.reminders.clone());
        self.counter_tx.send_replace(self.due_active_count);
    }
}

impl Default for ReminderStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn count_due_active(reminders: &[Reminder], now: DateTime<Utc>) -> usize {
    reminders
        .iter()
        .filter(|reminder| reminder.is_due_active_at(now))
        .count()
}
