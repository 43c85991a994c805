use crate::domain::models::{GroupStatus, Reminder, ReminderFilter, ReminderGroup, ReminderStatus};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub const GROUP_ORDER: [GroupStatus; 3] = [GroupStatus::Due, GroupStatus::Upcoming, GroupStatus::Cleared];

/// Reminder ids per group, in `GROUP_ORDER`.
pub type GroupSnapshot = [Vec<String>; 3];

/// Partitions `reminders` into `[Due, Upcoming, Cleared]` against a single `now`.
pub fn group_reminders(
    reminders: &[Reminder],
    filter: Option<&ReminderFilter>,
    now: DateTime<Utc>,
) -> [ReminderGroup; 3] {
    let mut due = ReminderGroup::empty(GroupStatus::Due);
    let mut upcoming = ReminderGroup::empty(GroupStatus::Upcoming);
    let mut cleared = ReminderGroup::empty(GroupStatus::Cleared);

    for reminder in reminders {
        let group = if reminder.status == ReminderStatus::Cleared {
            &mut cleared
        } else if reminder.is_due_at(now) {
            &mut due
        } else {
            &mut upcoming
        };
        group.reminders.push(reminder.clone());
        group.count += 1;
    }

    due.reminders.sort_by_key(|reminder| reminder.time);
    due.reminders.reverse();
    upcoming.reminders.sort_by_key(|reminder| reminder.time);
    cleared.reminders.sort_by_key(|reminder| reminder.last_updated);
    cleared.reminders.reverse();

    let mut groups = [due, upcoming, cleared];
    if let Some(filter) = filter {
        for group in &mut groups {
            apply_filter(group, filter);
        }
    }
    groups
}

fn apply_filter(group: &mut ReminderGroup, filter: &ReminderFilter) {
    group.reminders.retain(|reminder| filter.matches(reminder));
    group.total = Some(group.count);
    group.count = group.reminders.len();
}

pub fn snapshot_ids(groups: &[ReminderGroup; 3]) -> GroupSnapshot {
    groups
        .clone()
        .map(|group| group.reminders.into_iter().map(|reminder| reminder.id).collect())
}

/// Ids that were not in the same group in `previous`, per group.
pub fn changed_ids(previous: &GroupSnapshot, groups: &[ReminderGroup; 3]) -> GroupSnapshot {
    let mut changed: GroupSnapshot = Default::default();
    for (index, group) in groups.iter().enumerate() {
        let known: HashSet<&str> = previous[index].iter().map(String::as_str).collect();
        changed[index] = group
            .reminders
            .iter()
            .filter(|reminder| !known.contains(reminder.id.as_str()))
            .map(|reminder| reminder.id.clone())
            .collect();
    }
    changed
}
