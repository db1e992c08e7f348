use super::{NotificationPayload, ReminderNotification, TriggerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered notification and when it fires next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTrigger {
    pub notification: ReminderNotification,
    pub fire_at: DateTime<Utc>,
}

/// Trigger bookkeeping as an OS alarm service would keep it, keyed by
/// [`TriggerId`]. Persisted as a plain list of entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ScheduledTrigger>", into = "Vec<ScheduledTrigger>")]
pub struct TriggerTable {
    entries: BTreeMap<TriggerId, ScheduledTrigger>,
}

impl From<Vec<ScheduledTrigger>> for TriggerTable {
    fn from(entries: Vec<ScheduledTrigger>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.notification.id.clone(), entry))
                .collect(),
        }
    }
}

impl From<TriggerTable> for Vec<ScheduledTrigger> {
    fn from(table: TriggerTable) -> Self {
        table.entries.into_values().collect()
    }
}

impl TriggerTable {
    pub fn register(&mut self, notification: ReminderNotification, now: DateTime<Utc>) -> String {
        let key = notification.id.to_string();
        let fire_at = notification.trigger.first_fire(now);
        tracing::debug!(%key, %fire_at, "Trigger registered");
        self.entries.insert(
            notification.id.clone(),
            ScheduledTrigger {
                notification,
                fire_at,
            },
        );
        key
    }

    /// Returns whether anything was removed
    pub fn cancel(&mut self, trigger_id: &TriggerId) -> bool {
        self.entries.remove(trigger_id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, trigger_id: &TriggerId) -> Option<&ScheduledTrigger> {
        self.entries.get(trigger_id)
    }

    pub fn notifications(&self) -> Vec<ReminderNotification> {
        self.entries
            .values()
            .map(|entry| entry.notification.clone())
            .collect()
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.entries.values().map(|entry| entry.fire_at).min()
    }

    /// Fire every trigger due at `now`. Repeating triggers are advanced past
    /// `now` so missed periods collapse into one delivery; one-shot triggers
    /// are dropped.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<NotificationPayload> {
        let mut fired = Vec::new();
        let mut expired = Vec::new();

        for (id, entry) in self.entries.iter_mut() {
            if entry.fire_at > now {
                continue;
            }
            fired.push((entry.fire_at, entry.notification.data.clone()));
            match entry.notification.trigger.next_fire(entry.fire_at, now) {
                Some(next) => entry.fire_at = next,
                None => expired.push(id.clone()),
            }
        }

        for id in expired {
            self.entries.remove(&id);
        }

        fired.sort_by_key(|(at, _)| *at);
        fired.into_iter().map(|(_, payload)| payload).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
