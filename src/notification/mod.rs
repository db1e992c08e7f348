//! Boundary to the platform's local-notification service.
//!
//! The scheduler only talks to [`NotificationBackend`]. Two backends ship
//! with the crate: [`MemoryBackend`] keeps its trigger table in process and
//! [`FileBackend`] persists it as JSON so a headless host can fire triggers
//! across runs.

mod file;
mod memory;
mod table;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use table::{ScheduledTrigger, TriggerTable};

use crate::config::{
    NOTIFICATION_CHANNEL, NOTIFICATION_TITLE, PERSISTENT_REPEAT_SECS, SNOOZED_NOTIFICATION_TITLE,
};
use crate::error::AppResult;
use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which registration of a schedule a trigger belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "timestampMs", rename_all = "lowercase")]
pub enum TriggerKind {
    /// The regular dose trigger
    Base,
    /// Five-minute escalation while a dose is overdue
    Persistent,
    /// One-shot snooze, keyed by the time the snooze was requested
    Snooze(i64),
}

/// Structured trigger identifier carried in every notification payload.
///
/// The string form is only a registration key for the backend and is never
/// parsed back into a schedule id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerId {
    pub base_id: String,
    pub kind: TriggerKind,
}

impl TriggerId {
    pub fn base<S: Into<String>>(schedule_id: S) -> Self {
        Self {
            base_id: schedule_id.into(),
            kind: TriggerKind::Base,
        }
    }

    pub fn persistent<S: Into<String>>(schedule_id: S) -> Self {
        Self {
            base_id: schedule_id.into(),
            kind: TriggerKind::Persistent,
        }
    }

    pub fn snooze<S: Into<String>>(schedule_id: S, requested_at: DateTime<Utc>) -> Self {
        Self {
            base_id: schedule_id.into(),
            kind: TriggerKind::Snooze(requested_at.timestamp_millis()),
        }
    }

    pub fn reminder_type(&self) -> ReminderType {
        match self.kind {
            TriggerKind::Base => ReminderType::Initial,
            TriggerKind::Persistent => ReminderType::Persistent,
            TriggerKind::Snooze(_) => ReminderType::Snooze,
        }
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TriggerKind::Base => write!(f, "{}", self.base_id),
            TriggerKind::Persistent => write!(f, "{}_persistent", self.base_id),
            TriggerKind::Snooze(ts) => write!(f, "{}_snooze_{}", self.base_id, ts),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderType {
    Initial,
    Persistent,
    Snooze,
}

/// When the backend should fire a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Trigger {
    /// Every day at a local wall-clock time
    Daily { hour: u32, minute: u32 },
    /// Every `seconds` after registration
    Interval { seconds: u64, repeats: bool },
    /// Once, at a fixed instant
    Date { at: DateTime<Utc> },
}

impl Trigger {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Trigger::Daily {
            hour: hour.min(23),
            minute: minute.min(59),
        }
    }

    pub fn interval(seconds: u64) -> Self {
        Trigger::Interval {
            seconds: seconds.max(1),
            repeats: true,
        }
    }

    pub fn date(at: DateTime<Utc>) -> Self {
        Trigger::Date { at }
    }

    pub fn repeats(&self) -> bool {
        match self {
            Trigger::Daily { .. } => true,
            Trigger::Interval { repeats, .. } => *repeats,
            Trigger::Date { .. } => false,
        }
    }

    /// First fire time for a trigger registered at `registered_at`
    pub fn first_fire(&self, registered_at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Trigger::Daily { hour, minute } => next_daily(*hour, *minute, registered_at),
            Trigger::Interval { seconds, .. } => registered_at + secs(*seconds),
            Trigger::Date { at } => *at,
        }
    }

    /// First fire strictly after `now` following a fire at `fired_at`.
    /// `None` for one-shot triggers.
    pub fn next_fire(&self, fired_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Daily { hour, minute } => Some(next_daily(*hour, *minute, now.max(fired_at))),
            Trigger::Interval {
                seconds,
                repeats: true,
            } => {
                let period = (*seconds).max(1) as i64;
                let behind = (now - fired_at).num_seconds().max(0);
                let periods = behind / period + 1;
                Some(fired_at + Duration::seconds(period * periods))
            }
            Trigger::Interval { repeats: false, .. } | Trigger::Date { .. } => None,
        }
    }
}

fn secs(seconds: u64) -> Duration {
    Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX / 1000))
}

fn next_daily(hour: u32, minute: u32, after: DateTime<Utc>) -> DateTime<Utc> {
    let Some(time) = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0) else {
        return after + Duration::days(1);
    };
    let mut date = after.with_timezone(&Local).date_naive();
    // A DST gap can swallow the wall-clock time for one day
    for _ in 0..3 {
        if let Some(candidate) = date.and_time(time).and_local_timezone(Local).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > after {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    after + Duration::days(1)
}

/// Data delivered back to listeners when a notification fires or is tapped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub reminder_id: TriggerId,
    pub medicine_id: String,
    pub medicine_name: String,
    pub dosage: String,
    pub time: DateTime<Utc>,
    pub reminder_type: ReminderType,
}

/// Medication fields shared by every notification built for a schedule
#[derive(Debug, Clone, PartialEq)]
pub struct MedicationDetails {
    pub medicine_id: String,
    pub medicine_name: String,
    pub dosage: String,
}

/// Content plus trigger handed to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderNotification {
    pub id: TriggerId,
    pub title: String,
    pub body: String,
    pub channel: String,
    pub data: NotificationPayload,
    pub trigger: Trigger,
}

impl ReminderNotification {
    fn build(
        id: TriggerId,
        title: &str,
        details: &MedicationDetails,
        time: DateTime<Utc>,
        trigger: Trigger,
    ) -> Self {
        Self {
            title: title.to_string(),
            body: format!(
                "Time to take {} of {}",
                details.dosage, details.medicine_name
            ),
            channel: NOTIFICATION_CHANNEL.to_string(),
            data: NotificationPayload {
                reminder_id: id.clone(),
                medicine_id: details.medicine_id.clone(),
                medicine_name: details.medicine_name.clone(),
                dosage: details.dosage.clone(),
                time,
                reminder_type: id.reminder_type(),
            },
            id,
            trigger,
        }
    }

    /// Regular dose reminder for `schedule_id`
    pub fn reminder(
        details: &MedicationDetails,
        schedule_id: &str,
        time: DateTime<Utc>,
        trigger: Trigger,
    ) -> Self {
        Self::build(
            TriggerId::base(schedule_id),
            NOTIFICATION_TITLE,
            details,
            time,
            trigger,
        )
    }

    /// Escalation reminder repeating every five minutes until acknowledged
    pub fn persistent(details: &MedicationDetails, schedule_id: &str, now: DateTime<Utc>) -> Self {
        Self::build(
            TriggerId::persistent(schedule_id),
            NOTIFICATION_TITLE,
            details,
            now,
            Trigger::interval(PERSISTENT_REPEAT_SECS),
        )
    }

    /// One-shot reminder `delay` after `now`
    pub fn snooze(
        details: &MedicationDetails,
        schedule_id: &str,
        now: DateTime<Utc>,
        delay: Duration,
    ) -> Self {
        let at = now + delay;
        Self::build(
            TriggerId::snooze(schedule_id, now),
            SNOOZED_NOTIFICATION_TITLE,
            details,
            at,
            Trigger::date(at),
        )
    }
}

/// Callback invoked by the backend. Listeners must not call back into the
/// backend; queue an event instead.
pub type Listener = Box<dyn Fn(&NotificationPayload)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// Delivered while the app is in the foreground
    Received,
    /// The user tapped the notification
    Response,
}

/// Registered listeners, shared by the bundled backends
#[derive(Default)]
pub struct ListenerSet {
    next_id: u64,
    entries: Vec<(Subscription, ListenerKind, Listener)>,
}

impl ListenerSet {
    pub fn add(&mut self, kind: ListenerKind, listener: Listener) -> Subscription {
        self.next_id += 1;
        let subscription = Subscription(self.next_id);
        self.entries.push((subscription, kind, listener));
        subscription
    }

    pub fn remove(&mut self, subscription: Subscription) {
        self.entries.retain(|(s, _, _)| *s != subscription);
    }

    pub fn emit(&self, kind: ListenerKind, payload: &NotificationPayload) {
        for (_, k, listener) in &self.entries {
            if *k == kind {
                listener(payload);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Capability the scheduler needs from the platform notification service
pub trait NotificationBackend {
    /// Acquire delivery permission. Idempotent; fails when permission is denied.
    fn initialize(&mut self) -> AppResult<()>;

    /// Register content and trigger, returning the backend's key for it.
    /// Registering an id that is already present replaces it.
    fn schedule_reminder(&mut self, notification: ReminderNotification) -> AppResult<String>;

    /// Cancel a registration. No-op when nothing matches.
    fn cancel_reminder(&mut self, trigger_id: &TriggerId) -> AppResult<()>;

    fn cancel_all_reminders(&mut self) -> AppResult<()>;

    fn scheduled_reminders(&self) -> Vec<ReminderNotification>;

    fn add_notification_received_listener(&mut self, listener: Listener) -> Subscription;

    fn add_notification_response_received_listener(&mut self, listener: Listener) -> Subscription;

    fn remove_listener(&mut self, subscription: Subscription);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn details() -> MedicationDetails {
        MedicationDetails {
            medicine_id: "amox".to_string(),
            medicine_name: "Amoxicillin".to_string(),
            dosage: "1 capsule".to_string(),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_trigger_id_keys() {
        let now = Utc.timestamp_millis_opt(1_715_331_600_000).unwrap();
        assert_eq!(TriggerId::base("amox_1").to_string(), "amox_1");
        assert_eq!(TriggerId::persistent("amox_1").to_string(), "amox_1_persistent");
        assert_eq!(
            TriggerId::snooze("amox_1", now).to_string(),
            "amox_1_snooze_1715331600000"
        );
    }

    #[test]
    fn test_base_id_survives_names_with_suffix_text() {
        // An item id that itself contains "_snooze_" stays intact
        let id = TriggerId::persistent("vit_snooze_d_17");
        let json = serde_json::to_string(&id).unwrap();
        let back: TriggerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.base_id, "vit_snooze_d_17");
        assert_eq!(back.kind, TriggerKind::Persistent);
    }

    #[test]
    fn test_persistent_notification_repeats_every_five_minutes() {
        let n = ReminderNotification::persistent(&details(), "amox_1", at(9, 0));
        assert_eq!(
            n.trigger,
            Trigger::Interval {
                seconds: 300,
                repeats: true
            }
        );
        assert_eq!(n.data.reminder_type, ReminderType::Persistent);
        assert_eq!(n.body, "Time to take 1 capsule of Amoxicillin");
    }

    #[test]
    fn test_snooze_notification_fires_once_after_delay() {
        let n = ReminderNotification::snooze(&details(), "amox_1", at(9, 0), Duration::minutes(15));
        assert_eq!(n.trigger, Trigger::date(at(9, 15)));
        assert_eq!(n.title, "Medication Reminder (Snoozed)");
        assert!(matches!(n.id.kind, TriggerKind::Snooze(_)));
        assert!(!n.trigger.repeats());
    }

    #[test]
    fn test_interval_next_fire_skips_missed_periods() {
        let trigger = Trigger::interval(300);
        let fired = at(9, 0);
        assert_eq!(trigger.next_fire(fired, at(9, 0)), Some(at(9, 5)));
        assert_eq!(trigger.next_fire(fired, at(9, 12)), Some(at(9, 15)));
        assert_eq!(Trigger::date(fired).next_fire(fired, fired), None);
    }

    #[test]
    fn test_daily_first_fire_is_in_the_future() {
        let registered = at(9, 0);
        let first = Trigger::daily(8, 30).first_fire(registered);
        assert!(first > registered);
        assert!(first <= registered + Duration::days(1) + Duration::hours(2));
    }

    #[test]
    fn test_listener_set_routes_by_kind() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = ListenerSet::default();

        let sink = Rc::clone(&seen);
        let sub = listeners.add(
            ListenerKind::Response,
            Box::new(move |p: &NotificationPayload| sink.borrow_mut().push(p.reminder_id.clone())),
        );

        let payload = ReminderNotification::reminder(&details(), "amox_1", at(9, 0), Trigger::date(at(9, 0))).data;
        listeners.emit(ListenerKind::Received, &payload);
        assert!(seen.borrow().is_empty());

        listeners.emit(ListenerKind::Response, &payload);
        assert_eq!(seen.borrow().len(), 1);

        listeners.remove(sub);
        listeners.emit(ListenerKind::Response, &payload);
        assert_eq!(seen.borrow().len(), 1);
        assert!(listeners.is_empty());
    }
}
