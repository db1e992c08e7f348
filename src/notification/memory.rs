use super::{
    Listener, ListenerKind, ListenerSet, NotificationBackend, ReminderNotification, Subscription,
    TriggerId, TriggerTable,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{AppError, AppResult};
use std::cell::RefCell;
use std::rc::Rc;

struct Inner {
    table: TriggerTable,
    listeners: ListenerSet,
    clock: Box<dyn Clock>,
    permission_granted: bool,
    initialized: bool,
    failing: bool,
}

/// In-process backend. Clones share one trigger table, so a host can keep a
/// handle for delivering triggers after handing the backend to a scheduler.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Rc<RefCell<Inner>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl MemoryBackend {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                table: TriggerTable::default(),
                listeners: ListenerSet::default(),
                clock: Box::new(clock),
                permission_granted: true,
                initialized: false,
                failing: false,
            })),
        }
    }

    /// Simulate the user granting or revoking delivery permission
    pub fn set_permission(&self, granted: bool) {
        let mut inner = self.inner.borrow_mut();
        inner.permission_granted = granted;
        if !granted {
            inner.initialized = false;
        }
    }

    /// Make every registration fail, as an OS error would
    pub fn set_failing(&self, failing: bool) {
        self.inner.borrow_mut().failing = failing;
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.borrow().initialized
    }

    pub fn contains(&self, trigger_id: &TriggerId) -> bool {
        self.inner.borrow().table.get(trigger_id).is_some()
    }

    pub fn trigger_keys(&self) -> Vec<String> {
        self.inner
            .borrow()
            .table
            .notifications()
            .iter()
            .map(|n| n.id.to_string())
            .collect()
    }

    /// Fire every due trigger at the clock's current time and hand each
    /// payload to the foreground listeners. Returns how many fired.
    pub fn deliver_due(&self) -> usize {
        let fired = {
            let mut inner = self.inner.borrow_mut();
            let now = inner.clock.now();
            inner.table.take_due(now)
        };
        let inner = self.inner.borrow();
        for payload in &fired {
            inner.listeners.emit(ListenerKind::Received, payload);
        }
        fired.len()
    }

    /// Simulate the user tapping a registered notification
    pub fn tap(&self, trigger_id: &TriggerId) -> bool {
        let payload = match self.inner.borrow().table.get(trigger_id) {
            Some(entry) => entry.notification.data.clone(),
            None => return false,
        };
        self.inner
            .borrow()
            .listeners
            .emit(ListenerKind::Response, &payload);
        true
    }
}

impl NotificationBackend for MemoryBackend {
    fn initialize(&mut self) -> AppResult<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.initialized {
            return Ok(());
        }
        if !inner.permission_granted {
            return Err(AppError::permission(
                "Notification permission was not granted",
            ));
        }
        inner.initialized = true;
        tracing::info!("Notification backend initialized");
        Ok(())
    }

    fn schedule_reminder(&mut self, notification: ReminderNotification) -> AppResult<String> {
        self.initialize()?;
        let mut inner = self.inner.borrow_mut();
        if inner.failing {
            return Err(AppError::notification(format!(
                "Failed to register {}",
                notification.id
            )));
        }
        let now = inner.clock.now();
        Ok(inner.table.register(notification, now))
    }

    fn cancel_reminder(&mut self, trigger_id: &TriggerId) -> AppResult<()> {
        if self.inner.borrow_mut().table.cancel(trigger_id) {
            tracing::debug!(%trigger_id, "Cancelled reminder");
        }
        Ok(())
    }

    fn cancel_all_reminders(&mut self) -> AppResult<()> {
        self.inner.borrow_mut().table.clear();
        Ok(())
    }

    fn scheduled_reminders(&self) -> Vec<ReminderNotification> {
        self.inner.borrow().table.notifications()
    }

    fn add_notification_received_listener(&mut self, listener: Listener) -> Subscription {
        self.inner
            .borrow_mut()
            .listeners
            .add(ListenerKind::Received, listener)
    }

    fn add_notification_response_received_listener(&mut self, listener: Listener) -> Subscription {
        self.inner
            .borrow_mut()
            .listeners
            .add(ListenerKind::Response, listener)
    }

    fn remove_listener(&mut self, subscription: Subscription) {
        self.inner.borrow_mut().listeners.remove(subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notification::{MedicationDetails, NotificationPayload, Trigger};
    use chrono::{Duration, TimeZone, Utc};
    use std::cell::Cell;

    fn details() -> MedicationDetails {
        MedicationDetails {
            medicine_id: "amox".to_string(),
            medicine_name: "Amoxicillin".to_string(),
            dosage: "1 capsule".to_string(),
        }
    }

    #[test]
    fn test_denied_permission_fails_loudly() {
        let mut backend = MemoryBackend::default();
        backend.set_permission(false);

        let err = backend.initialize().unwrap_err();
        assert!(matches!(err, AppError::Permission(_)));

        let n = ReminderNotification::persistent(&details(), "amox_1", Utc::now());
        assert!(backend.schedule_reminder(n).is_err());
        assert!(backend.scheduled_reminders().is_empty());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut backend = MemoryBackend::default();
        backend.initialize().unwrap();
        backend.initialize().unwrap();
        assert!(backend.is_initialized());
    }

    #[test]
    fn test_deliver_due_notifies_foreground_listeners() {
        let start = Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let mut backend = MemoryBackend::new(clock.clone());
        let count = Rc::new(Cell::new(0));

        let seen = Rc::clone(&count);
        backend.add_notification_received_listener(Box::new(move |_: &NotificationPayload| seen.set(seen.get() + 1)));
        backend
            .schedule_reminder(ReminderNotification::reminder(
                &details(),
                "amox_1",
                start,
                Trigger::date(start + Duration::hours(12)),
            ))
            .unwrap();

        assert_eq!(backend.deliver_due(), 0);
        clock.advance(Duration::hours(12));
        assert_eq!(backend.deliver_due(), 1);
        assert_eq!(count.get(), 1);
        assert!(!backend.contains(&TriggerId::base("amox_1")));
    }

    #[test]
    fn test_tap_reaches_response_listeners_only() {
        let mut backend = MemoryBackend::default();
        let taps = Rc::new(Cell::new(0));
        let received = Rc::new(Cell::new(0));

        let t = Rc::clone(&taps);
        backend.add_notification_response_received_listener(Box::new(move |_: &NotificationPayload| t.set(t.get() + 1)));
        let r = Rc::clone(&received);
        backend.add_notification_received_listener(Box::new(move |_: &NotificationPayload| r.set(r.get() + 1)));

        let n = ReminderNotification::persistent(&details(), "amox_1", Utc::now());
        let id = n.id.clone();
        backend.schedule_reminder(n).unwrap();

        assert!(backend.tap(&id));
        assert!(!backend.tap(&TriggerId::base("missing")));
        assert_eq!(taps.get(), 1);
        assert_eq!(received.get(), 0);
    }

    #[test]
    fn test_failing_backend_reports_notification_error() {
        let mut backend = MemoryBackend::default();
        backend.set_failing(true);
        let n = ReminderNotification::persistent(&details(), "amox_1", Utc::now());
        let err = backend.schedule_reminder(n).unwrap_err();
        assert!(matches!(err, AppError::Notification(_)));
    }
}
