use super::{
    Listener, ListenerKind, ListenerSet, NotificationBackend, ReminderNotification, Subscription,
    TriggerId, TriggerTable,
};
use crate::clock::{Clock, SystemClock};
use crate::error::AppResult;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const TRIGGERS_FILE_NAME: &str = "notification_triggers.json";

#[derive(Default)]
struct Shared {
    listeners: ListenerSet,
    initialized: bool,
}

/// Backend whose trigger table lives in a JSON file, so triggers
/// registered by one run of the host fire in a later one.
#[derive(Clone)]
pub struct FileBackend {
    path: PathBuf,
    clock: Rc<dyn Clock>,
    shared: Rc<RefCell<Shared>>,
}

impl FileBackend {
    /// Backend storing its table in `data_dir`
    pub fn new(data_dir: &Path) -> Self {
        Self::with_clock(data_dir, SystemClock)
    }

    pub fn with_clock(data_dir: &Path, clock: impl Clock + 'static) -> Self {
        Self {
            path: data_dir.join(TRIGGERS_FILE_NAME),
            clock: Rc::new(clock),
            shared: Rc::new(RefCell::new(Shared::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the trigger table. Missing or unreadable files yield an empty table.
    pub fn load_table(&self) -> TriggerTable {
        if !self.path.exists() {
            return TriggerTable::default();
        }
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read trigger table");
                return TriggerTable::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Discarding corrupt trigger table");
            TriggerTable::default()
        })
    }

    fn save_table(&self, table: &TriggerTable) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(table)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Fire every trigger due now, persist the advanced table, then notify
    /// foreground listeners. Returns how many fired.
    pub fn deliver_due(&self) -> AppResult<usize> {
        let mut table = self.load_table();
        let fired = table.take_due(self.clock.now());
        if fired.is_empty() {
            return Ok(0);
        }
        self.save_table(&table)?;

        let shared = self.shared.borrow();
        for payload in &fired {
            shared.listeners.emit(ListenerKind::Received, payload);
        }
        Ok(fired.len())
    }
}

impl NotificationBackend for FileBackend {
    fn initialize(&mut self) -> AppResult<()> {
        let mut shared = self.shared.borrow_mut();
        if !shared.initialized {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            shared.initialized = true;
        }
        Ok(())
    }

    fn schedule_reminder(&mut self, notification: ReminderNotification) -> AppResult<String> {
        self.initialize()?;
        let mut table = self.load_table();
        let key = table.register(notification, self.clock.now());
        self.save_table(&table)?;
        Ok(key)
    }

    fn cancel_reminder(&mut self, trigger_id: &TriggerId) -> AppResult<()> {
        let mut table = self.load_table();
        if table.cancel(trigger_id) {
            self.save_table(&table)?;
            tracing::debug!(%trigger_id, "Cancelled reminder");
        }
        Ok(())
    }

    fn cancel_all_reminders(&mut self) -> AppResult<()> {
        self.save_table(&TriggerTable::default())
    }

    fn scheduled_reminders(&self) -> Vec<ReminderNotification> {
        self.load_table().notifications()
    }

    fn add_notification_received_listener(&mut self, listener: Listener) -> Subscription {
        self.shared
            .borrow_mut()
            .listeners
            .add(ListenerKind::Received, listener)
    }

    fn add_notification_response_received_listener(&mut self, listener: Listener) -> Subscription {
        self.shared
            .borrow_mut()
            .listeners
            .add(ListenerKind::Response, listener)
    }

    fn remove_listener(&mut self, subscription: Subscription) {
        self.shared.borrow_mut().listeners.remove(subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notification::{MedicationDetails, NotificationPayload};
    use chrono::{Duration, TimeZone, Utc};
    use std::cell::Cell;
    use tempfile::TempDir;

    fn details() -> MedicationDetails {
        MedicationDetails {
            medicine_id: "cet".to_string(),
            medicine_name: "Cetirizine".to_string(),
            dosage: "1 tablet".to_string(),
        }
    }

    #[test]
    fn test_missing_file_is_empty_table() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(backend.load_table().is_empty());
        assert!(backend.scheduled_reminders().is_empty());
    }

    #[test]
    fn test_registrations_survive_new_instance() {
        let dir = TempDir::new().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap();
        let mut backend = FileBackend::with_clock(dir.path(), ManualClock::new(start));
        backend
            .schedule_reminder(ReminderNotification::persistent(&details(), "cet_1", start))
            .unwrap();

        let reopened = FileBackend::new(dir.path());
        let scheduled = reopened.scheduled_reminders();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, TriggerId::persistent("cet_1"));
    }

    #[test]
    fn test_corrupt_file_is_discarded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(TRIGGERS_FILE_NAME), "{ not json").unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(backend.load_table().is_empty());
    }

    #[test]
    fn test_deliver_due_emits_and_persists() {
        let dir = TempDir::new().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let mut backend = FileBackend::with_clock(dir.path(), clock.clone());
        let count = Rc::new(Cell::new(0));

        let seen = Rc::clone(&count);
        backend.add_notification_received_listener(Box::new(move |_: &NotificationPayload| seen.set(seen.get() + 1)));
        backend
            .schedule_reminder(ReminderNotification::snooze(
                &details(),
                "cet_1",
                start,
                Duration::minutes(5),
            ))
            .unwrap();

        assert_eq!(backend.deliver_due().unwrap(), 0);
        clock.advance(Duration::minutes(5));
        assert_eq!(backend.deliver_due().unwrap(), 1);
        assert_eq!(count.get(), 1);
        assert!(FileBackend::new(dir.path()).load_table().is_empty());
    }

    #[test]
    fn test_cancel_all_clears_file() {
        let dir = TempDir::new().unwrap();
        let mut backend = FileBackend::new(dir.path());
        backend
            .schedule_reminder(ReminderNotification::persistent(&details(), "cet_1", Utc::now()))
            .unwrap();
        backend.cancel_all_reminders().unwrap();
        assert!(backend.scheduled_reminders().is_empty());
        backend.cancel_reminder(&TriggerId::base("cet_1")).unwrap();
    }
}
