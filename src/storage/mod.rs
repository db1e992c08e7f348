mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use crate::config::{FLAGS_KEY_PREFIX, SCHEDULES_KEY_PREFIX};
use crate::error::AppResult;
use crate::reminder::ReminderSchedule;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Toggle flag per item id
pub type ReminderFlags = BTreeMap<String, bool>;

/// String key/value persistence, the shape of a mobile key-value store
pub trait KeyValueStore {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> AppResult<()>;
}

pub fn schedules_key(order_id: &str) -> String {
    format!("{}{}", SCHEDULES_KEY_PREFIX, order_id)
}

pub fn flags_key(order_id: &str) -> String {
    format!("{}{}", FLAGS_KEY_PREFIX, order_id)
}

/// Per-order schedule lists and toggle flags on top of a key-value store.
///
/// Reads never fail: anything unreadable is logged and treated as empty.
/// Writes replace the whole value, so callers read-modify-write.
pub struct ScheduleStore {
    kv: Box<dyn KeyValueStore>,
}

impl ScheduleStore {
    pub fn new(kv: impl KeyValueStore + 'static) -> Self {
        Self { kv: Box::new(kv) }
    }

    pub fn load(&self, order_id: &str) -> Vec<ReminderSchedule> {
        self.read(&schedules_key(order_id))
    }

    pub fn save(&mut self, order_id: &str, schedules: &[ReminderSchedule]) -> AppResult<()> {
        self.write(&schedules_key(order_id), schedules)
    }

    pub fn load_flags(&self, order_id: &str) -> ReminderFlags {
        self.read(&flags_key(order_id))
    }

    pub fn save_flags(&mut self, order_id: &str, flags: &ReminderFlags) -> AppResult<()> {
        self.write(&flags_key(order_id), flags)
    }

    fn read<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let raw = match self.kv.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read stored value");
                return T::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "Ignoring undecodable stored value");
            T::default()
        })
    }

    fn write<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(key, &raw)
    }
}
