//! Application configuration constants
//!
//! Centralized configuration for the reminder core.

use crate::error::{AppError, AppResult};
use std::path::PathBuf;

pub const APP_NAME: &str = "dose-reminder";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory under the platform data dir holding stores and triggers
pub const DATA_DIR_NAME: &str = "DoseReminder";

/// Persisted key prefix for the per-order toggle flag map
pub const FLAGS_KEY_PREFIX: &str = "reminders_";

/// Persisted key prefix for the per-order schedule list
pub const SCHEDULES_KEY_PREFIX: &str = "reminder_schedules_";

/// Escalation re-fire period while a dose is unacknowledged
pub const PERSISTENT_REPEAT_SECS: u64 = 5 * 60;

/// Short and long snooze delays offered by the reminder prompt
pub const SNOOZE_SHORT_MINUTES: i64 = 5;
pub const SNOOZE_LONG_MINUTES: i64 = 15;

/// Cosmetic next-reminder offset written when a reminder is turned off
pub const TURN_OFF_NEXT_MINUTES: i64 = 5;

/// Dose text used when an order item carries no adult amount
pub const DEFAULT_DOSE_AMOUNT: &str = "1 tablet";

pub const NOTIFICATION_TITLE: &str = "Medication Reminder";
pub const SNOOZED_NOTIFICATION_TITLE: &str = "Medication Reminder (Snoozed)";

/// Android-style channel the backend files reminders under
pub const NOTIFICATION_CHANNEL: &str = "medication-reminders";

/// Get the application data directory
pub fn app_data_dir() -> AppResult<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .ok_or_else(|| AppError::storage("Failed to get local data dir"))
}

/// Log filter used when RUST_LOG is unset
pub fn default_log_filter() -> &'static str {
    "dose_reminder_lib=info,warn"
}
