use crate::dosage::calculate_interval_ms;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reminder schedule for one medication of one order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSchedule {
    pub id: String,
    pub item_id: String,
    pub item_name: String,
    pub order_id: String,
    pub frequency: String,
    #[serde(default)]
    pub interval: String,
    pub duration: f64, // days
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_reminder: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub last_taken: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_count: u32,
    pub max_reminders: u32,
}

impl ReminderSchedule {
    pub fn interval_ms(&self) -> u64 {
        calculate_interval_ms(&self.frequency, &self.interval)
    }

    pub fn has_custom_interval(&self) -> bool {
        !self.interval.trim().is_empty()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_reminder <= now
    }

    pub fn is_complete(&self) -> bool {
        self.reminder_count >= self.max_reminders
    }

    pub fn progress(&self, now: DateTime<Utc>) -> DoseProgress {
        let percent = if self.max_reminders == 0 {
            100.0
        } else {
            f64::from(self.reminder_count) / f64::from(self.max_reminders) * 100.0
        };
        DoseProgress {
            taken: self.reminder_count,
            total: self.max_reminders,
            percent,
            next_due: self.next_reminder,
            overdue: self.is_overdue(now),
            last_taken: self.last_taken,
        }
    }
}

/// Where a schedule sits in the reminder state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderState {
    /// Inactive, nothing registered
    Idle,
    /// A trigger is registered for `next_reminder`
    Armed,
    /// The prompt is on screen, escalation may be running
    Firing,
}

/// Progress read model for one active reminder
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoseProgress {
    pub taken: u32,
    pub total: u32,
    pub percent: f64,
    pub next_due: DateTime<Utc>,
    pub overdue: bool,
    pub last_taken: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSummary {
    pub active: usize,
    pub total: usize,
}
