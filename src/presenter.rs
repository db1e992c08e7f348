//! Boundary to whatever shows reminders to the user.

use crate::config::{NOTIFICATION_TITLE, SNOOZE_LONG_MINUTES, SNOOZE_SHORT_MINUTES};
use crate::reminder::ReminderSchedule;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

/// The four answers a reminder prompt offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReminderAction {
    Taken,
    Snooze5,
    Snooze15,
    TurnOff,
}

impl ReminderAction {
    pub const ALL: [ReminderAction; 4] = [
        ReminderAction::Taken,
        ReminderAction::Snooze5,
        ReminderAction::Snooze15,
        ReminderAction::TurnOff,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ReminderAction::Taken => "Taken",
            ReminderAction::Snooze5 => "Snooze (5 min)",
            ReminderAction::Snooze15 => "Snooze (15 min)",
            ReminderAction::TurnOff => "Turn Off",
        }
    }

    /// Delay for the snooze actions
    pub fn snooze_delay(&self) -> Option<Duration> {
        match self {
            ReminderAction::Snooze5 => Some(Duration::minutes(SNOOZE_SHORT_MINUTES)),
            ReminderAction::Snooze15 => Some(Duration::minutes(SNOOZE_LONG_MINUTES)),
            ReminderAction::Taken | ReminderAction::TurnOff => None,
        }
    }
}

impl FromStr for ReminderAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "taken" | "take" => Ok(ReminderAction::Taken),
            "snooze5" | "snooze-5" => Ok(ReminderAction::Snooze5),
            "snooze15" | "snooze-15" => Ok(ReminderAction::Snooze15),
            "turnoff" | "turn-off" | "off" => Ok(ReminderAction::TurnOff),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

/// A due-dose prompt. Must not be dismissed without picking an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPrompt {
    pub schedule_id: String,
    pub item_name: String,
    pub title: String,
    pub message: String,
    pub actions: [ReminderAction; 4],
    pub dismissible: bool,
}

impl ReminderPrompt {
    pub fn for_schedule(schedule: &ReminderSchedule) -> Self {
        Self {
            schedule_id: schedule.id.clone(),
            item_name: schedule.item_name.clone(),
            title: NOTIFICATION_TITLE.to_string(),
            message: format!("Time to take {}!", schedule.item_name),
            actions: ReminderAction::ALL,
            dismissible: false,
        }
    }
}

/// Informational and error alerts raised by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UserAlert {
    ReminderSet { item_name: String },
    ReminderRemoved { item_name: String },
    TreatmentComplete { item_name: String, duration_days: f64 },
    ReminderTurnedOff { item_name: String },
    Error { message: String },
}

impl UserAlert {
    pub fn error<S: Into<String>>(message: S) -> Self {
        UserAlert::Error {
            message: message.into(),
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            UserAlert::ReminderSet { .. } => "Reminder Set",
            UserAlert::ReminderRemoved { .. } => "Reminder Removed",
            UserAlert::TreatmentComplete { .. } => "Treatment Complete",
            UserAlert::ReminderTurnedOff { .. } => "Reminder Turned Off",
            UserAlert::Error { .. } => "Error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            UserAlert::ReminderSet { item_name } => format!(
                "Reminder set for {}. You'll receive notifications based on your dosage schedule.",
                item_name
            ),
            UserAlert::ReminderRemoved { item_name } => {
                format!("Reminder removed for {}.", item_name)
            }
            UserAlert::TreatmentComplete {
                item_name,
                duration_days,
            } => format!(
                "You have completed your {} day treatment for {}.",
                duration_days, item_name
            ),
            UserAlert::ReminderTurnedOff { item_name } => {
                format!("Reminders for {} have been turned off.", item_name)
            }
            UserAlert::Error { message } => message.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, UserAlert::Error { .. })
    }
}

/// Shows prompts and alerts to the user
pub trait ReminderPresenter {
    fn present_reminder(&mut self, prompt: &ReminderPrompt);
    fn show_alert(&mut self, alert: &UserAlert);
}

/// Presenter that only records what it was asked to show. Clones share
/// the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    prompts: Rc<RefCell<Vec<ReminderPrompt>>>,
    alerts: Rc<RefCell<Vec<UserAlert>>>,
}

impl RecordingPresenter {
    pub fn prompts(&self) -> Vec<ReminderPrompt> {
        self.prompts.borrow().clone()
    }

    pub fn alerts(&self) -> Vec<UserAlert> {
        self.alerts.borrow().clone()
    }

    pub fn clear(&self) {
        self.prompts.borrow_mut().clear();
        self.alerts.borrow_mut().clear();
    }
}

impl ReminderPresenter for RecordingPresenter {
    fn present_reminder(&mut self, prompt: &ReminderPrompt) {
        self.prompts.borrow_mut().push(prompt.clone());
    }

    fn show_alert(&mut self, alert: &UserAlert) {
        self.alerts.borrow_mut().push(alert.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_prompt_offers_four_actions_and_is_not_dismissible() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap();
        let schedule = ReminderSchedule {
            id: "amox_1".to_string(),
            item_id: "amox".to_string(),
            item_name: "Amoxicillin".to_string(),
            order_id: "SO-1".to_string(),
            frequency: "twice daily".to_string(),
            interval: String::new(),
            duration: 5.0,
            start_date: now,
            end_date: now,
            next_reminder: now,
            is_active: true,
            last_taken: None,
            reminder_count: 0,
            max_reminders: 10,
        };

        let prompt = ReminderPrompt::for_schedule(&schedule);
        assert_eq!(prompt.actions.len(), 4);
        assert!(!prompt.dismissible);
        assert_eq!(prompt.message, "Time to take Amoxicillin!");
        assert_eq!(
            prompt.actions.map(|a| a.label()),
            ["Taken", "Snooze (5 min)", "Snooze (15 min)", "Turn Off"]
        );
    }

    #[test]
    fn test_snooze_delays() {
        assert_eq!(ReminderAction::Snooze5.snooze_delay(), Some(Duration::minutes(5)));
        assert_eq!(ReminderAction::Snooze15.snooze_delay(), Some(Duration::minutes(15)));
        assert_eq!(ReminderAction::Taken.snooze_delay(), None);
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("Taken".parse::<ReminderAction>(), Ok(ReminderAction::Taken));
        assert_eq!("off".parse::<ReminderAction>(), Ok(ReminderAction::TurnOff));
        assert!("later".parse::<ReminderAction>().is_err());
    }

    #[test]
    fn test_alert_text() {
        let alert = UserAlert::TreatmentComplete {
            item_name: "Amoxicillin".to_string(),
            duration_days: 5.0,
        };
        assert_eq!(alert.title(), "Treatment Complete");
        assert_eq!(
            alert.message(),
            "You have completed your 5 day treatment for Amoxicillin."
        );
        assert!(UserAlert::error("boom").is_error());
    }
}
