//! Turns the free-text dosage fields of an order item into reminder timing.
//!
//! Every function here is pure and total: malformed text falls back to the
//! named defaults below instead of failing.

use crate::config::DEFAULT_DOSE_AMOUNT;
use crate::reminder::ReminderSchedule;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const HOUR_MS: u64 = 60 * 60 * 1000;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Frequency assumed when neither the adult nor the child field is set
pub const DEFAULT_FREQUENCY: &str = "twice daily";

/// Treatment length assumed when neither duration field is set
pub const DEFAULT_DURATION_DAYS: f64 = 7.0;

/// Interval used when neither the custom interval nor the frequency matches
pub const DEFAULT_INTERVAL_HOURS: u64 = 12;

/// Custom intervals above one year are clamped
pub const MAX_INTERVAL_HOURS: u64 = 24 * 365;

/// Treatment lengths above ten years are clamped
pub const MAX_DURATION_DAYS: f64 = 3650.0;

/// Checked in order; the first substring found wins.
pub const FREQUENCY_INTERVAL_HOURS: [(&str, u64); 4] = [
    ("four times", 6),
    ("three times", 8),
    ("twice", 12),
    ("once", 24),
];

/// An order line as returned by the pharmacy backend. Only the dosage
/// fields matter to the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub rate: f64,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub custom_dosage_frequencyadult: Option<String>,
    #[serde(default)]
    pub custom_dosage_frequencychild: Option<String>,
    #[serde(default)]
    pub custom_dosage_amountadult: Option<String>,
    #[serde(default)]
    pub custom_dosage_amountchild: Option<String>,
    #[serde(default)]
    pub custom_dosage_durationadult: Option<String>,
    #[serde(default)]
    pub custom_dosage_durationchild: Option<String>,
    #[serde(default)]
    pub custom_dosage_notes: Option<String>,
    #[serde(default)]
    pub custom_interval: Option<String>,
}

impl OrderItem {
    pub fn new<S: Into<String>>(id: S, name: S) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adult frequency, else child frequency, else the default
    pub fn frequency(&self) -> String {
        first_present(
            &self.custom_dosage_frequencyadult,
            &self.custom_dosage_frequencychild,
        )
        .unwrap_or(DEFAULT_FREQUENCY)
        .to_string()
    }

    /// Custom interval text, empty when absent
    pub fn interval(&self) -> String {
        self.custom_interval
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    }

    /// Treatment length in days, fractions allowed. `None` when the field is
    /// not a number or not positive.
    pub fn duration_days(&self) -> Option<f64> {
        let raw = first_present(
            &self.custom_dosage_durationadult,
            &self.custom_dosage_durationchild,
        );
        let days = match raw {
            Some(text) => text.parse::<f64>().ok()?,
            None => DEFAULT_DURATION_DAYS,
        };
        (days.is_finite() && days > 0.0).then(|| days.min(MAX_DURATION_DAYS))
    }

    /// Amount shown in the notification body
    pub fn dose_amount(&self) -> &str {
        self.custom_dosage_amountadult
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_DOSE_AMOUNT)
    }

    pub fn has_dosage_info(&self) -> bool {
        [
            &self.custom_dosage_frequencyadult,
            &self.custom_dosage_frequencychild,
            &self.custom_dosage_amountadult,
            &self.custom_dosage_amountchild,
            &self.custom_dosage_durationadult,
            &self.custom_dosage_durationchild,
            &self.custom_dosage_notes,
            &self.custom_interval,
        ]
        .iter()
        .any(|field| field.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

fn first_present<'a>(primary: &'a Option<String>, secondary: &'a Option<String>) -> Option<&'a str> {
    [primary, secondary]
        .into_iter()
        .filter_map(|field| field.as_deref().map(str::trim))
        .find(|s| !s.is_empty())
}

fn interval_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(\d+)(?:\s*(?:hours|hour|hrs|hr))?").ok())
        .as_ref()
}

fn custom_interval_hours(custom_interval: &str) -> Option<u64> {
    let captures = interval_pattern()?.captures(custom_interval)?;
    let hours = captures.get(1)?.as_str().parse::<u64>().ok()?;
    (hours > 0).then(|| hours.min(MAX_INTERVAL_HOURS))
}

/// Milliseconds between doses. Always positive.
pub fn calculate_interval_ms(frequency: &str, custom_interval: &str) -> u64 {
    if !custom_interval.trim().is_empty() {
        if let Some(hours) = custom_interval_hours(custom_interval) {
            tracing::debug!(hours, custom_interval, "Custom interval parsed");
            return hours * HOUR_MS;
        }
    }

    let frequency = frequency.to_lowercase();
    let hours = FREQUENCY_INTERVAL_HOURS
        .iter()
        .find(|(needle, _)| frequency.contains(needle))
        .map(|(_, hours)| *hours)
        .unwrap_or(DEFAULT_INTERVAL_HOURS);

    hours * HOUR_MS
}

/// Milliseconds in `days`, rounded to the nearest millisecond
pub fn calculate_duration_ms(days: f64) -> u64 {
    (days.max(0.0) * DAY_MS as f64).round() as u64
}

/// Total doses expected over the treatment
pub fn max_reminders(duration_ms: u64, interval_ms: u64) -> u32 {
    let doses = duration_ms.div_ceil(interval_ms.max(1));
    u32::try_from(doses).unwrap_or(u32::MAX)
}

pub(crate) fn offset_ms(at: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    at + Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX / 2))
}

/// Build the first schedule for an order item, or `None` when the dosage
/// data cannot produce one.
pub fn create_reminder_schedule(
    item: &OrderItem,
    order_id: &str,
    now: DateTime<Utc>,
) -> Option<ReminderSchedule> {
    let frequency = item.frequency();
    let interval = item.interval();
    let duration = item.duration_days()?;

    if frequency.trim().is_empty() {
        return None;
    }

    let interval_ms = calculate_interval_ms(&frequency, &interval);
    let duration_ms = calculate_duration_ms(duration);

    tracing::info!(
        item = %item.name,
        %frequency,
        %interval,
        interval_ms,
        "Creating reminder schedule"
    );

    Some(ReminderSchedule {
        id: format!("{}_{}", item.id, now.timestamp_millis()),
        item_id: item.id.clone(),
        item_name: item.name.clone(),
        order_id: order_id.to_string(),
        frequency,
        interval,
        duration,
        start_date: now,
        end_date: offset_ms(now, duration_ms),
        next_reminder: offset_ms(now, interval_ms),
        is_active: true,
        last_taken: None,
        reminder_count: 0,
        max_reminders: max_reminders(duration_ms, interval_ms),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_interval_is_always_positive() {
        let frequencies = ["", "twice daily", "ONCE", "as needed", "0", "four times a day"];
        let intervals = ["", "8 hours", "12", "0", "0 hours", "every few hrs", "abc", "  ", "99999999999999999999999"];
        for frequency in frequencies {
            for interval in intervals {
                assert!(
                    calculate_interval_ms(frequency, interval) > 0,
                    "{frequency:?} / {interval:?}"
                );
            }
        }
    }

    #[test]
    fn test_custom_interval_parsing() {
        assert_eq!(calculate_interval_ms("", "8 hours"), 8 * 3600 * 1000);
        assert_eq!(calculate_interval_ms("", "12"), 12 * 3600 * 1000);
        assert_eq!(calculate_interval_ms("", "6 HRS"), 6 * 3600 * 1000);
        assert_eq!(calculate_interval_ms("once daily", "every 4 hr"), 4 * 3600 * 1000);
    }

    #[test]
    fn test_frequency_fallback() {
        assert_eq!(calculate_interval_ms("twice daily", ""), 12 * 3600 * 1000);
        assert_eq!(calculate_interval_ms("three times daily", ""), 8 * 3600 * 1000);
        assert_eq!(calculate_interval_ms("Four Times a day", ""), 6 * 3600 * 1000);
        assert_eq!(calculate_interval_ms("once daily", ""), 24 * 3600 * 1000);
        assert_eq!(calculate_interval_ms("when required", ""), 12 * 3600 * 1000);
    }

    #[test]
    fn test_unparseable_custom_interval_falls_through() {
        assert_eq!(calculate_interval_ms("three times daily", "as needed"), 8 * HOUR_MS);
        assert_eq!(calculate_interval_ms("once daily", "0 hours"), 24 * HOUR_MS);
    }

    #[test]
    fn test_huge_custom_interval_is_clamped() {
        assert_eq!(calculate_interval_ms("", "100000 hours"), MAX_INTERVAL_HOURS * HOUR_MS);
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(calculate_duration_ms(1.0), 86_400_000);
        assert_eq!(calculate_duration_ms(7.0), 7 * 86_400_000);
        assert_eq!(calculate_duration_ms(0.5), 12 * HOUR_MS);
    }

    #[test]
    fn test_twice_daily_five_days() {
        let mut item = OrderItem::new("amox", "Amoxicillin 500mg");
        item.custom_dosage_frequencyadult = Some("twice daily".to_string());
        item.custom_dosage_durationadult = Some("5".to_string());

        let schedule = create_reminder_schedule(&item, "SO-0001", now()).unwrap();
        assert_eq!(schedule.interval_ms(), 43_200_000);
        assert_eq!(schedule.max_reminders, 10);
        assert_eq!(schedule.id, format!("amox_{}", now().timestamp_millis()));
        assert_eq!(schedule.next_reminder, now() + Duration::hours(12));
        assert_eq!(schedule.end_date, now() + Duration::days(5));
        assert!(schedule.is_active);
        assert_eq!(schedule.reminder_count, 0);
        assert!(schedule.last_taken.is_none());
    }

    #[test]
    fn test_custom_interval_three_days() {
        let mut item = OrderItem::new("ibu", "Ibuprofen");
        item.custom_interval = Some("8 hours".to_string());
        item.custom_dosage_durationadult = Some("3".to_string());

        let schedule = create_reminder_schedule(&item, "SO-0002", now()).unwrap();
        assert_eq!(schedule.interval_ms(), 28_800_000);
        assert_eq!(schedule.max_reminders, 9);
        assert_eq!(schedule.interval, "8 hours");
    }

    #[test]
    fn test_max_reminders_rounds_up() {
        // 1 day at 7h intervals needs 4 doses
        assert_eq!(max_reminders(DAY_MS, 7 * HOUR_MS), 4);
        assert_eq!(max_reminders(DAY_MS, 24 * HOUR_MS), 1);
    }

    #[test]
    fn test_defaults_apply_without_dosage_fields() {
        let item = OrderItem::new("para", "Paracetamol");
        assert!(!item.has_dosage_info());

        let schedule = create_reminder_schedule(&item, "SO-3", now()).unwrap();
        assert_eq!(schedule.frequency, DEFAULT_FREQUENCY);
        assert_eq!(schedule.duration, DEFAULT_DURATION_DAYS);
        assert_eq!(schedule.max_reminders, 14);
    }

    #[test]
    fn test_child_fields_used_when_adult_missing() {
        let mut item = OrderItem::new("syr", "Cough Syrup");
        item.custom_dosage_frequencyadult = Some("  ".to_string());
        item.custom_dosage_frequencychild = Some("three times daily".to_string());
        item.custom_dosage_durationchild = Some("2".to_string());

        let schedule = create_reminder_schedule(&item, "SO-4", now()).unwrap();
        assert_eq!(schedule.frequency, "three times daily");
        assert_eq!(schedule.max_reminders, 6);
    }

    #[test]
    fn test_malformed_duration_yields_none() {
        let mut item = OrderItem::new("x", "X");
        item.custom_dosage_durationadult = Some("a week".to_string());
        assert!(create_reminder_schedule(&item, "SO-5", now()).is_none());

        for bad in ["0", "-3", "NaN", "inf"] {
            item.custom_dosage_durationadult = Some(bad.to_string());
            assert!(create_reminder_schedule(&item, "SO-5", now()).is_none(), "{bad}");
        }
    }

    #[test]
    fn test_fractional_duration_rounds_doses_up() {
        let mut item = OrderItem::new("amox", "Amoxicillin 500mg");
        item.custom_dosage_frequencyadult = Some("twice daily".to_string());
        item.custom_dosage_durationadult = Some("2.5".to_string());

        let schedule = create_reminder_schedule(&item, "SO-6", now()).unwrap();
        assert_eq!(schedule.duration, 2.5);
        assert_eq!(schedule.max_reminders, 5);
        assert_eq!(schedule.end_date, now() + Duration::hours(60));

        item.custom_dosage_durationadult = Some("1.5".to_string());
        let schedule = create_reminder_schedule(&item, "SO-6", now()).unwrap();
        assert_eq!(schedule.max_reminders, 3);
    }

    #[test]
    fn test_dose_amount_default() {
        let mut item = OrderItem::new("x", "X");
        assert_eq!(item.dose_amount(), "1 tablet");
        item.custom_dosage_amountadult = Some("2 capsules".to_string());
        assert_eq!(item.dose_amount(), "2 capsules");
        assert!(item.has_dosage_info());
    }

    #[test]
    fn test_order_item_deserializes_backend_fields() {
        let json = r#"{
            "id": "ITEM-1",
            "name": "Cetirizine",
            "quantity": 1,
            "rate": 2.5,
            "amount": 2.5,
            "custom_dosage_frequencyadult": "once daily",
            "custom_dosage_durationadult": "10"
        }"#;
        let item: OrderItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.frequency(), "once daily");
        assert_eq!(item.duration_days(), Some(10.0));
        assert_eq!(item.interval(), "");
    }
}
