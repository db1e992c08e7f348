//! Per-schedule reminder state machine.
//!
//! `Idle` (inactive) → `Armed` (trigger registered for `next_reminder`) →
//! `Firing` (prompt shown, escalation may be running) → back to `Armed` on
//! the next dose, or `Idle` when turned off or the course is complete.
//!
//! Every operation runs to completion before the next event is handled. The
//! in-memory schedule list is authoritative and is written back whole after
//! each mutation. Backend registration is best-effort and re-done on load.

use crate::clock::Clock;
use crate::config::{DEFAULT_DOSE_AMOUNT, TURN_OFF_NEXT_MINUTES};
use crate::dosage::{create_reminder_schedule, offset_ms, OrderItem};
use crate::error::{AppError, AppResult};
use crate::events::{AppState, ReminderEvent};
use crate::notification::{
    MedicationDetails, NotificationBackend, NotificationPayload, ReminderNotification, Trigger,
    TriggerId, TriggerKind,
};
use crate::presenter::{ReminderAction, ReminderPresenter, ReminderPrompt, UserAlert};
use crate::reminder::{DoseProgress, ReminderSchedule, ReminderState, ReminderSummary};
use crate::storage::{ReminderFlags, ScheduleStore};
use chrono::{DateTime, Duration, Local, Timelike, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

const SCHEDULE_FAILED: &str = "Failed to schedule medication reminder";
const RESCHEDULE_FAILED: &str = "Failed to reschedule reminder";

/// Collaborators the scheduler drives. Owned by the host, one per order.
pub struct ReminderContext {
    pub backend: Box<dyn NotificationBackend>,
    pub store: ScheduleStore,
    pub presenter: Box<dyn ReminderPresenter>,
    pub clock: Box<dyn Clock>,
}

impl ReminderContext {
    pub fn new(
        backend: impl NotificationBackend + 'static,
        store: ScheduleStore,
        presenter: impl ReminderPresenter + 'static,
        clock: impl Clock + 'static,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            store,
            presenter: Box::new(presenter),
            clock: Box::new(clock),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// A new schedule was created and armed
    Activated { schedule_id: String },
    /// The item's schedules were deactivated
    Deactivated,
    /// Unknown item or unusable dosage data; nothing changed
    Skipped,
}

pub struct ReminderScheduler {
    order_id: String,
    items: Vec<OrderItem>,
    schedules: Vec<ReminderSchedule>,
    flags: ReminderFlags,
    states: HashMap<String, ReminderState>,
    app_state: AppState,
    ctx: ReminderContext,
}

impl ReminderScheduler {
    /// Read the order's schedules without touching the backend
    pub fn open(ctx: ReminderContext, order_id: &str, items: Vec<OrderItem>) -> Self {
        let schedules = ctx.store.load(order_id);
        let flags = ctx.store.load_flags(order_id);
        tracing::debug!(order_id, schedules = schedules.len(), "Schedules loaded");
        Self {
            order_id: order_id.to_string(),
            items,
            schedules,
            flags,
            states: HashMap::new(),
            app_state: AppState::Active,
            ctx,
        }
    }

    /// Read the order's schedules and bring the backend in line with them
    pub fn load(ctx: ReminderContext, order_id: &str, items: Vec<OrderItem>) -> Self {
        let mut scheduler = Self::open(ctx, order_id, items);
        scheduler.reconcile();
        scheduler
    }

    /// Enforce one active schedule per item, drop triggers of inactive
    /// schedules, re-arm every active schedule and sync the flag map.
    /// A pending snooze that still covers the next dose is kept as is.
    pub fn reconcile(&mut self) {
        let mut changed = false;

        let mut newest: HashMap<String, usize> = HashMap::new();
        for (idx, schedule) in self.schedules.iter().enumerate() {
            if !schedule.is_active {
                continue;
            }
            match newest.get(&schedule.item_id) {
                Some(&kept) if self.schedules[kept].start_date > schedule.start_date => {}
                _ => {
                    newest.insert(schedule.item_id.clone(), idx);
                }
            }
        }
        for idx in 0..self.schedules.len() {
            let schedule = &mut self.schedules[idx];
            if schedule.is_active && newest.get(&schedule.item_id) != Some(&idx) {
                tracing::warn!(schedule_id = %schedule.id, "Deactivating duplicate active schedule");
                schedule.is_active = false;
                changed = true;
            }
        }

        let (cancelled, _) = self.drop_stale_triggers();
        for idx in self.active_indices() {
            self.rearm(idx);
        }
        for schedule in self.schedules.iter().filter(|s| !s.is_active) {
            self.states.insert(schedule.id.clone(), ReminderState::Idle);
        }

        let mut flags = ReminderFlags::new();
        for schedule in &self.schedules {
            *flags.entry(schedule.item_id.clone()).or_insert(false) |= schedule.is_active;
        }
        for item_id in self.flags.keys() {
            flags.entry(item_id.clone()).or_insert(false);
        }
        if flags != self.flags {
            self.flags = flags;
            changed = true;
        }

        if changed {
            self.persist();
        }
        tracing::info!(
            order_id = %self.order_id,
            active = self.summary().active,
            cancelled,
            "Reminders reconciled"
        );
    }

    /// Flip the reminder flag for an item
    pub fn toggle_reminder(&mut self, item_id: &str) -> ToggleOutcome {
        if self.flags.get(item_id).copied().unwrap_or(false) {
            self.deactivate_item(item_id);
            return ToggleOutcome::Deactivated;
        }

        let Some(item) = self.items.iter().find(|i| i.id == item_id).cloned() else {
            tracing::info!(item_id, "Toggle ignored for unknown item");
            return ToggleOutcome::Skipped;
        };
        let now = self.now();
        let Some(mut schedule) = create_reminder_schedule(&item, &self.order_id, now) else {
            tracing::warn!(item_id, "Dosage data cannot produce a schedule");
            return ToggleOutcome::Skipped;
        };

        for idx in 0..self.schedules.len() {
            if self.schedules[idx].item_id == item_id && self.schedules[idx].is_active {
                self.stop(idx);
            }
        }

        let mut stamp = now.timestamp_millis();
        while self.schedules.iter().any(|s| s.id == schedule.id) {
            stamp += 1;
            schedule.id = format!("{}_{}", item.id, stamp);
        }

        let schedule_id = schedule.id.clone();
        self.flags.insert(item.id.clone(), true);
        self.schedules.push(schedule);
        self.persist();
        self.arm(self.schedules.len() - 1);

        tracing::info!(item = %item.name, %schedule_id, "Reminder activated");
        self.ctx.presenter.show_alert(&UserAlert::ReminderSet {
            item_name: item.name,
        });
        ToggleOutcome::Activated { schedule_id }
    }

    /// Re-arm a schedule from its stored fields
    pub fn schedule_reminder(&mut self, schedule_id: &str) -> AppResult<ReminderState> {
        let idx = self.index_of(schedule_id)?;
        Ok(self.arm(idx))
    }

    /// Route a fired or tapped notification to its schedule
    pub fn handle_notification(&mut self, payload: &NotificationPayload) {
        let Some(idx) = self.resolve(payload) else {
            tracing::warn!(
                reminder_id = %payload.reminder_id,
                medicine_id = %payload.medicine_id,
                "No schedule matches notification"
            );
            return;
        };
        if !self.schedules[idx].is_active {
            tracing::info!(reminder_id = %payload.reminder_id, "Dropping trigger of inactive schedule");
            self.cancel(&payload.reminder_id);
            return;
        }
        self.present(idx);
    }

    /// Record a dose. Completes the course after the last one.
    pub fn mark_taken(&mut self, schedule_id: &str) -> AppResult<ReminderState> {
        let idx = self.index_of(schedule_id)?;
        if !self.schedules[idx].is_active {
            return Err(AppError::validation(format!(
                "Reminder {} is not active",
                schedule_id
            )));
        }

        self.cancel(&TriggerId::persistent(schedule_id));
        self.cancel_snooze(schedule_id);

        let now = self.now();
        let schedule = &mut self.schedules[idx];
        schedule.last_taken = Some(now);
        schedule.reminder_count += 1;

        if schedule.is_complete() {
            schedule.is_active = false;
            let alert = UserAlert::TreatmentComplete {
                item_name: schedule.item_name.clone(),
                duration_days: schedule.duration,
            };
            let item_id = schedule.item_id.clone();
            tracing::info!(schedule_id, doses = schedule.reminder_count, "Treatment complete");

            self.cancel(&TriggerId::base(schedule_id));
            self.flags.insert(item_id, false);
            self.states.insert(schedule_id.to_string(), ReminderState::Idle);
            self.persist();
            self.ctx.presenter.show_alert(&alert);
            return Ok(ReminderState::Idle);
        }

        schedule.next_reminder = offset_ms(now, schedule.interval_ms());
        tracing::info!(
            schedule_id,
            taken = schedule.reminder_count,
            total = schedule.max_reminders,
            "Dose taken"
        );
        self.persist();
        Ok(self.arm(idx))
    }

    /// Push the reminder back by `delay` without consuming a dose
    pub fn snooze(&mut self, schedule_id: &str, delay: Duration) -> AppResult<ReminderState> {
        let idx = self.index_of(schedule_id)?;
        if !self.schedules[idx].is_active {
            return Err(AppError::validation(format!(
                "Reminder {} is not active",
                schedule_id
            )));
        }

        self.cancel(&TriggerId::persistent(schedule_id));
        self.cancel_snooze(schedule_id);

        let now = self.now();
        self.schedules[idx].next_reminder = now + delay;
        self.persist();

        let details = self.details_for(idx);
        let notification = ReminderNotification::snooze(&details, schedule_id, now, delay);
        if let Err(e) = self.ctx.backend.schedule_reminder(notification) {
            self.backend_failed(RESCHEDULE_FAILED, &e);
        }

        tracing::info!(schedule_id, minutes = delay.num_minutes(), "Reminder snoozed");
        self.states.insert(schedule_id.to_string(), ReminderState::Armed);
        Ok(ReminderState::Armed)
    }

    /// Deactivate a schedule. Safe to repeat.
    pub fn turn_off(&mut self, schedule_id: &str) -> AppResult<ReminderState> {
        let idx = self.index_of(schedule_id)?;
        let was_active = self.schedules[idx].is_active;
        let now = self.now();

        let schedule = &mut self.schedules[idx];
        schedule.is_active = false;
        schedule.reminder_count = 0;
        schedule.next_reminder = now + Duration::minutes(TURN_OFF_NEXT_MINUTES);
        let item_id = schedule.item_id.clone();
        let item_name = schedule.item_name.clone();

        self.stop(idx);
        let still_active = self
            .schedules
            .iter()
            .any(|s| s.item_id == item_id && s.is_active);
        self.flags.insert(item_id, still_active);
        self.persist();

        if was_active {
            tracing::info!(schedule_id, "Reminder turned off");
            self.ctx
                .presenter
                .show_alert(&UserAlert::ReminderTurnedOff { item_name });
        }
        Ok(ReminderState::Idle)
    }

    /// Present every active schedule that is due. Returns how many were shown.
    pub fn check_overdue_reminders(&mut self) -> usize {
        let now = self.now();
        let due: Vec<usize> = (0..self.schedules.len())
            .filter(|&idx| self.schedules[idx].is_overdue(now))
            .collect();
        for &idx in &due {
            self.present(idx);
        }
        due.len()
    }

    pub fn handle_app_state_change(&mut self, next: AppState) {
        let previous = self.app_state;
        self.app_state = next;
        if previous != AppState::Active && next == AppState::Active {
            self.resync_backend();
            let shown = self.check_overdue_reminders();
            tracing::debug!(shown, "Foreground re-check");
        }
    }

    /// Apply one of the prompt's actions
    pub fn handle_action(
        &mut self,
        schedule_id: &str,
        action: ReminderAction,
    ) -> AppResult<ReminderState> {
        match action {
            ReminderAction::Taken => self.mark_taken(schedule_id),
            ReminderAction::Snooze5 | ReminderAction::Snooze15 => {
                let delay = action
                    .snooze_delay()
                    .ok_or_else(|| AppError::validation("Snooze action without delay"))?;
                self.snooze(schedule_id, delay)
            }
            ReminderAction::TurnOff => self.turn_off(schedule_id),
        }
    }

    pub fn handle_event(&mut self, event: ReminderEvent) -> AppResult<()> {
        match event {
            ReminderEvent::NotificationReceived(payload)
            | ReminderEvent::NotificationResponse(payload) => self.handle_notification(&payload),
            ReminderEvent::AppStateChanged(state) => self.handle_app_state_change(state),
            ReminderEvent::Action {
                schedule_id,
                action,
            } => {
                self.handle_action(&schedule_id, action)?;
            }
            ReminderEvent::Toggle { item_id } => {
                self.toggle_reminder(&item_id);
            }
        }
        Ok(())
    }

    /// Active schedule per item id
    pub fn active_reminders(&self) -> BTreeMap<String, ReminderSchedule> {
        self.schedules
            .iter()
            .filter(|s| s.is_active)
            .map(|s| (s.item_id.clone(), s.clone()))
            .collect()
    }

    pub fn progress(&self, item_id: &str) -> Option<DoseProgress> {
        let now = self.now();
        self.schedules
            .iter()
            .find(|s| s.item_id == item_id && s.is_active)
            .map(|s| s.progress(now))
    }

    pub fn summary(&self) -> ReminderSummary {
        ReminderSummary {
            active: self.schedules.iter().filter(|s| s.is_active).count(),
            total: self.schedules.len(),
        }
    }

    /// Every schedule of the order, newest first
    pub fn history(&self) -> Vec<&ReminderSchedule> {
        let mut history: Vec<&ReminderSchedule> = self.schedules.iter().rev().collect();
        history.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        history
    }

    pub fn state(&self, schedule_id: &str) -> Option<ReminderState> {
        let schedule = self.schedules.iter().find(|s| s.id == schedule_id)?;
        let state = self.states.get(schedule_id).copied();
        Some(match (schedule.is_active, state) {
            (false, _) => ReminderState::Idle,
            (true, Some(state)) => state,
            (true, None) => ReminderState::Armed,
        })
    }

    pub fn schedules(&self) -> &[ReminderSchedule] {
        &self.schedules
    }

    pub fn schedule(&self, schedule_id: &str) -> Option<&ReminderSchedule> {
        self.schedules.iter().find(|s| s.id == schedule_id)
    }

    pub fn flags(&self) -> &ReminderFlags {
        &self.flags
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    pub fn backend_mut(&mut self) -> &mut dyn NotificationBackend {
        self.ctx.backend.as_mut()
    }

    pub fn into_context(self) -> ReminderContext {
        self.ctx
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    fn index_of(&self, schedule_id: &str) -> AppResult<usize> {
        self.schedules
            .iter()
            .position(|s| s.id == schedule_id)
            .ok_or_else(|| AppError::not_found(format!("Reminder schedule {}", schedule_id)))
    }

    fn resolve(&self, payload: &NotificationPayload) -> Option<usize> {
        let base_id = &payload.reminder_id.base_id;
        if let Some(idx) = self.schedules.iter().position(|s| &s.id == base_id) {
            return Some(idx);
        }
        let by_medicine = |active: bool| {
            self.schedules
                .iter()
                .position(|s| s.item_id == payload.medicine_id && (s.is_active || !active))
        };
        by_medicine(true).or_else(|| by_medicine(false))
    }

    fn details_for(&self, idx: usize) -> MedicationDetails {
        let schedule = &self.schedules[idx];
        match self.items.iter().find(|i| i.id == schedule.item_id) {
            Some(item) => MedicationDetails {
                medicine_id: item.id.clone(),
                medicine_name: item.name.clone(),
                dosage: item.dose_amount().to_string(),
            },
            None => MedicationDetails {
                medicine_id: schedule.item_id.clone(),
                medicine_name: schedule.item_name.clone(),
                dosage: DEFAULT_DOSE_AMOUNT.to_string(),
            },
        }
    }

    /// Register the schedule's trigger and present it when already due
    fn arm(&mut self, idx: usize) -> ReminderState {
        let state = self.register(idx);
        if state == ReminderState::Firing {
            self.present(idx);
        }
        state
    }

    /// Register the schedule's trigger, or the escalation trigger when
    /// overdue. Presents nothing.
    fn register(&mut self, idx: usize) -> ReminderState {
        let schedule_id = self.schedules[idx].id.clone();
        self.cancel(&TriggerId::base(&schedule_id));

        if !self.schedules[idx].is_active {
            self.states.insert(schedule_id, ReminderState::Idle);
            return ReminderState::Idle;
        }

        let now = self.now();
        let details = self.details_for(idx);
        let schedule = &self.schedules[idx];

        let (notification, state) = if schedule.next_reminder <= now {
            (
                ReminderNotification::persistent(&details, &schedule_id, now),
                ReminderState::Firing,
            )
        } else {
            (
                ReminderNotification::reminder(
                    &details,
                    &schedule_id,
                    schedule.next_reminder,
                    trigger_for(schedule),
                ),
                ReminderState::Armed,
            )
        };

        match self.ctx.backend.schedule_reminder(notification) {
            Ok(key) => tracing::debug!(%key, ?state, "Reminder armed"),
            Err(e) => self.backend_failed(SCHEDULE_FAILED, &e),
        }
        self.states.insert(schedule_id, state);
        state
    }

    /// Deactivate one schedule and drop all of its triggers
    fn stop(&mut self, idx: usize) {
        let schedule_id = self.schedules[idx].id.clone();
        self.schedules[idx].is_active = false;
        self.cancel(&TriggerId::base(&schedule_id));
        self.cancel(&TriggerId::persistent(&schedule_id));
        self.cancel_snooze(&schedule_id);
        self.states.insert(schedule_id, ReminderState::Idle);
    }

    fn deactivate_item(&mut self, item_id: &str) {
        for idx in 0..self.schedules.len() {
            if self.schedules[idx].item_id == item_id && self.schedules[idx].is_active {
                self.stop(idx);
            }
        }
        self.flags.insert(item_id.to_string(), false);
        self.persist();

        let item_name = self
            .items
            .iter()
            .find(|i| i.id == item_id)
            .map(|i| i.name.clone())
            .or_else(|| {
                self.schedules
                    .iter()
                    .find(|s| s.item_id == item_id)
                    .map(|s| s.item_name.clone())
            })
            .unwrap_or_else(|| item_id.to_string());
        tracing::info!(item_id, "Reminder removed");
        self.ctx
            .presenter
            .show_alert(&UserAlert::ReminderRemoved { item_name });
    }

    fn present(&mut self, idx: usize) {
        let prompt = ReminderPrompt::for_schedule(&self.schedules[idx]);
        tracing::info!(schedule_id = %prompt.schedule_id, item = %prompt.item_name, "Presenting reminder");
        self.ctx.presenter.present_reminder(&prompt);
        self.states
            .insert(self.schedules[idx].id.clone(), ReminderState::Firing);
    }

    fn cancel(&mut self, trigger_id: &TriggerId) {
        if let Err(e) = self.ctx.backend.cancel_reminder(trigger_id) {
            tracing::warn!(%trigger_id, error = %e, "Failed to cancel reminder");
        }
    }

    fn cancel_snooze(&mut self, schedule_id: &str) {
        for notification in self.pending_snoozes(schedule_id) {
            self.cancel(&notification.id);
        }
    }

    fn pending_snoozes(&self, schedule_id: &str) -> Vec<ReminderNotification> {
        self.ctx
            .backend
            .scheduled_reminders()
            .into_iter()
            .filter(|n| n.id.base_id == schedule_id && matches!(n.id.kind, TriggerKind::Snooze(_)))
            .collect()
    }

    fn active_indices(&self) -> Vec<usize> {
        (0..self.schedules.len())
            .filter(|&idx| self.schedules[idx].is_active)
            .collect()
    }

    /// Cancel every trigger registered for an inactive schedule. Returns how
    /// many were cancelled and the schedule ids that still hold a trigger.
    fn drop_stale_triggers(&mut self) -> (usize, HashSet<String>) {
        let mut stale = Vec::new();
        let mut registered = HashSet::new();
        for notification in self.ctx.backend.scheduled_reminders() {
            let id = notification.id;
            let Some(schedule) = self.schedules.iter().find(|s| s.id == id.base_id) else {
                continue;
            };
            if schedule.is_active {
                registered.insert(id.base_id);
            } else {
                stale.push(id);
            }
        }
        for id in &stale {
            self.cancel(id);
        }
        (stale.len(), registered)
    }

    /// Arm a schedule read back from the store. A snooze trigger firing at
    /// `next_reminder` stands in for the base trigger; any other snooze is
    /// dropped before arming.
    fn rearm(&mut self, idx: usize) {
        let schedule_id = self.schedules[idx].id.clone();
        let next = self.schedules[idx].next_reminder;
        let covering = Trigger::date(next);
        let snoozes = self.pending_snoozes(&schedule_id);

        let mut covered = false;
        for notification in snoozes {
            if !covered && next > self.now() && notification.trigger == covering {
                covered = true;
            } else {
                self.cancel(&notification.id);
            }
        }

        if covered {
            self.cancel(&TriggerId::base(&schedule_id));
            self.cancel(&TriggerId::persistent(&schedule_id));
            tracing::debug!(%schedule_id, "Pending snooze kept");
            self.states.insert(schedule_id, ReminderState::Armed);
        } else {
            self.arm(idx);
        }
    }

    /// Re-register active schedules the backend lost and drop triggers of
    /// inactive ones. Overdue schedules get their escalation trigger back
    /// but are presented by the caller.
    fn resync_backend(&mut self) {
        let (cancelled, registered) = self.drop_stale_triggers();
        let missing: Vec<usize> = self
            .active_indices()
            .into_iter()
            .filter(|&idx| !registered.contains(&self.schedules[idx].id))
            .collect();
        for &idx in &missing {
            self.register(idx);
        }
        if cancelled > 0 || !missing.is_empty() {
            tracing::info!(cancelled, rearmed = missing.len(), "Backend resynced");
        }
    }

    fn backend_failed(&mut self, message: &str, error: &AppError) {
        tracing::error!(error = %error, "{}", message);
        self.ctx.presenter.show_alert(&UserAlert::error(message));
    }

    fn persist(&mut self) {
        if let Err(e) = self.ctx.store.save(&self.order_id, &self.schedules) {
            tracing::warn!(order_id = %self.order_id, error = %e, "Failed to save schedules");
        }
        if let Err(e) = self.ctx.store.save_flags(&self.order_id, &self.flags) {
            tracing::warn!(order_id = %self.order_id, error = %e, "Failed to save reminder flags");
        }
    }
}

fn trigger_for(schedule: &ReminderSchedule) -> Trigger {
    if schedule.frequency.trim() == "daily" {
        let local = schedule.next_reminder.with_timezone(&Local);
        Trigger::daily(local.hour(), local.minute())
    } else if schedule.has_custom_interval() {
        Trigger::interval(schedule.interval_ms() / 1000)
    } else {
        Trigger::date(schedule.next_reminder)
    }
}
