use crate::notification::NotificationPayload;
use crate::presenter::ReminderAction;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Host application lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

/// Everything that can happen to the scheduler, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ReminderEvent {
    /// A trigger fired while the app was in the foreground
    NotificationReceived(NotificationPayload),
    /// The user tapped a delivered notification
    NotificationResponse(NotificationPayload),
    AppStateChanged(AppState),
    Action {
        schedule_id: String,
        action: ReminderAction,
    },
    Toggle {
        item_id: String,
    },
}

/// FIFO shared between backend listeners and the host loop. Clones share
/// the same queue.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Rc<RefCell<VecDeque<ReminderEvent>>>,
}

impl EventQueue {
    pub fn push(&self, event: ReminderEvent) {
        self.inner.borrow_mut().push_back(event);
    }

    pub fn pop(&self) -> Option<ReminderEvent> {
        self.inner.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}
