use crate::dosage::OrderItem;
use crate::events::{EventQueue, ReminderEvent};
use crate::notification::{NotificationPayload, Subscription};
use crate::presenter::UserAlert;
use crate::scheduler::{ReminderContext, ReminderScheduler};

/// Application root: owns the scheduler and feeds it queued events one at
/// a time.
pub struct ReminderApp {
    scheduler: ReminderScheduler,
    queue: EventQueue,
    subscriptions: Vec<Subscription>,
}

impl ReminderApp {
    /// Initialize the backend, hook its listeners to the event queue, then
    /// load and reconcile the order's reminders.
    pub fn start(mut ctx: ReminderContext, order_id: &str, items: Vec<OrderItem>) -> Self {
        if let Err(e) = ctx.backend.initialize() {
            tracing::error!(error = %e, "Failed to initialize notifications");
            ctx.presenter.show_alert(&UserAlert::error(e.to_string()));
        }

        let queue = EventQueue::default();
        let received = queue.clone();
        let responded = queue.clone();
        let subscriptions = vec![
            ctx.backend
                .add_notification_received_listener(Box::new(move |payload: &NotificationPayload| {
                    received.push(ReminderEvent::NotificationReceived(payload.clone()))
                })),
            ctx.backend
                .add_notification_response_received_listener(Box::new(move |payload: &NotificationPayload| {
                    responded.push(ReminderEvent::NotificationResponse(payload.clone()))
                })),
        ];

        let scheduler = ReminderScheduler::load(ctx, order_id, items);
        let mut app = Self {
            scheduler,
            queue,
            subscriptions,
        };
        app.run_until_idle();
        app
    }

    /// Handle for producers outside the app
    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    pub fn dispatch(&mut self, event: ReminderEvent) -> usize {
        self.queue.push(event);
        self.run_until_idle()
    }

    /// Drain the queue. Returns how many events were handled.
    pub fn run_until_idle(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.queue.pop() {
            if let Err(e) = self.scheduler.handle_event(event) {
                tracing::warn!(error = %e, "Event rejected");
            }
            handled += 1;
        }
        handled
    }

    pub fn scheduler(&self) -> &ReminderScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut ReminderScheduler {
        &mut self.scheduler
    }

    /// Detach the listeners and hand the collaborators back
    pub fn shutdown(mut self) -> ReminderContext {
        self.run_until_idle();
        let backend = self.scheduler.backend_mut();
        for subscription in self.subscriptions.drain(..) {
            backend.remove_listener(subscription);
        }
        self.scheduler.into_context()
    }
}
