use crate::app::ReminderApp;
use crate::clock::{Clock, SystemClock};
use crate::config;
use crate::dosage::{create_reminder_schedule, OrderItem, HOUR_MS};
use crate::events::{AppState, ReminderEvent};
use crate::notification::FileBackend;
use crate::presenter::{ReminderAction, ReminderPresenter, ReminderPrompt, UserAlert};
use crate::reminder::ReminderSchedule;
use crate::scheduler::{ReminderContext, ReminderScheduler, ToggleOutcome};
use crate::storage::{LocalStore, ScheduleStore};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "dose-reminder",
    version,
    about = "Medication dose reminders computed from order dosage data."
)]
pub struct Cli {
    /// Directory holding schedules and registered triggers.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OrderArgs {
    /// Order the reminders belong to.
    #[arg(long)]
    order: String,

    /// JSON array of order items with their dosage fields.
    #[arg(long)]
    items: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the interval and dose count each item would get.
    Plan {
        #[arg(long)]
        items: PathBuf,
    },
    /// Turn the reminder for one item on or off.
    Toggle {
        #[command(flatten)]
        order: OrderArgs,
        #[arg(long)]
        item: String,
    },
    /// Summary and progress of an order's reminders.
    Status {
        #[command(flatten)]
        order: OrderArgs,
    },
    /// Record a dose as taken.
    Take {
        #[command(flatten)]
        order: OrderArgs,
        #[arg(long)]
        schedule: String,
    },
    /// Turn a reminder off.
    Off {
        #[command(flatten)]
        order: OrderArgs,
        #[arg(long)]
        schedule: String,
    },
    /// Push a reminder back by 5 or 15 minutes.
    Snooze {
        #[command(flatten)]
        order: OrderArgs,
        #[arg(long)]
        schedule: String,
        #[arg(long, default_value_t = config::SNOOZE_SHORT_MINUTES)]
        minutes: i64,
    },
    /// Fire due triggers and re-check overdue reminders, as on app resume.
    Resume {
        #[command(flatten)]
        order: OrderArgs,
    },
}

/// Prints prompts and alerts to stdout. A prompt is shown once per run.
#[derive(Default)]
struct ConsolePresenter {
    shown: HashSet<String>,
}

impl ReminderPresenter for ConsolePresenter {
    fn present_reminder(&mut self, prompt: &ReminderPrompt) {
        if !self.shown.insert(prompt.schedule_id.clone()) {
            return;
        }
        let actions: Vec<&str> = prompt.actions.iter().map(|a| a.label()).collect();
        println!("[{}] {}", prompt.title, prompt.message);
        println!("  schedule: {}", prompt.schedule_id);
        println!("  actions:  {}", actions.join(" | "));
    }

    fn show_alert(&mut self, alert: &UserAlert) {
        if alert.is_error() {
            eprintln!("{}: {}", alert.title(), alert.message());
        } else {
            println!("{}: {}", alert.title(), alert.message());
        }
    }
}

pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config::app_data_dir()?,
    };
    tracing::debug!(data_dir = %data_dir.display(), "Using data directory");

    match cli.command {
        Command::Plan { items } => plan(&read_items(Some(items.as_path()))?),
        Command::Toggle { order, item } => {
            let mut scheduler = open(&data_dir, &order)?;
            match scheduler.toggle_reminder(&item) {
                ToggleOutcome::Activated { schedule_id } => println!("Schedule {}", schedule_id),
                ToggleOutcome::Deactivated => {}
                ToggleOutcome::Skipped => {
                    bail!("No reminder can be created for item {}", item)
                }
            }
            Ok(())
        }
        Command::Status { order } => {
            let scheduler = open(&data_dir, &order)?;
            status(&scheduler);
            Ok(())
        }
        Command::Take { order, schedule } => {
            act(&data_dir, &order, &schedule, ReminderAction::Taken)
        }
        Command::Off { order, schedule } => {
            act(&data_dir, &order, &schedule, ReminderAction::TurnOff)
        }
        Command::Snooze {
            order,
            schedule,
            minutes,
        } => {
            let action = match minutes {
                m if m == config::SNOOZE_SHORT_MINUTES => ReminderAction::Snooze5,
                m if m == config::SNOOZE_LONG_MINUTES => ReminderAction::Snooze15,
                m => bail!(
                    "Snooze must be {} or {} minutes, got {}",
                    config::SNOOZE_SHORT_MINUTES,
                    config::SNOOZE_LONG_MINUTES,
                    m
                ),
            };
            act(&data_dir, &order, &schedule, action)
        }
        Command::Resume { order } => resume(&data_dir, &order),
    }
}

fn read_items(path: Option<&Path>) -> anyhow::Result<Vec<OrderItem>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read items file {:?}", path))?;
    serde_json::from_str(&data).with_context(|| format!("Invalid items JSON in {:?}", path))
}

fn context(data_dir: &Path, backend: FileBackend) -> anyhow::Result<ReminderContext> {
    let store = LocalStore::new(data_dir)
        .with_context(|| format!("Failed to open store in {:?}", data_dir))?;
    Ok(ReminderContext::new(
        backend,
        ScheduleStore::new(store),
        ConsolePresenter::default(),
        SystemClock,
    ))
}

fn open(data_dir: &Path, order: &OrderArgs) -> anyhow::Result<ReminderScheduler> {
    let items = read_items(order.items.as_deref())?;
    let ctx = context(data_dir, FileBackend::new(data_dir))?;
    Ok(ReminderScheduler::open(ctx, &order.order, items))
}

fn act(
    data_dir: &Path,
    order: &OrderArgs,
    schedule_id: &str,
    action: ReminderAction,
) -> anyhow::Result<()> {
    let mut scheduler = open(data_dir, order)?;
    let state = scheduler
        .handle_action(schedule_id, action)
        .with_context(|| format!("{} failed for {}", action.label(), schedule_id))?;
    tracing::debug!(schedule_id, ?state, "Action applied");
    if let Some(schedule) = scheduler.schedule(schedule_id) {
        print_schedule(schedule, scheduler.order_id());
    }
    Ok(())
}

fn resume(data_dir: &Path, order: &OrderArgs) -> anyhow::Result<()> {
    let items = read_items(order.items.as_deref())?;
    let backend = FileBackend::new(data_dir);
    let ctx = context(data_dir, backend.clone())?;

    let mut app = ReminderApp::start(ctx, &order.order, items);
    let fired = backend
        .deliver_due()
        .context("Failed to deliver due reminders")?;
    let handled = app.run_until_idle();
    app.dispatch(ReminderEvent::AppStateChanged(AppState::Background));
    app.dispatch(ReminderEvent::AppStateChanged(AppState::Active));

    tracing::info!(fired, handled, "Resumed");
    status(app.scheduler());
    app.shutdown();
    Ok(())
}

fn plan(items: &[OrderItem]) -> anyhow::Result<()> {
    let now = SystemClock.now();
    for item in items {
        match create_reminder_schedule(item, "plan", now) {
            Some(schedule) => println!(
                "{}: every {}h, {} doses over {} days, ends {}",
                item.name,
                schedule.interval_ms() / HOUR_MS,
                schedule.max_reminders,
                schedule.duration,
                schedule.end_date.format("%Y-%m-%d %H:%M UTC")
            ),
            None => println!("{}: dosage data cannot produce a schedule", item.name),
        }
    }
    Ok(())
}

fn status(scheduler: &ReminderScheduler) {
    let summary = scheduler.summary();
    println!(
        "Order {}: {} active of {} schedules",
        scheduler.order_id(),
        summary.active,
        summary.total
    );
    for schedule in scheduler.history() {
        print_schedule(schedule, scheduler.order_id());
    }
}

fn print_schedule(schedule: &ReminderSchedule, order_id: &str) {
    let next = if schedule.is_active {
        schedule.next_reminder.format("%Y-%m-%d %H:%M UTC").to_string()
    } else {
        "off".to_string()
    };
    println!(
        "  {} [{}] {} {}/{} doses, next {}",
        schedule.id,
        order_id,
        schedule.item_name,
        schedule.reminder_count,
        schedule.max_reminders,
        next
    );
}
