//! Dosage reminder core: turns order dosage data into reminder schedules,
//! keeps them in a store, and drives a notification backend through the
//! take / snooze / turn-off protocol.

pub mod app;
pub mod clock;
pub mod config;
pub mod dosage;
pub mod error;
pub mod events;
pub mod notification;
pub mod presenter;
pub mod reminder;
pub mod scheduler;
pub mod storage;

mod cli;

pub use app::ReminderApp;
pub use dosage::{calculate_duration_ms, calculate_interval_ms, create_reminder_schedule, OrderItem};
pub use error::{AppError, AppResult};
pub use reminder::{ReminderSchedule, ReminderState};
pub use scheduler::{ReminderContext, ReminderScheduler, ToggleOutcome};

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Entry point of the `dose-reminder` binary
pub fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("{} v{}", config::APP_NAME, config::APP_VERSION);

    if let Err(e) = cli::execute(cli::Cli::parse()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
