//! Scheduled pulls of courier data for every connected account.
//!
//! - `SyncJobs`: runs a deliveries or rounds sync across accounts
//! - `SyncLog`: append-only JSON-lines history of each account's runs
//! - `Scheduler`: fires each job daily at its configured local time

pub mod jobs;
pub mod log;
pub mod scheduler;

pub use jobs::{CourierSource, SyncJobs, SyncSummary};
pub use log::SyncLog;
pub use scheduler::{next_run_after, DailyJob, Scheduler};
