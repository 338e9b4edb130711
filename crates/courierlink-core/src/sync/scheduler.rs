use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tracing::{error, info};

use crate::api::IdentityProvider;
use crate::auth::CredentialStore;
use crate::cache::TokenStore;
use crate::config::ScheduleSettings;
use crate::models::SyncKind;

use super::jobs::{CourierSource, SyncJobs, SyncSummary};

/// The first moment strictly after `now` whose local wall-clock time is `at`.
///
/// A wall-clock time skipped by a daylight-saving jump resolves to the first
/// valid instant after the gap; a repeated one resolves to its earlier
/// occurrence.
pub fn next_run_after<Z: TimeZone>(now: &DateTime<Z>, at: NaiveTime) -> DateTime<Z> {
    let tz = now.timezone();
    let today = now.date_naive().and_time(at);
    let candidate = resolve_local(&tz, today);
    if candidate > *now {
        return candidate;
    }
    resolve_local(&tz, today + Duration::days(1))
}

fn resolve_local<Z: TimeZone>(tz: &Z, naive: NaiveDateTime) -> DateTime<Z> {
    let mut candidate = naive;
    // gaps are at most a couple of hours
    for _ in 0..12 {
        if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
            return resolved;
        }
        candidate += Duration::minutes(15);
    }
    tz.from_utc_datetime(&naive)
}

/// One job and its daily wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyJob {
    pub kind: SyncKind,
    pub at: NaiveTime,
}

/// Runs each sync job once a day at its configured wall-clock time in the
/// schedule's timezone.
pub struct Scheduler<P, T, C, S> {
    jobs: Arc<SyncJobs<P, T, C, S>>,
    tz: Tz,
    daily: Vec<DailyJob>,
}

impl<P, T, C, S> Scheduler<P, T, C, S>
where
    P: IdentityProvider,
    T: TokenStore,
    C: CredentialStore,
    S: CourierSource,
{
    pub fn new(jobs: Arc<SyncJobs<P, T, C, S>>, settings: &ScheduleSettings) -> Result<Self> {
        let daily = vec![
            DailyJob {
                kind: SyncKind::Deliveries,
                at: settings.deliveries_time()?,
            },
            DailyJob {
                kind: SyncKind::Rounds,
                at: settings.rounds_time()?,
            },
        ];
        Ok(Self {
            jobs,
            tz: settings.tz()?,
            daily,
        })
    }

    pub fn daily_jobs(&self) -> &[DailyJob] {
        &self.daily
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// When each job fires next, seen from `now`.
    pub fn upcoming(&self, now: DateTime<Utc>) -> Vec<(DailyJob, DateTime<Tz>)> {
        let now = now.with_timezone(&self.tz);
        self.daily
            .iter()
            .map(|job| (*job, next_run_after(&now, job.at)))
            .collect()
    }

    /// Run a job now, outside the schedule.
    pub async fn trigger(&self, kind: SyncKind) -> Result<SyncSummary> {
        info!(job = %kind, "Sync triggered");
        self.jobs.run(kind).await
    }

    /// Fire jobs at their daily times until `shutdown` turns true or its
    /// sender goes away. A job that overruns the next one's slot delays
    /// it rather than skipping it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut upcoming = self.upcoming(Utc::now());

        for (job, due) in &upcoming {
            info!(job = %job.kind, next_run = %due, "Scheduled daily sync");
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            let Some(slot) = upcoming
                .iter()
                .enumerate()
                .min_by_key(|(_, (_, due))| *due)
                .map(|(i, _)| i)
            else {
                break;
            };
            let (job, due) = upcoming[slot];
            let wait = (due.with_timezone(&Utc) - Utc::now())
                .to_std()
                .unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    upcoming[slot].1 = next_run_after(&due, job.at);
                    if let Err(e) = self.trigger(job.kind).await {
                        error!(job = %job.kind, error = %e, "Scheduled sync failed");
                    }
                    info!(job = %job.kind, next_run = %upcoming[slot].1, "Next sync scheduled");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }
}
