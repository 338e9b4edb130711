use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::api::{ApiError, CourierClient, FetchWindow, IdentityProvider};
use crate::auth::{CredentialStore, SessionCache};
use crate::cache::{DataCache, TokenStore};
use crate::config::ScheduleSettings;
use crate::models::{Delivery, Round, SyncKind, SyncLogEntry};
use crate::utils::format_elapsed;

use super::log::SyncLog;

/// Where the sync jobs read courier data from.
pub trait CourierSource: Send + Sync {
    fn fetch_deliveries(
        &self,
        token: &str,
        window: &FetchWindow,
    ) -> impl Future<Output = Result<Vec<Delivery>, ApiError>> + Send;

    fn fetch_rounds(
        &self,
        token: &str,
        window: &FetchWindow,
    ) -> impl Future<Output = Result<Vec<Round>, ApiError>> + Send;
}

impl CourierSource for CourierClient {
    async fn fetch_deliveries(
        &self,
        token: &str,
        window: &FetchWindow,
    ) -> Result<Vec<Delivery>, ApiError> {
        CourierClient::fetch_deliveries(self, token, window).await
    }

    async fn fetch_rounds(&self, token: &str, window: &FetchWindow) -> Result<Vec<Round>, ApiError> {
        CourierClient::fetch_rounds(self, token, window).await
    }
}

/// Outcome of one job run across all connected accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub kind: SyncKind,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl SyncSummary {
    fn new(kind: SyncKind) -> Self {
        Self {
            kind,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

impl std::fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sync: {} accounts, {} succeeded, {} failed in {}",
            self.kind,
            self.attempted,
            self.succeeded,
            self.failed,
            format_elapsed(self.duration)
        )
    }
}

/// The scheduled pulls of courier data for every connected account.
pub struct SyncJobs<P, T, C, S> {
    sessions: Arc<SessionCache<P, T, C>>,
    source: S,
    cache: DataCache,
    log: SyncLog,
    settings: ScheduleSettings,
}

impl<P, T, C, S> SyncJobs<P, T, C, S>
where
    P: IdentityProvider,
    T: TokenStore,
    C: CredentialStore,
    S: CourierSource,
{
    pub fn new(
        sessions: Arc<SessionCache<P, T, C>>,
        source: S,
        cache: DataCache,
        log: SyncLog,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            sessions,
            source,
            cache,
            log,
            settings,
        }
    }

    pub fn data_cache(&self) -> &DataCache {
        &self.cache
    }

    pub fn sync_log(&self) -> &SyncLog {
        &self.log
    }

    /// Run one job over every connected account, one account at a time.
    /// A failing account is logged and recorded; it never stops the batch.
    pub async fn run(&self, kind: SyncKind) -> Result<SyncSummary> {
        let started = Instant::now();
        let accounts = self.sessions.connected_accounts()?;
        info!(job = %kind, accounts = accounts.len(), "Starting sync");

        let mut summary = SyncSummary::new(kind);
        for account in &accounts {
            summary.attempted += 1;
            let entry = SyncLogEntry::started(account, kind);
            self.record(&entry);

            match self.sync_account(account, kind).await {
                Ok(count) => {
                    summary.succeeded += 1;
                    info!(job = %kind, account = %account, records = count, "Account synced");
                    self.record(&entry.succeeded(count));
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(job = %kind, account = %account, error = %format!("{:#}", e), "Account sync failed");
                    self.record(&entry.failed(&format!("{:#}", e)));
                }
            }
        }

        summary.duration = started.elapsed();
        info!("{}", summary);
        Ok(summary)
    }

    async fn sync_account(&self, account_id: &str, kind: SyncKind) -> Result<usize> {
        let token = self.sessions.token_for_batch(account_id).await?;

        match kind {
            SyncKind::Deliveries => {
                let window = FetchWindow::last_days(self.settings.delivery_window_days);
                let deliveries = self.source.fetch_deliveries(&token, &window).await?;
                self.cache.save_deliveries(account_id, &deliveries)?;
                Ok(deliveries.len())
            }
            SyncKind::Rounds => {
                let window = FetchWindow::last_days(self.settings.round_window_days);
                let rounds = self.source.fetch_rounds(&token, &window).await?;
                self.cache.save_rounds(account_id, &rounds)?;
                Ok(rounds.len())
            }
        }
    }

    fn record(&self, entry: &SyncLogEntry) {
        if let Err(e) = self.log.append(entry) {
            warn!(account = %entry.account_id, error = %e, "Failed to write sync log");
        }
    }
}
