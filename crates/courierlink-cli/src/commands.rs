use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use courierlink_core::api::{CognitoClient, CourierClient, UpstreamIdentity};
use courierlink_core::auth::{
    forget_account, CredentialStore, FileCredentialStore, PasswordCipher, SessionCache,
};
use courierlink_core::cache::{DataCache, FileTokenStore, TokenStore};
use courierlink_core::models::{SyncKind, SyncStatus};
use courierlink_core::sync::{Scheduler, SyncJobs, SyncLog};
use courierlink_core::utils::mask_token;
use courierlink_core::Config;

/// Environment variable holding the upstream password for `connect`,
/// for non-interactive use.
const PASSWORD_ENV: &str = "COURIERLINK_APP_PASSWORD";

type Sessions = SessionCache<UpstreamIdentity, FileTokenStore, FileCredentialStore>;
type Jobs = SyncJobs<UpstreamIdentity, FileTokenStore, FileCredentialStore, CourierClient>;

/// The local stores under the data directory. Opening them needs neither
/// the identity pool settings nor the encryption key.
pub struct Stores {
    pub data_dir: PathBuf,
    pub tokens: FileTokenStore,
    pub credentials: FileCredentialStore,
    pub data_cache: DataCache,
    pub sync_log: SyncLog,
}

impl Stores {
    pub fn open(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        Ok(Self {
            tokens: FileTokenStore::new(&data_dir)?,
            credentials: FileCredentialStore::new(&data_dir)?,
            data_cache: DataCache::new(&data_dir)?,
            sync_log: SyncLog::new(&data_dir)?,
            data_dir,
        })
    }
}

/// Everything a command that talks upstream needs, wired from the config.
pub struct Services {
    pub courier: CourierClient,
    pub sessions: Arc<Sessions>,
    pub jobs: Arc<Jobs>,
}

impl Services {
    pub fn build(config: &Config) -> Result<Self> {
        let stores = Stores::open(config)?;
        let courier = CourierClient::new(&config.courier_base_url, &config.http)?;
        let cognito = CognitoClient::new(config.cognito()?, &config.http)?;
        let cipher = PasswordCipher::from_config_or_keychain(
            config.encryption_key.as_deref(),
            &stores.data_dir,
        )
        .context("Failed to set up the password cipher")?;

        let sessions = Arc::new(SessionCache::new(
            UpstreamIdentity::new(courier.clone(), cognito),
            stores.tokens,
            stores.credentials,
            cipher,
            config.session.clone(),
            config.connect_policy,
        ));
        let jobs = Arc::new(SyncJobs::new(
            sessions.clone(),
            courier.clone(),
            stores.data_cache,
            stores.sync_log,
            config.schedule.clone(),
        ));

        Ok(Self {
            courier,
            sessions,
            jobs,
        })
    }
}

pub async fn connect(services: &Services, account: &str, email: &str) -> Result<()> {
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password(format!("Upstream password for {}: ", email))
            .context("Failed to read password")?,
    };
    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    services.sessions.connect(account, email, &password).await?;
    println!(
        "Connected {} as {} ({:?})",
        account,
        email,
        services.sessions.policy()
    );
    Ok(())
}

/// Forget an account locally. Nothing upstream is contacted.
pub fn disconnect(stores: &Stores, account: &str) -> Result<()> {
    forget_account(&stores.credentials, &stores.tokens, account)?;
    if let Err(e) = stores.data_cache.clear_account(account) {
        warn!(account, error = %e, "Failed to clear cached data");
    }
    println!("Disconnected {}", account);
    Ok(())
}

pub async fn token(services: &Services, account: &str, reveal: bool) -> Result<()> {
    let token = services.sessions.get_valid_token(account).await?;
    if reveal {
        println!("{}", token);
    } else {
        println!("{}", mask_token(&token));
    }
    if let Some(session) = services.sessions.session(account) {
        eprintln!("expires in {}m", session.minutes_until_expiry());
    }
    Ok(())
}

/// Fetch one delivery live and print it as JSON.
pub async fn delivery(services: &Services, account: &str, delivery_id: &str) -> Result<()> {
    let token = services.sessions.get_valid_token(account).await?;
    let delivery = services.courier.fetch_delivery(&token, delivery_id).await?;
    println!("{}", serde_json::to_string_pretty(&delivery)?);
    Ok(())
}

pub async fn sync(services: &Services, kind: SyncKind) -> Result<()> {
    let summary = services.jobs.run(kind).await?;
    println!("{}", summary);
    for account in services.sessions.connected_accounts()? {
        println!("{}", account);
        print_sync_state(
            &account,
            services.jobs.data_cache(),
            services.jobs.sync_log(),
            &[kind],
        )?;
    }
    if !summary.is_clean() {
        bail!("{} of {} accounts failed", summary.failed, summary.attempted);
    }
    Ok(())
}

/// Run the daily scheduler until interrupted.
pub async fn serve(services: &Services, config: &Config) -> Result<()> {
    let scheduler = Scheduler::new(services.jobs.clone(), &config.schedule)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            return;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    info!(
        timezone = %scheduler.timezone(),
        deliveries_at = %config.schedule.deliveries_at,
        rounds_at = %config.schedule.rounds_at,
        "courierlink scheduler running"
    );
    scheduler.run(shutdown_rx).await
}

pub fn status(stores: &Stores, config: &Config) -> Result<()> {
    let accounts = stores.credentials.connected_accounts()?;
    println!("Data directory: {}", stores.data_dir.display());
    println!("Connect policy: {:?}", config.connect_policy);
    if accounts.is_empty() {
        println!("No connected accounts");
        return Ok(());
    }

    for account in &accounts {
        println!();
        println!("{}", account);

        match stores.tokens.get(account) {
            Ok(Some(session)) => println!(
                "  session:    {} (expires in {}m)",
                mask_token(&session.access_token),
                session.minutes_until_expiry()
            ),
            Ok(None) => println!("  session:    none cached"),
            Err(e) => println!("  session:    unreadable ({})", e),
        }

        print_sync_state(
            account,
            &stores.data_cache,
            &stores.sync_log,
            &[SyncKind::Deliveries, SyncKind::Rounds],
        )?;
    }
    Ok(())
}

/// One line per job: snapshot size and age, and how the last run went.
fn print_sync_state(
    account: &str,
    cache: &DataCache,
    log: &SyncLog,
    kinds: &[SyncKind],
) -> Result<()> {
    for &kind in kinds {
        let age = match kind {
            SyncKind::Deliveries => cache
                .load_deliveries(account)?
                .map(|c| (c.data.len(), c.age_display(), c.is_stale())),
            SyncKind::Rounds => cache
                .load_rounds(account)?
                .map(|c| (c.data.len(), c.age_display(), c.is_stale())),
        };
        let snapshot = match age {
            Some((count, age, stale)) => {
                format!("{} records, {}{}", count, age, if stale { " (stale)" } else { "" })
            }
            None => "never synced".to_string(),
        };
        let last_run = match log.latest(account, kind)? {
            Some(entry) => match entry.status {
                SyncStatus::Success => "last run ok".to_string(),
                SyncStatus::InProgress => "last run interrupted".to_string(),
                SyncStatus::Failed => format!(
                    "last run failed: {}",
                    entry.error_message.unwrap_or_default()
                ),
            },
            None => "no runs".to_string(),
        };
        println!("  {:<11} {}; {}", format!("{}:", kind), snapshot, last_run);
    }
    Ok(())
}

/// Print the effective configuration, or write the defaults with `init`.
pub fn config(config: &Config, init: bool) -> Result<()> {
    let path = Config::config_path()?;
    if init {
        if path.exists() {
            bail!("Config file already exists at {}", path.display());
        }
        Config::default().save()?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
