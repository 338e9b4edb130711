//! Application configuration management.
//!
//! Configuration is stored at `~/.config/courierlink/config.json`. Every
//! field has a default, and the deployment-specific values (identity pool,
//! encryption secret, data directory) can be overridden from the
//! environment, which is how the service is usually run.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::auth::session::{SESSION_LIFETIME_MINUTES, TOKEN_REFRESH_BUFFER_MINUTES};

/// Application name used for config/data directory paths
const APP_NAME: &str = "courierlink";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_COURIER_BASE_URL: &str = "https://api.hermesworld.co.uk";

/// The courier operates on UK time; schedules follow it whatever the host's zone.
const DEFAULT_TIMEZONE: &str = "Europe/London";

/// Which token path connect and the batch jobs use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectPolicy {
    /// Connect seeds the token cache; jobs go through the cache first.
    #[default]
    CacheThenBatch,
    /// Connect only persists credentials; jobs log in fresh every run.
    CredentialsOnly,
}

impl std::str::FromStr for ConnectPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache-then-batch" | "cache" => Ok(ConnectPolicy::CacheThenBatch),
            "credentials-only" | "credentials" => Ok(ConnectPolicy::CredentialsOnly),
            other => Err(anyhow::anyhow!("Unknown connect policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Lifetime of a cached token triple from the moment it was issued.
    pub lifetime_secs: u64,
    /// Tokens inside this window before expiry are not served.
    pub refresh_buffer_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            lifetime_secs: (SESSION_LIFETIME_MINUTES * 60) as u64,
            refresh_buffer_secs: (TOKEN_REFRESH_BUFFER_MINUTES * 60) as u64,
        }
    }
}

impl SessionSettings {
    pub fn lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lifetime_secs as i64)
    }

    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_attempts: 3,
            initial_backoff_ms: 1000,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// IANA zone the wall-clock times below are read in.
    pub timezone: String,
    /// Wall-clock time of the daily delivery sync, `HH:MM`.
    pub deliveries_at: String,
    /// Wall-clock time of the daily round sync, `HH:MM`.
    pub rounds_at: String,
    pub delivery_window_days: i64,
    pub round_window_days: i64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            deliveries_at: "02:00".to_string(),
            rounds_at: "03:00".to_string(),
            delivery_window_days: 7,
            round_window_days: 30,
        }
    }
}

impl ScheduleSettings {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.timezone, e))
    }

    pub fn deliveries_time(&self) -> Result<NaiveTime> {
        parse_time_of_day(&self.deliveries_at)
    }

    pub fn rounds_time(&self) -> Result<NaiveTime> {
        parse_time_of_day(&self.rounds_at)
    }
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("Invalid time of day '{}', expected HH:MM", s))
}

/// Identity pool settings, present only once both ids are configured.
#[derive(Debug, Clone)]
pub struct CognitoSettings {
    pub user_pool_id: String,
    pub client_id: String,
}

impl CognitoSettings {
    /// Region prefix of the pool id, e.g. `eu-west-1` for `eu-west-1_AbCdEf`.
    pub fn region(&self) -> &str {
        self.user_pool_id
            .split_once('_')
            .map(|(region, _)| region)
            .unwrap_or("eu-west-1")
    }

    /// Pool name used in the SRP password hash (the part after the underscore).
    pub fn pool_name(&self) -> &str {
        self.user_pool_id
            .split_once('_')
            .map(|(_, name)| name)
            .unwrap_or(&self.user_pool_id)
    }

    pub fn endpoint(&self) -> String {
        format!("https://cognito-idp.{}.amazonaws.com", self.region())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub courier_base_url: String,
    pub cognito_user_pool_id: Option<String>,
    pub cognito_client_id: Option<String>,
    /// Secret the password cipher key is derived from. Falls back to the
    /// OS keychain when unset.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub connect_policy: ConnectPolicy,
    pub session: SessionSettings,
    pub http: HttpSettings,
    pub schedule: ScheduleSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            courier_base_url: DEFAULT_COURIER_BASE_URL.to_string(),
            cognito_user_pool_id: None,
            cognito_client_id: None,
            encryption_key: None,
            data_dir: None,
            connect_policy: ConnectPolicy::default(),
            session: SessionSettings::default(),
            http: HttpSettings::default(),
            schedule: ScheduleSettings::default(),
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Overlay values from an environment lookup. Split out from `load` so
    /// tests do not have to mutate the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("COURIER_BASE_URL") {
            self.courier_base_url = url;
        }
        if let Some(pool) = non_empty("COGNITO_USER_POOL_ID") {
            self.cognito_user_pool_id = Some(pool);
        }
        if let Some(client) = non_empty("COGNITO_CLIENT_ID") {
            self.cognito_client_id = Some(client);
        }
        if let Some(key) = non_empty("COURIERLINK_ENCRYPTION_KEY") {
            self.encryption_key = Some(key);
        }
        if let Some(dir) = non_empty("COURIERLINK_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(policy) = non_empty("COURIERLINK_CONNECT_POLICY") {
            self.connect_policy = policy.parse()?;
        }
        if let Some(tz) = non_empty("COURIERLINK_TIMEZONE") {
            self.schedule.timezone = tz;
        }
        Ok(())
    }

    pub fn cognito(&self) -> Result<CognitoSettings> {
        match (&self.cognito_user_pool_id, &self.cognito_client_id) {
            (Some(pool), Some(client)) => Ok(CognitoSettings {
                user_pool_id: pool.clone(),
                client_id: client.clone(),
            }),
            _ => Err(anyhow::anyhow!(
                "Cognito configuration missing (COGNITO_USER_POOL_ID / COGNITO_CLIENT_ID)"
            )),
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding credentials, cached tokens, snapshots and logs.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}
