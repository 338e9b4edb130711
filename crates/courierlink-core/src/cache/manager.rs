use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::models::{Delivery, Round};

/// Consider a snapshot stale after 26 hours.
/// Jobs run once a day, so anything older means a sync was missed.
const CACHE_STALE_MINUTES: i64 = 26 * 60;

/// Subdirectory of the data directory holding per-account snapshots.
const SNAPSHOT_DIR: &str = "snapshots";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // negative ages come from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}

/// Per-account snapshots of the data pulled by the sync jobs.
pub struct DataCache {
    cache_dir: PathBuf,
}

impl DataCache {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let cache_dir = data_dir.join(SNAPSHOT_DIR);
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    fn account_dir(&self, account_id: &str) -> PathBuf {
        self.cache_dir.join(crate::cache::file_safe(account_id))
    }

    fn load<T: DeserializeOwned>(&self, account_id: &str, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.account_dir(account_id).join(format!("{}.json", name));
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}/{}", account_id, name))?;

        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}/{}", account_id, name))?;

        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, account_id: &str, name: &str, data: &T) -> Result<()> {
        let dir = self.account_dir(account_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", name));
        let contents = serde_json::to_string_pretty(&CachedData::new(data))?;
        std::fs::write(&path, contents)?;
        debug!(account = account_id, name, "Saved snapshot");
        Ok(())
    }

    // ===== Deliveries =====

    pub fn load_deliveries(&self, account_id: &str) -> Result<Option<CachedData<Vec<Delivery>>>> {
        self.load(account_id, "deliveries")
    }

    pub fn save_deliveries(&self, account_id: &str, deliveries: &[Delivery]) -> Result<()> {
        self.save(account_id, "deliveries", &deliveries)
    }

    // ===== Rounds =====

    pub fn load_rounds(&self, account_id: &str) -> Result<Option<CachedData<Vec<Round>>>> {
        self.load(account_id, "rounds")
    }

    pub fn save_rounds(&self, account_id: &str, rounds: &[Round]) -> Result<()> {
        self.save(account_id, "rounds", &rounds)
    }

    /// Drop every snapshot held for an account.
    pub fn clear_account(&self, account_id: &str) -> Result<()> {
        let dir = self.account_dir(account_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            debug!(account = account_id, "Cleared snapshots");
        }
        Ok(())
    }
}
