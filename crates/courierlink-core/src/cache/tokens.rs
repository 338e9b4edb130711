//! Key-value storage for cached upstream sessions, with per-key expiry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::file_safe;
use crate::auth::SessionTokens;

/// Subdirectory of the data directory holding one file per account.
const TOKENS_DIR: &str = "tokens";

/// Storage for one `SessionTokens` record per account.
///
/// Entries read back as absent once their TTL has passed. `put` replaces
/// any previous record for the account as a whole.
pub trait TokenStore: Send + Sync {
    fn get(&self, account_id: &str) -> Result<Option<SessionTokens>>;

    fn put(&self, account_id: &str, tokens: &SessionTokens, ttl: Duration) -> Result<()>;

    fn delete(&self, account_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenEntry {
    tokens: SessionTokens,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TokenEntry {
    fn new(tokens: &SessionTokens, ttl: Duration) -> Self {
        let stored_at = Utc::now();
        Self {
            tokens: tokens.clone(),
            stored_at,
            expires_at: stored_at + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// In-process token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, TokenEntry>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, TokenEntry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("token store lock poisoned"))
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, account_id: &str) -> Result<Option<SessionTokens>> {
        let mut entries = self.entries()?;
        match entries.get(account_id) {
            Some(entry) if entry.is_live() => Ok(Some(entry.tokens.clone())),
            Some(_) => {
                entries.remove(account_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, account_id: &str, tokens: &SessionTokens, ttl: Duration) -> Result<()> {
        self.entries()?
            .insert(account_id.to_string(), TokenEntry::new(tokens, ttl));
        Ok(())
    }

    fn delete(&self, account_id: &str) -> Result<()> {
        self.entries()?.remove(account_id);
        Ok(())
    }
}

/// Token store keeping one JSON file per account under `<data_dir>/tokens`.
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join(TOKENS_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create token directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn entry_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_safe(account_id)))
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, account_id: &str) -> Result<Option<SessionTokens>> {
        let path = self.entry_path(account_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read token file for {}", account_id))?;
        let entry: TokenEntry = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse token file for {}", account_id))?;

        if entry.is_live() {
            Ok(Some(entry.tokens))
        } else {
            std::fs::remove_file(&path).ok();
            Ok(None)
        }
    }

    fn put(&self, account_id: &str, tokens: &SessionTokens, ttl: Duration) -> Result<()> {
        let path = self.entry_path(account_id);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(&TokenEntry::new(tokens, ttl))?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to store token file for {}", account_id))?;
        Ok(())
    }

    fn delete(&self, account_id: &str) -> Result<()> {
        let path = self.entry_path(account_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
