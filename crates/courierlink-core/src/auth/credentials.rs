//! Persistent upstream credentials, one row per local account.
//!
//! A row holds the upstream login email, the encrypted upstream password
//! and, once known, the external account id. An account counts as
//! connected while both the email and the encrypted password are present.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Credentials file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredentials {
    pub email: Option<String>,
    pub encrypted_password: Option<String>,
    pub external_id: Option<String>,
}

impl StoredCredentials {
    pub fn is_connected(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.is_empty())
            && self.encrypted_password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Storage for per-account upstream credentials.
pub trait CredentialStore: Send + Sync {
    /// The account's row, if it is connected.
    fn get_credentials(&self, account_id: &str) -> Result<Option<StoredCredentials>>;

    fn set_credentials(&self, account_id: &str, credentials: StoredCredentials) -> Result<()>;

    fn clear_credentials(&self, account_id: &str) -> Result<()>;

    /// Ids of every connected account, in a stable order.
    fn connected_accounts(&self) -> Result<Vec<String>>;
}

/// In-process credential table, for tests and one-shot tools.
#[derive(Default)]
pub struct MemoryCredentialStore {
    rows: Mutex<BTreeMap<String, StoredCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StoredCredentials>>> {
        self.rows
            .lock()
            .map_err(|_| anyhow::anyhow!("credential table lock poisoned"))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credentials(&self, account_id: &str) -> Result<Option<StoredCredentials>> {
        Ok(self
            .rows()?
            .get(account_id)
            .filter(|c| c.is_connected())
            .cloned())
    }

    fn set_credentials(&self, account_id: &str, credentials: StoredCredentials) -> Result<()> {
        self.rows()?.insert(account_id.to_string(), credentials);
        Ok(())
    }

    fn clear_credentials(&self, account_id: &str) -> Result<()> {
        self.rows()?.remove(account_id);
        Ok(())
    }

    fn connected_accounts(&self) -> Result<Vec<String>> {
        Ok(self
            .rows()?
            .iter()
            .filter(|(_, c)| c.is_connected())
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Credential table persisted as a single JSON file.
///
/// Every write rewrites the whole table through a temp file and a rename,
/// so a crash never leaves a half-written file behind. Operations are
/// serialised by an in-process lock.
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        Ok(Self {
            path: data_dir.join(CREDENTIALS_FILE),
            lock: Mutex::new(()),
        })
    }

    fn load(&self) -> Result<BTreeMap<String, StoredCredentials>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read credentials file")?;
        serde_json::from_str(&contents).context("Failed to parse credentials file")
    }

    fn save(&self, rows: &BTreeMap<String, StoredCredentials>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(rows)?;
        std::fs::write(&tmp, contents).context("Failed to write credentials file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace credentials file")?;
        Ok(())
    }

    fn with_rows<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, StoredCredentials>) -> (T, bool),
    ) -> Result<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("credentials file lock poisoned"))?;
        let mut rows = self.load()?;
        let (value, dirty) = f(&mut rows);
        if dirty {
            self.save(&rows)?;
        }
        Ok(value)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get_credentials(&self, account_id: &str) -> Result<Option<StoredCredentials>> {
        self.with_rows(|rows| {
            let row = rows.get(account_id).filter(|c| c.is_connected()).cloned();
            (row, false)
        })
    }

    fn set_credentials(&self, account_id: &str, credentials: StoredCredentials) -> Result<()> {
        self.with_rows(|rows| {
            rows.insert(account_id.to_string(), credentials);
            ((), true)
        })
    }

    fn clear_credentials(&self, account_id: &str) -> Result<()> {
        self.with_rows(|rows| {
            let removed = rows.remove(account_id).is_some();
            ((), removed)
        })
    }

    fn connected_accounts(&self) -> Result<Vec<String>> {
        self.with_rows(|rows| {
            let ids = rows
                .iter()
                .filter(|(_, c)| c.is_connected())
                .map(|(id, _)| id.clone())
                .collect();
            (ids, false)
        })
    }
}
