use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;

use crate::models::{SyncKind, SyncLogEntry};

/// Sync log file name in the data directory
const SYNC_LOG_FILE: &str = "sync_log.jsonl";

/// Append-only record of sync runs, one JSON object per line.
pub struct SyncLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SyncLog {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        Ok(Self {
            path: data_dir.join(SYNC_LOG_FILE),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &SyncLogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("sync log lock poisoned"))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open sync log")?;
        file.write_all(line.as_bytes())
            .context("Failed to append to sync log")?;
        Ok(())
    }

    /// Every entry in the log, oldest first. Lines that do not parse are
    /// skipped.
    pub fn entries(&self) -> Result<Vec<SyncLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path).context("Failed to read sync log")?;

        let mut entries = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = n + 1, error = %e, "Skipping malformed sync log line"),
            }
        }
        Ok(entries)
    }

    /// The most recent entry for an account and job.
    pub fn latest(&self, account_id: &str, kind: SyncKind) -> Result<Option<SyncLogEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .find(|e| e.account_id == account_id && e.kind == kind))
    }
}
