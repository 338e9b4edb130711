use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Deliveries,
    Rounds,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Deliveries => "deliveries",
            SyncKind::Rounds => "rounds",
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deliveries" | "delivery" => Ok(SyncKind::Deliveries),
            "rounds" | "round" => Ok(SyncKind::Rounds),
            other => Err(anyhow::anyhow!("Unknown sync job: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InProgress,
    Success,
    Failed,
}

/// One line of the sync log: a single account's run of a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub account_id: String,
    pub kind: SyncKind,
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncLogEntry {
    pub fn started(account_id: &str, kind: SyncKind) -> Self {
        Self {
            account_id: account_id.to_string(),
            kind,
            status: SyncStatus::InProgress,
            record_count: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn succeeded(&self, record_count: usize) -> Self {
        Self {
            status: SyncStatus::Success,
            record_count: Some(record_count),
            completed_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    pub fn failed(&self, error: &str) -> Self {
        Self {
            status: SyncStatus::Failed,
            error_message: Some(error.to_string()),
            completed_at: Some(Utc::now()),
            ..self.clone()
        }
    }
}
