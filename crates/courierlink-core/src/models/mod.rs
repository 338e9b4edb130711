//! Data models for courier entities and local bookkeeping.
//!
//! - `Delivery`, `Round`: records pulled from the courier API
//! - `SyncKind`, `SyncStatus`, `SyncLogEntry`: per-account sync history

pub mod delivery;
pub mod round;
pub mod sync;

pub use delivery::{DeliveriesResponse, Delivery};
pub use round::{Round, RoundsResponse};
pub use sync::{SyncKind, SyncLogEntry, SyncStatus};

use serde::{Deserialize, Deserializer};

/// Upstream ids arrive as either JSON strings or numbers depending on
/// the endpoint; normalise them to strings.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
