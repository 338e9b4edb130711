use serde::{Deserialize, Serialize};
use tracing::warn;

use super::delivery::json_kind;
use super::string_or_number;

/// A delivery round (a driver's route for one day).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    #[serde(alias = "roundId", default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(alias = "roundDate", default)]
    pub date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "parcelCount", default)]
    pub parcel_count: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The rounds endpoint answers either `{"rounds": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RoundsResponse {
    Wrapped { rounds: Vec<Round> },
    Bare(Vec<Round>),
    Other(serde_json::Value),
}

impl RoundsResponse {
    pub fn into_rounds(self) -> Vec<Round> {
        match self {
            RoundsResponse::Wrapped { rounds } => rounds,
            RoundsResponse::Bare(rounds) => rounds,
            RoundsResponse::Other(value) => {
                warn!(kind = json_kind(&value), "Unexpected rounds response shape");
                Vec::new()
            }
        }
    }
}
