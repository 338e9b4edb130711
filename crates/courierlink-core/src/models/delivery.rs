use serde::{Deserialize, Serialize};
use tracing::warn;

use super::string_or_number;

/// A single parcel delivery as reported by the courier API.
///
/// Only the fields the service reads are typed; everything else the
/// upstream sends is kept in `extra` so snapshots lose nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(alias = "deliveryId", default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(rename = "roundId", default, deserialize_with = "string_or_number")]
    pub round_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(rename = "deliveredAt", default)]
    pub delivered_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The deliveries endpoint answers either `{"deliveries": [...]}` or a
/// bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DeliveriesResponse {
    Wrapped { deliveries: Vec<Delivery> },
    Bare(Vec<Delivery>),
    Other(serde_json::Value),
}

impl DeliveriesResponse {
    pub fn into_deliveries(self) -> Vec<Delivery> {
        match self {
            DeliveriesResponse::Wrapped { deliveries } => deliveries,
            DeliveriesResponse::Bare(deliveries) => deliveries,
            DeliveriesResponse::Other(value) => {
                warn!(kind = json_kind(&value), "Unexpected deliveries response shape");
                Vec::new()
            }
        }
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
