use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single entry in a topic's log. Never mutated after write, except for
/// the tombstone stamp set by the reclamation sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "id")]
    pub id: i64,
    #[serde(rename = "data")]
    pub data: serde_json::Value,
    #[serde(rename = "created", with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(
        rename = "tombstone",
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tombstone: Option<OffsetDateTime>,
}

impl Message {
    #[must_use]
    pub fn new(id: i64, data: serde_json::Value, created: OffsetDateTime) -> Self {
        Self {
            id,
            data,
            created,
            tombstone: None,
        }
    }
}
