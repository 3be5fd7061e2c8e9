//! Typing indicator records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reads `{typing}` from a `typing/{uid}` snapshot. Only a literal `true` counts.
pub fn is_typing(value: &Value) -> bool {
    matches!(value.get("typing"), Some(Value::Bool(true)))
}

/// One row of the "N people typing" list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEntry {
    pub uid: String,
    pub last_seen: i64,
}
