//! Input line protocol.
//!
//! Each stdin line is one JSON-encoded event using snake_case field names.

use serde::{Deserialize, Serialize};

/// Object change read from stdin.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// Create or replace an object.
    Upsert {
        /// Object key
        id: String,
        /// Owning tenant, indexed
        tenant: String,
        /// Free-form desired state
        #[serde(default)]
        spec: serde_json::Value,
    },

    /// Remove an object.
    Delete {
        /// Object key
        id: String,
    },
}

impl InputEvent {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id } => id,
        }
    }
}
