//! Provider-neutral messages exchanged between a session and its backend.
//!
//! Both directions are internally tagged JSON objects (`{"type": "generation.create", ...}`)
//! so any transport that can carry text frames can carry them.

mod events;
mod requests;

pub use events::BackendEvent;
pub use requests::BackendRequest;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire form of a function tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool parameters (intentionally untyped).
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    #[default]
    Open,
    Completed,
    Cancelled,
    Failed,
}

impl GenerationStatus {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        !matches!(self, Self::Open)
    }
}
