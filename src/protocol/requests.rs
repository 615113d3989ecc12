use serde::{Deserialize, Serialize};

use super::ToolSchema;
use crate::audio::AudioFrame;
use crate::llm::{ChatContext, ToolChoice};

/// Requests a session sends to its backend.
///
/// Requests that expect an acknowledgment carry a `request_id`; the backend
/// answers with `BackendEvent::Ack`/`Rejected` (or `GenerationStarted` for
/// `CreateGeneration`) quoting the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackendRequest {
    #[serde(rename = "input_audio.append")]
    AppendAudio { frame: AudioFrame },
    #[serde(rename = "input_audio.commit")]
    CommitAudio,
    #[serde(rename = "input_audio.clear")]
    ClearAudio,
    #[serde(rename = "instructions.update")]
    UpdateInstructions {
        request_id: String,
        instructions: String,
    },
    #[serde(rename = "chat_context.update")]
    UpdateChatContext {
        request_id: String,
        chat_ctx: ChatContext,
    },
    #[serde(rename = "tools.update")]
    UpdateTools {
        request_id: String,
        tools: Vec<ToolSchema>,
    },
    #[serde(rename = "options.update")]
    UpdateOptions {
        request_id: String,
        /// `None` restores the backend's default choice.
        tool_choice: Option<ToolChoice>,
    },
    #[serde(rename = "generation.create")]
    CreateGeneration {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
    },
    #[serde(rename = "generation.cancel")]
    CancelGeneration { generation_id: String },
    #[serde(rename = "message.truncate")]
    TruncateMessage { message_id: String, audio_end_ms: u32 },
}

impl BackendRequest {
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::UpdateInstructions { request_id, .. }
            | Self::UpdateChatContext { request_id, .. }
            | Self::UpdateTools { request_id, .. }
            | Self::UpdateOptions { request_id, .. }
            | Self::CreateGeneration { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    /// Short label used in logs and timeout errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AppendAudio { .. } => "input_audio.append",
            Self::CommitAudio => "input_audio.commit",
            Self::ClearAudio => "input_audio.clear",
            Self::UpdateInstructions { .. } => "instructions.update",
            Self::UpdateChatContext { .. } => "chat_context.update",
            Self::UpdateTools { .. } => "tools.update",
            Self::UpdateOptions { .. } => "options.update",
            Self::CreateGeneration { .. } => "generation.create",
            Self::CancelGeneration { .. } => "generation.cancel",
            Self::TruncateMessage { .. } => "message.truncate",
        }
    }
}
