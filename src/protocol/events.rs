use serde::{Deserialize, Serialize};

use super::GenerationStatus;
use crate::audio::AudioFrame;
use crate::error::ServerError;
use crate::llm::FunctionCall;

/// Events a backend reports to its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackendEvent {
    #[serde(rename = "request.ack")]
    Ack { request_id: String },
    #[serde(rename = "request.rejected")]
    Rejected {
        request_id: String,
        error: ServerError,
    },
    #[serde(rename = "input_speech.started")]
    SpeechStarted { item_id: String },
    #[serde(rename = "input_speech.stopped")]
    SpeechStopped { item_id: String },
    #[serde(rename = "input_audio.committed")]
    AudioCommitted { item_id: String },
    #[serde(rename = "input_transcription.completed")]
    TranscriptionCompleted { item_id: String, transcript: String },
    /// A generation opened. `request_id` is set when it answers `generation.create`.
    #[serde(rename = "generation.started")]
    GenerationStarted {
        generation_id: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    #[serde(rename = "generation.message_added")]
    MessageAdded {
        generation_id: String,
        message_id: String,
    },
    #[serde(rename = "generation.text_delta")]
    TextDelta {
        generation_id: String,
        message_id: String,
        delta: String,
    },
    #[serde(rename = "generation.audio_delta")]
    AudioDelta {
        generation_id: String,
        message_id: String,
        frame: AudioFrame,
    },
    #[serde(rename = "generation.message_done")]
    MessageDone {
        generation_id: String,
        message_id: String,
    },
    #[serde(rename = "generation.function_call")]
    FunctionCall {
        generation_id: String,
        call: FunctionCall,
    },
    #[serde(rename = "generation.done")]
    GenerationDone {
        generation_id: String,
        status: GenerationStatus,
    },
    /// The backend shortened a message after `message.truncate`; `text` is what remains.
    #[serde(rename = "message.truncated")]
    MessageTruncated { message_id: String, text: String },
    #[serde(rename = "error")]
    Error { error: ServerError },
    #[serde(other)]
    Unknown,
}

impl BackendEvent {
    /// Generation the event belongs to, if any.
    #[must_use]
    pub fn generation_id(&self) -> Option<&str> {
        match self {
            Self::GenerationStarted { generation_id, .. }
            | Self::MessageAdded { generation_id, .. }
            | Self::TextDelta { generation_id, .. }
            | Self::AudioDelta { generation_id, .. }
            | Self::MessageDone { generation_id, .. }
            | Self::FunctionCall { generation_id, .. }
            | Self::GenerationDone { generation_id, .. } => Some(generation_id),
            _ => None,
        }
    }
}
