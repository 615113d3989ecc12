use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::generation::GenerationCreatedEvent;
use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpeechStartedEvent {
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpeechStoppedEvent {
    pub item_id: String,
    /// A transcription for `item_id` will follow.
    pub user_transcription_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTranscriptionCompleted {
    pub item_id: String,
    pub transcript: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reported by the backend outside of any request.
    Backend,
    /// `commit_input_audio` with nothing buffered.
    EmptyAudioBuffer,
    /// The backend broke the event ordering contract.
    Protocol,
    /// The connection to the backend failed.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<String>,
}

impl ErrorEvent {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }
}

impl From<ServerError> for ErrorEvent {
    fn from(error: ServerError) -> Self {
        Self {
            kind: ErrorKind::Backend,
            message: error.message,
            code: error.code,
        }
    }
}

/// Everything a session reports outside of direct call results, in order.
#[derive(Debug)]
pub enum RealtimeEvent {
    InputSpeechStarted(InputSpeechStartedEvent),
    InputSpeechStopped(InputSpeechStoppedEvent),
    InputTranscriptionCompleted(InputTranscriptionCompleted),
    /// A generation the backend started on its own, or one whose reply
    /// future was dropped before it started.
    ///
    /// Replies requested through `generate_reply` are handed to that future
    /// instead, so they never appear here: a generation's streams have a
    /// single reader. Automatic generations still arrive in the order they
    /// were opened.
    GenerationCreated(GenerationCreatedEvent),
    Error(ErrorEvent),
}

impl RealtimeEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InputSpeechStarted(_) => "input_speech_started",
            Self::InputSpeechStopped(_) => "input_speech_stopped",
            Self::InputTranscriptionCompleted(_) => "input_audio_transcription_completed",
            Self::GenerationCreated(_) => "generation_created",
            Self::Error(_) => "error",
        }
    }
}

pub struct EventStream<'a> {
    rx: &'a mut mpsc::UnboundedReceiver<RealtimeEvent>,
}

impl<'a> EventStream<'a> {
    #[must_use]
    pub const fn new(rx: &'a mut mpsc::UnboundedReceiver<RealtimeEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for EventStream<'_> {
    type Item = RealtimeEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.rx.poll_recv(cx)
    }
}
