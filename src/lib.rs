#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]
// Keep a single public error type for the SDK surface.
#![allow(clippy::result_large_err)]

//! Provider-agnostic realtime voice sessions.
//!
//! A [`RealtimeModel`] opens [`RealtimeSession`]s against a [`Backend`]. Each
//! session accepts a continuous stream of user audio, reports speech
//! boundaries and transcripts on an ordered event stream, and hands out
//! generations whose text, audio and function calls can be consumed
//! independently and interrupted at any time.
//!
//! ```no_run
//! use realtime_voice::{RealtimeCapabilities, RealtimeModel, WsBackend};
//!
//! # async fn run() -> realtime_voice::Result<()> {
//! let backend = WsBackend::new("wss://voice.example.com/realtime", RealtimeCapabilities::all())
//!     .api_key("sk-...");
//! let model = RealtimeModel::builder(backend)
//!     .instructions("You are a helpful assistant.")
//!     .build();
//!
//! let session = model.session().await?;
//! let mut reply = session.generate_reply(None).await?;
//! while let Some(mut message) = reply.message_stream.recv().await {
//!     while let Some(delta) = message.text_stream.recv().await {
//!         print!("{delta}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod error;
pub mod llm;
pub mod protocol;
pub mod realtime;
pub mod transport;
mod utils;

pub use audio::AudioFrame;
pub use error::{Error, Result, ServerError, ServerErrorType};
pub use llm::{
    ChatContext, ChatItem, ChatMessage, ChatRole, FunctionCall, FunctionCallOutput, FunctionTool, ToolChoice,
    ToolContext,
};
pub use protocol::{BackendEvent, BackendRequest, GenerationStatus, ToolSchema};
pub use realtime::{
    Backend, ErrorEvent, ErrorKind, GenerationCreatedEvent, InputSpeechStartedEvent, InputSpeechStoppedEvent,
    InputTranscriptionCompleted, MessageGeneration, RealtimeCapabilities, RealtimeEvent, RealtimeModel,
    RealtimeModelBuilder, RealtimeSession, ReplyFuture, SessionHandle, SessionOptions,
};
pub use transport::Transport;
pub use transport::channel::{BackendPeer, ChannelTransport};
pub use transport::ws::{WsBackend, WsTransport};
