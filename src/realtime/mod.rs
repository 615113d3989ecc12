//! Realtime sessions: continuous audio in, concurrent generations out.

mod capabilities;
mod engine;
mod events;
mod generation;
mod model;
mod session;

pub use capabilities::RealtimeCapabilities;
pub use events::{
    ErrorEvent, ErrorKind, EventStream, InputSpeechStartedEvent, InputSpeechStoppedEvent, InputTranscriptionCompleted,
    RealtimeEvent,
};
pub use generation::{
    AudioStream, ChannelStream, FunctionStream, GenerationCreatedEvent, MessageGeneration, MessageStream, TextStream,
};
pub use model::{Backend, DEFAULT_ACK_TIMEOUT, RealtimeModel, RealtimeModelBuilder, SessionOptions};
pub use session::{RealtimeSession, ReplyFuture, SessionHandle};
