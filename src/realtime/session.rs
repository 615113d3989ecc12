use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use super::capabilities::RealtimeCapabilities;
use super::engine::{Command, SessionEngine, SessionShared, SessionSnapshot, Update};
use super::events::{EventStream, RealtimeEvent};
use super::generation::GenerationCreatedEvent;
use super::model::SessionOptions;
use crate::audio::AudioFrame;
use crate::llm::{ChatContext, ToolChoice, ToolContext};
use crate::transport::Transport;
use crate::{Error, Result};

/// Resolves once the requested generation has started.
pub type ReplyFuture = Pin<Box<dyn Future<Output = Result<GenerationCreatedEvent>> + Send>>;

/// Cloneable control surface of a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<SessionShared>,
    capabilities: RealtimeCapabilities,
    model_closed: Option<watch::Receiver<bool>>,
}

impl SessionHandle {
    #[must_use]
    pub const fn capabilities(&self) -> RealtimeCapabilities {
        self.capabilities
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed() || self.model_closed.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Append user audio. Never waits.
    ///
    /// # Errors
    /// Returns `Error::SessionClosed` if the session is closed.
    pub fn push_audio(&self, frame: AudioFrame) -> Result<()> {
        self.submit(Command::PushAudio(frame))
    }

    /// Commit buffered audio as a user turn. An empty buffer is reported on
    /// the event stream rather than here.
    ///
    /// # Errors
    /// Returns `Error::SessionClosed` if the session is closed.
    pub fn commit_input_audio(&self) -> Result<()> {
        self.submit(Command::CommitAudio)
    }

    /// Drop audio buffered since the last commit.
    ///
    /// # Errors
    /// Returns `Error::SessionClosed` if the session is closed.
    pub fn clear_input_audio(&self) -> Result<()> {
        self.submit(Command::ClearAudio)
    }

    /// # Errors
    /// Returns `Error::BackendTimeout` if the backend does not acknowledge in
    /// time, `Error::Backend` if it rejects the update, or `Error::SessionClosed`.
    pub async fn update_instructions(&self, instructions: impl Into<String>) -> Result<()> {
        self.update(Update::Instructions(instructions.into())).await
    }

    /// Replace the conversation history. Held back while a generation is open.
    ///
    /// # Errors
    /// Returns `Error::InvalidChatContext` for a malformed history, otherwise
    /// the same errors as [`Self::update_instructions`].
    pub async fn update_chat_ctx(&self, chat_ctx: ChatContext) -> Result<()> {
        chat_ctx.validate()?;
        self.update(Update::ChatContext(chat_ctx)).await
    }

    /// Replace the tool set. Held back while a generation is open.
    ///
    /// # Errors
    /// Same as [`Self::update_instructions`].
    pub async fn update_tools(&self, tools: ToolContext) -> Result<()> {
        self.update(Update::Tools(tools)).await
    }

    /// Set the tool choice; `None` restores the backend default.
    ///
    /// # Errors
    /// Same as [`Self::update_instructions`].
    pub async fn update_options(&self, tool_choice: Option<ToolChoice>) -> Result<()> {
        self.update(Update::Options(tool_choice)).await
    }

    /// Ask the backend to reply now, interrupting any open generation.
    ///
    /// The request is submitted immediately; the returned future resolves
    /// when the backend starts the generation. If the future is dropped
    /// first, the generation is delivered on the event stream instead.
    pub fn generate_reply(&self, instructions: Option<String>) -> ReplyFuture {
        let submitted = self.submit_with(|respond| Command::GenerateReply { instructions, respond });
        Box::pin(async move { submitted?.await.map_err(|_| Error::SessionClosed)? })
    }

    /// Cancel the open generation. A no-op if nothing is generating.
    ///
    /// # Errors
    /// Returns `Error::SessionClosed` if the session is closed.
    pub fn interrupt(&self) -> Result<()> {
        self.submit(Command::Interrupt)
    }

    /// Cut an assistant message at `audio_end_ms`, e.g. what the user heard
    /// before interrupting.
    ///
    /// # Errors
    /// Returns `Error::SessionClosed`, `Error::UnsupportedOperation` if the
    /// backend cannot truncate, or `Error::InvalidReference` if the message
    /// is not from one of the two most recent generations.
    pub fn truncate(&self, message_id: &str, audio_end_ms: u32) -> Result<()> {
        self.ensure_open()?;
        if !self.capabilities.message_truncation {
            return Err(Error::UnsupportedOperation("truncate"));
        }
        if !self.shared.ledger().contains(message_id) {
            return Err(Error::InvalidReference(format!("unknown message: {message_id}")));
        }
        self.submit(Command::Truncate {
            message_id: message_id.to_string(),
            audio_end_ms,
        })
    }

    /// # Errors
    /// Returns `Error::SessionClosed` if the session is closed.
    pub async fn chat_ctx(&self) -> Result<ChatContext> {
        Ok(self.snapshot().await?.chat_ctx)
    }

    /// # Errors
    /// Returns `Error::SessionClosed` if the session is closed.
    pub async fn tools(&self) -> Result<ToolContext> {
        Ok(self.snapshot().await?.tools)
    }

    /// # Errors
    /// Returns `Error::SessionClosed` if the session is closed.
    pub async fn instructions(&self) -> Result<Option<String>> {
        Ok(self.snapshot().await?.instructions)
    }

    /// # Errors
    /// Returns `Error::SessionClosed` if the session is closed.
    pub async fn tool_choice(&self) -> Result<Option<ToolChoice>> {
        Ok(self.snapshot().await?.tool_choice)
    }

    /// Close the session. Pending calls fail with `Error::SessionClosed`.
    /// Idempotent.
    ///
    /// # Errors
    /// Never fails at present.
    pub async fn close(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
        Ok(())
    }

    async fn update(&self, update: Update) -> Result<()> {
        let rx = self.submit_with(|respond| Command::Update { update, respond })?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Snapshot(tx))?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    fn submit_with<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<oneshot::Receiver<Result<T>>> {
        let (tx, rx) = oneshot::channel();
        self.submit(command(tx))?;
        Ok(rx)
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.ensure_open()?;
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }
}

/// A live session: the control handle plus its ordered event stream.
///
/// Dropping the session and every cloned [`SessionHandle`] closes it.
#[derive(Debug)]
pub struct RealtimeSession {
    handle: SessionHandle,
    events: mpsc::UnboundedReceiver<RealtimeEvent>,
}

impl RealtimeSession {
    /// Run a session over an already established transport.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_transport(
        transport: impl Transport + 'static,
        capabilities: RealtimeCapabilities,
        options: SessionOptions,
    ) -> Self {
        Self::start(Box::new(transport), capabilities, options, None)
    }

    pub(crate) fn start(
        transport: Box<dyn Transport>,
        capabilities: RealtimeCapabilities,
        options: SessionOptions,
        model_closed: Option<watch::Receiver<bool>>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared::default());

        let mut engine = SessionEngine::new(
            transport,
            command_rx,
            event_tx,
            Arc::clone(&shared),
            capabilities,
            options,
        );
        if let Some(shutdown) = &model_closed {
            engine = engine.with_shutdown(shutdown.clone());
        }
        tokio::spawn(engine.run());

        Self {
            handle: SessionHandle {
                commands: command_tx,
                shared,
                capabilities,
                model_closed,
            },
            events: event_rx,
        }
    }

    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Await the next session event; `None` once the session has shut down
    /// and every event was delivered.
    pub async fn next_event(&mut self) -> Option<RealtimeEvent> {
        self.events.recv().await
    }

    /// Stream session events.
    #[must_use]
    pub fn events(&mut self) -> EventStream<'_> {
        EventStream::new(&mut self.events)
    }
}

impl Deref for RealtimeSession {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}
