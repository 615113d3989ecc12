use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::capabilities::RealtimeCapabilities;
use super::session::RealtimeSession;
use crate::llm::{ToolChoice, ToolContext};
use crate::transport::Transport;
use crate::{Error, Result};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// A generative backend that realtime sessions can be opened against.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Optional features the backend supports. Read once per model.
    fn capabilities(&self) -> RealtimeCapabilities;

    /// Open a fresh connection for one session.
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Release resources shared by every session.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Per-session configuration, cloned into every session a model opens.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long an acknowledged request may wait for the backend.
    pub ack_timeout: Duration,
    pub instructions: Option<String>,
    pub tools: ToolContext,
    pub tool_choice: Option<ToolChoice>,
    /// Ask the backend for user transcripts, if it can produce them.
    pub input_transcription: bool,
    /// Cancel the active generation as soon as the user starts speaking.
    pub auto_interrupt: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            instructions: None,
            tools: ToolContext::new(),
            tool_choice: None,
            input_transcription: true,
            auto_interrupt: false,
        }
    }
}

/// Factory for realtime sessions against one backend.
pub struct RealtimeModel {
    backend: Arc<dyn Backend>,
    capabilities: RealtimeCapabilities,
    options: SessionOptions,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl RealtimeModel {
    #[must_use]
    pub fn builder(backend: impl Backend + 'static) -> RealtimeModelBuilder {
        RealtimeModelBuilder::new(backend)
    }

    /// A model with default session options.
    #[must_use]
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::builder(backend).build()
    }

    #[must_use]
    pub const fn capabilities(&self) -> RealtimeCapabilities {
        self.capabilities
    }

    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open a new session. Configured instructions, tools and tool choice are
    /// pushed to the backend before the session is returned.
    ///
    /// # Errors
    /// Returns `Error::BackendUnavailable` if the backend cannot be reached,
    /// `Error::SessionClosed` if the model is closed, or the error of the
    /// first initial update that fails.
    pub async fn session(&self) -> Result<RealtimeSession> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let mut transport = self.backend.connect().await.map_err(|err| match err {
            Error::BackendUnavailable(_) => err,
            other => Error::BackendUnavailable(other.to_string()),
        })?;
        if self.is_closed() {
            let _ = transport.close().await;
            return Err(Error::SessionClosed);
        }

        let session = RealtimeSession::start(
            transport,
            self.capabilities,
            self.options.clone(),
            Some(self.shutdown.subscribe()),
        );
        if let Err(err) = self.configure(&session).await {
            tracing::warn!("Initial session configuration failed: {err}");
            let _ = session.close().await;
            return Err(err);
        }
        tracing::info!("Realtime session opened");
        Ok(session)
    }

    async fn configure(&self, session: &RealtimeSession) -> Result<()> {
        if let Some(instructions) = &self.options.instructions {
            session.update_instructions(instructions.clone()).await?;
        }
        if !self.options.tools.is_empty() {
            session.update_tools(self.options.tools.clone()).await?;
        }
        if self.options.tool_choice.is_some() {
            session.update_options(self.options.tool_choice.clone()).await?;
        }
        Ok(())
    }

    /// Close the model and every session it opened. Idempotent.
    ///
    /// # Errors
    /// Returns the backend's error if releasing its resources fails.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.send_replace(true);
        tracing::info!("Realtime model closed");
        self.backend.close().await
    }
}

impl std::fmt::Debug for RealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeModel")
            .field("capabilities", &self.capabilities)
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

pub struct RealtimeModelBuilder {
    backend: Arc<dyn Backend>,
    options: SessionOptions,
}

impl RealtimeModelBuilder {
    #[must_use]
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            options: SessionOptions::default(),
        }
    }

    #[must_use]
    pub const fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.options.ack_timeout = timeout;
        self
    }

    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.options.instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolContext) -> Self {
        self.options.tools = tools;
        self
    }

    #[must_use]
    pub fn tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.options.tool_choice = Some(tool_choice);
        self
    }

    #[must_use]
    pub const fn input_transcription(mut self, enabled: bool) -> Self {
        self.options.input_transcription = enabled;
        self
    }

    #[must_use]
    pub const fn auto_interrupt(mut self, enabled: bool) -> Self {
        self.options.auto_interrupt = enabled;
        self
    }

    /// Replace every session option at once.
    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn build(self) -> RealtimeModel {
        let capabilities = self.backend.capabilities();
        let (shutdown, _) = watch::channel(false);
        RealtimeModel {
            backend: self.backend,
            capabilities,
            options: self.options,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }
}
