//! The per-session actor.
//!
//! A single task owns every piece of session state: history, tools, the
//! active generation, requests awaiting acknowledgment and the input speech
//! state. Handles talk to it through an unbounded command queue, so commands
//! are applied strictly in submission order and non-suspending operations
//! never wait on the backend.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};

use super::capabilities::RealtimeCapabilities;
use super::events::{
    ErrorEvent, ErrorKind, InputSpeechStartedEvent, InputSpeechStoppedEvent, InputTranscriptionCompleted,
    RealtimeEvent,
};
use super::generation::{GenerationCreatedEvent, GenerationWriter, MessageLedger};
use super::model::SessionOptions;
use crate::audio::AudioFrame;
use crate::error::ServerError;
use crate::llm::{ChatContext, ChatItem, ChatMessage, ChatRole, ToolChoice, ToolContext};
use crate::protocol::{BackendEvent, BackendRequest, GenerationStatus};
use crate::transport::Transport;
use crate::utils::short_id;
use crate::{Error, Result};

/// State visible to both the actor and its handles.
#[derive(Debug, Default)]
pub(crate) struct SessionShared {
    closed: AtomicBool,
    ledger: Mutex<MessageLedger>,
}

impl SessionShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ledger(&self) -> MutexGuard<'_, MessageLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A configuration replacement that needs the backend's acknowledgment.
#[derive(Debug)]
pub(crate) enum Update {
    Instructions(String),
    ChatContext(ChatContext),
    Tools(ToolContext),
    Options(Option<ToolChoice>),
}

impl Update {
    /// History and tool replacements must not land in the middle of a generation.
    const fn waits_for_generation(&self) -> bool {
        matches!(self, Self::ChatContext(_) | Self::Tools(_))
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Instructions(_) => "instructions.update",
            Self::ChatContext(_) => "chat_context.update",
            Self::Tools(_) => "tools.update",
            Self::Options(_) => "options.update",
        }
    }

    fn to_request(&self, request_id: String) -> BackendRequest {
        match self {
            Self::Instructions(instructions) => BackendRequest::UpdateInstructions {
                request_id,
                instructions: instructions.clone(),
            },
            Self::ChatContext(chat_ctx) => BackendRequest::UpdateChatContext {
                request_id,
                chat_ctx: chat_ctx.clone(),
            },
            Self::Tools(tools) => BackendRequest::UpdateTools {
                request_id,
                tools: tools.schemas(),
            },
            Self::Options(tool_choice) => BackendRequest::UpdateOptions {
                request_id,
                tool_choice: tool_choice.clone(),
            },
        }
    }
}

/// Point-in-time copy of the session configuration.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionSnapshot {
    pub(crate) instructions: Option<String>,
    pub(crate) chat_ctx: ChatContext,
    pub(crate) tools: ToolContext,
    pub(crate) tool_choice: Option<ToolChoice>,
}

#[derive(Debug)]
pub(crate) enum Command {
    PushAudio(AudioFrame),
    CommitAudio,
    ClearAudio,
    Update {
        update: Update,
        respond: oneshot::Sender<Result<()>>,
    },
    GenerateReply {
        instructions: Option<String>,
        respond: oneshot::Sender<Result<GenerationCreatedEvent>>,
    },
    Interrupt,
    Truncate {
        message_id: String,
        audio_end_ms: u32,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Close(oneshot::Sender<()>),
}

impl Command {
    /// Answer a command that arrived after shutdown.
    fn reject(self) {
        match self {
            Self::Update { respond, .. } => {
                let _ = respond.send(Err(Error::SessionClosed));
            }
            Self::GenerateReply { respond, .. } => {
                let _ = respond.send(Err(Error::SessionClosed));
            }
            Self::Close(respond) => {
                let _ = respond.send(());
            }
            _ => {}
        }
    }
}

enum PendingKind {
    Update {
        update: Update,
        respond: oneshot::Sender<Result<()>>,
    },
    Reply {
        respond: oneshot::Sender<Result<GenerationCreatedEvent>>,
    },
}

impl PendingKind {
    fn fail(self, err: Error) {
        match self {
            Self::Update { respond, .. } => {
                let _ = respond.send(Err(err));
            }
            Self::Reply { respond } => {
                let _ = respond.send(Err(err));
            }
        }
    }
}

struct PendingRequest {
    name: &'static str,
    deadline: Instant,
    kind: PendingKind,
}

/// An update held back until the active generation closes. The deadline runs from submission.
struct QueuedUpdate {
    update: Update,
    respond: oneshot::Sender<Result<()>>,
    deadline: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SpeechState {
    Idle,
    AwaitingSpeech,
    SpeechActive { item_id: String },
    AwaitingTranscription { item_id: String },
}

pub(crate) struct SessionEngine {
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<RealtimeEvent>,
    shutdown: Option<watch::Receiver<bool>>,
    shared: Arc<SessionShared>,
    capabilities: RealtimeCapabilities,
    options: SessionOptions,

    instructions: Option<String>,
    chat_ctx: ChatContext,
    tools: ToolContext,
    tool_choice: Option<ToolChoice>,

    generation: Option<GenerationWriter>,
    pending: HashMap<String, PendingRequest>,
    queued: VecDeque<QueuedUpdate>,

    speech: SpeechState,
    buffered_samples: u64,
    awaiting_transcripts: HashSet<String>,
    finished: bool,
}

impl SessionEngine {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<RealtimeEvent>,
        shared: Arc<SessionShared>,
        capabilities: RealtimeCapabilities,
        options: SessionOptions,
    ) -> Self {
        Self {
            transport,
            commands,
            events,
            shutdown: None,
            shared,
            capabilities,
            options,
            instructions: None,
            chat_ctx: ChatContext::new(),
            tools: ToolContext::new(),
            tool_choice: None,
            generation: None,
            pending: HashMap::new(),
            queued: VecDeque::new(),
            speech: SpeechState::Idle,
            buffered_samples: 0,
            awaiting_transcripts: HashSet::new(),
            finished: false,
        }
    }

    /// Tie the session to its model: once the flag turns `true` the session shuts down.
    pub(crate) fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!("Session engine started");
        while !self.finished {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                () = shutdown_requested(self.shutdown.as_mut()) => {
                    tracing::info!("Model closed, shutting down session");
                    self.shutdown().await;
                }
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        tracing::debug!("All session handles dropped");
                        self.shutdown().await;
                    }
                },
                event = self.transport.next_event() => match event {
                    Ok(Some(event)) => self.handle_backend_event(event).await,
                    Ok(None) => self.transport_lost("backend closed the connection".to_string()).await,
                    Err(Error::Serialization(err)) => {
                        tracing::warn!("Dropping malformed backend event: {err}");
                        self.emit_error(ErrorEvent::new(ErrorKind::Protocol, format!("malformed event: {err}")));
                    }
                    Err(err) => self.transport_lost(err.to_string()).await,
                },
                () = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire_pending();
                }
            }
        }
        tracing::debug!("Session engine stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::PushAudio(frame) => {
                if self.speech == SpeechState::Idle {
                    self.speech = SpeechState::AwaitingSpeech;
                }
                self.buffered_samples += u64::from(frame.samples_per_channel());
                self.send(BackendRequest::AppendAudio { frame }).await;
            }
            Command::CommitAudio => {
                if self.buffered_samples == 0 {
                    tracing::warn!("Commit requested with an empty input audio buffer");
                    self.emit_error(ErrorEvent::new(
                        ErrorKind::EmptyAudioBuffer,
                        "no input audio buffered since the last commit",
                    ));
                    return;
                }
                self.buffered_samples = 0;
                self.send(BackendRequest::CommitAudio).await;
            }
            Command::ClearAudio => {
                self.buffered_samples = 0;
                if self.speech == SpeechState::AwaitingSpeech {
                    self.speech = SpeechState::Idle;
                }
                self.send(BackendRequest::ClearAudio).await;
            }
            Command::Update { update, respond } => {
                let deadline = Instant::now() + self.options.ack_timeout;
                if !self.queued.is_empty() || (update.waits_for_generation() && self.generation_open()) {
                    tracing::debug!("Queueing {} until the active generation ends", update.name());
                    self.queued.push_back(QueuedUpdate {
                        update,
                        respond,
                        deadline,
                    });
                } else {
                    self.send_update(update, respond, deadline).await;
                }
            }
            Command::GenerateReply { instructions, respond } => {
                self.interrupt_active().await;
                if self.finished {
                    let _ = respond.send(Err(Error::SessionClosed));
                    return;
                }
                let request_id = short_id("req_");
                let request = BackendRequest::CreateGeneration {
                    request_id: request_id.clone(),
                    instructions,
                };
                let deadline = Instant::now() + self.options.ack_timeout;
                self.send_tracked(request_id, request, deadline, PendingKind::Reply { respond })
                    .await;
            }
            Command::Interrupt => {
                if self.generation_open() {
                    self.interrupt_active().await;
                } else {
                    tracing::debug!("Interrupt with no active generation");
                }
            }
            Command::Truncate {
                message_id,
                audio_end_ms,
            } => {
                self.send(BackendRequest::TruncateMessage {
                    message_id,
                    audio_end_ms,
                })
                .await;
            }
            Command::Snapshot(respond) => {
                let _ = respond.send(SessionSnapshot {
                    instructions: self.instructions.clone(),
                    chat_ctx: self.chat_ctx.clone(),
                    tools: self.tools.clone(),
                    tool_choice: self.tool_choice.clone(),
                });
            }
            Command::Close(respond) => {
                self.shutdown().await;
                let _ = respond.send(());
            }
        }
    }

    async fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Ack { request_id } => self.handle_ack(&request_id),
            BackendEvent::Rejected { request_id, error } => self.handle_rejected(&request_id, error),
            BackendEvent::SpeechStarted { item_id } => {
                if let SpeechState::SpeechActive { item_id: open } = &self.speech {
                    tracing::warn!("Speech {item_id} started while {open} was still open");
                    let open = open.clone();
                    self.emit(RealtimeEvent::InputSpeechStopped(InputSpeechStoppedEvent {
                        item_id: open,
                        user_transcription_enabled: false,
                    }));
                }
                self.speech = SpeechState::SpeechActive {
                    item_id: item_id.clone(),
                };
                self.emit(RealtimeEvent::InputSpeechStarted(InputSpeechStartedEvent { item_id }));
                if self.options.auto_interrupt && self.generation_open() {
                    tracing::debug!("User started speaking, interrupting the active generation");
                    self.interrupt_active().await;
                }
            }
            BackendEvent::SpeechStopped { item_id } => {
                if !matches!(&self.speech, SpeechState::SpeechActive { item_id: open } if *open == item_id) {
                    tracing::warn!("Speech {item_id} stopped without a matching start");
                    self.emit_error(ErrorEvent::new(
                        ErrorKind::Protocol,
                        format!("speech stopped without a matching start: {item_id}"),
                    ));
                    return;
                }
                self.buffered_samples = 0;
                let user_transcription_enabled = self.transcription_enabled();
                if user_transcription_enabled {
                    self.awaiting_transcripts.insert(item_id.clone());
                    self.speech = SpeechState::AwaitingTranscription {
                        item_id: item_id.clone(),
                    };
                } else {
                    self.speech = SpeechState::Idle;
                }
                self.emit(RealtimeEvent::InputSpeechStopped(InputSpeechStoppedEvent {
                    item_id,
                    user_transcription_enabled,
                }));
            }
            BackendEvent::AudioCommitted { item_id } => {
                tracing::debug!("Input audio committed as {item_id}");
                self.buffered_samples = 0;
                if self.transcription_enabled() {
                    self.awaiting_transcripts.insert(item_id);
                }
            }
            BackendEvent::TranscriptionCompleted { item_id, transcript } => {
                if !self.awaiting_transcripts.remove(&item_id) {
                    tracing::warn!("Transcript for {item_id} arrived without a committed segment");
                    self.emit_error(ErrorEvent::new(
                        ErrorKind::Protocol,
                        format!("transcript for an unknown or untranscribed segment: {item_id}"),
                    ));
                    return;
                }
                if matches!(&self.speech, SpeechState::AwaitingTranscription { item_id: open } if *open == item_id) {
                    self.speech = SpeechState::Idle;
                }
                self.record_transcript(&item_id, &transcript);
                self.emit(RealtimeEvent::InputTranscriptionCompleted(InputTranscriptionCompleted {
                    item_id,
                    transcript,
                }));
            }
            BackendEvent::GenerationStarted {
                generation_id,
                request_id,
            } => self.start_generation(generation_id, request_id).await,
            BackendEvent::MessageAdded {
                generation_id,
                message_id,
            } => {
                if let Some(writer) = active_writer(&mut self.generation, &generation_id) {
                    // Recorded first so the id is truncatable once the caller sees it.
                    self.shared.ledger().record(&generation_id, &message_id);
                    writer.add_message(&message_id);
                    tracing::trace!("Message {message_id} added to {generation_id}");
                }
            }
            BackendEvent::TextDelta {
                generation_id,
                message_id,
                delta,
            } => {
                if let Some(writer) = active_writer(&mut self.generation, &generation_id) {
                    writer.push_text(&message_id, delta);
                }
            }
            BackendEvent::AudioDelta {
                generation_id,
                message_id,
                frame,
            } => {
                if let Some(writer) = active_writer(&mut self.generation, &generation_id) {
                    writer.push_audio(&message_id, frame);
                }
            }
            BackendEvent::MessageDone {
                generation_id,
                message_id,
            } => {
                if let Some(writer) = active_writer(&mut self.generation, &generation_id) {
                    writer.finish_message(&message_id);
                }
            }
            BackendEvent::FunctionCall { generation_id, call } => {
                if let Some(writer) = active_writer(&mut self.generation, &generation_id) {
                    tracing::debug!("Function call {} ({})", call.name, call.call_id);
                    writer.push_function_call(call);
                }
            }
            BackendEvent::GenerationDone {
                generation_id,
                status,
            } => self.finish_generation(&generation_id, status).await,
            BackendEvent::MessageTruncated { message_id, text } => {
                match self.chat_ctx.get_mut(&message_id) {
                    Some(ChatItem::Message(msg)) => {
                        msg.content = vec![text];
                        msg.interrupted = true;
                    }
                    _ => tracing::debug!("Truncated message {message_id} is not in the chat context"),
                }
            }
            BackendEvent::Error { error } => {
                tracing::warn!("Backend error: {error}");
                self.emit_error(error.into());
            }
            BackendEvent::Unknown => tracing::trace!("Ignoring unknown backend event"),
        }
    }

    fn handle_ack(&mut self, request_id: &str) {
        if matches!(
            self.pending.get(request_id),
            Some(PendingRequest {
                kind: PendingKind::Reply { .. },
                ..
            })
        ) {
            // Replies resolve on generation start.
            return;
        }
        let Some(pending) = self.pending.remove(request_id) else {
            tracing::debug!("Ignoring ack for unknown or expired request {request_id}");
            return;
        };
        tracing::debug!("Backend acknowledged {} ({request_id})", pending.name);
        if let PendingKind::Update { update, respond } = pending.kind {
            self.apply(update);
            let _ = respond.send(Ok(()));
        }
    }

    fn handle_rejected(&mut self, request_id: &str, error: ServerError) {
        match self.pending.remove(request_id) {
            Some(pending) => {
                tracing::warn!("Backend rejected {} ({request_id}): {error}", pending.name);
                pending.kind.fail(Error::Backend(error));
            }
            None => {
                tracing::warn!("Backend rejected unknown request {request_id}: {error}");
                self.emit_error(error.into());
            }
        }
    }

    fn apply(&mut self, update: Update) {
        match update {
            Update::Instructions(instructions) => self.instructions = Some(instructions),
            Update::ChatContext(chat_ctx) => self.chat_ctx = chat_ctx,
            Update::Tools(tools) => self.tools = tools,
            Update::Options(tool_choice) => self.tool_choice = tool_choice,
        }
    }

    async fn start_generation(&mut self, generation_id: String, request_id: Option<String>) {
        if self.generation_open() {
            tracing::debug!("Generation {generation_id} supersedes the active generation");
            self.close_generation(GenerationStatus::Cancelled).await;
        }

        let reply = match request_id.as_deref().map(|id| self.pending.remove(id)) {
            Some(Some(PendingRequest {
                kind: PendingKind::Reply { respond },
                ..
            })) => Some(respond),
            Some(Some(other)) => {
                // Not a reply request after all; put it back untouched.
                if let Some(id) = &request_id {
                    self.pending.insert(id.clone(), other);
                }
                None
            }
            _ => None,
        };
        let user_initiated = request_id.is_some();

        self.shared.ledger().begin(&generation_id);
        let (writer, event) = GenerationWriter::open(generation_id.clone(), user_initiated);
        self.generation = Some(writer);
        tracing::info!(user_initiated, "Generation {generation_id} started");

        match reply {
            Some(respond) => match respond.send(Ok(event)) {
                Ok(()) => {}
                Err(Ok(event)) => self.emit(RealtimeEvent::GenerationCreated(event)),
                Err(Err(_)) => {}
            },
            None => self.emit(RealtimeEvent::GenerationCreated(event)),
        }
    }

    async fn finish_generation(&mut self, generation_id: &str, status: GenerationStatus) {
        let Some(writer) = self.generation.as_ref().filter(|writer| writer.id() == generation_id) else {
            tracing::trace!("Ignoring completion of unknown generation {generation_id}");
            return;
        };
        if writer.is_open() {
            self.close_generation(status).await;
        } else {
            writer.settle(status);
        }
        tracing::info!(?status, "Generation {generation_id} done");
        self.generation = None;
    }

    /// Cancel the open generation, if any, and tell the backend.
    async fn interrupt_active(&mut self) {
        let Some(writer) = self.generation.as_mut().filter(|writer| writer.is_open()) else {
            return;
        };
        let generation_id = writer.id().to_string();
        tracing::info!("Interrupting generation {generation_id}");
        let items = writer.close(GenerationStatus::Cancelled);
        self.append_history(items);
        self.send(BackendRequest::CancelGeneration { generation_id }).await;
        self.flush_queued().await;
    }

    /// Close the open generation's streams and release queued updates.
    async fn close_generation(&mut self, status: GenerationStatus) {
        let Some(writer) = self.generation.as_mut() else {
            return;
        };
        let items = writer.close(status);
        self.append_history(items);
        self.flush_queued().await;
    }

    async fn flush_queued(&mut self) {
        let now = Instant::now();
        while let Some(QueuedUpdate {
            update,
            respond,
            deadline,
        }) = self.queued.pop_front()
        {
            if self.finished {
                let _ = respond.send(Err(Error::SessionClosed));
            } else if deadline <= now {
                tracing::warn!("{} expired before it could be sent", update.name());
                let _ = respond.send(Err(Error::BackendTimeout(update.name())));
            } else {
                self.send_update(update, respond, deadline).await;
            }
        }
    }

    async fn send_update(&mut self, update: Update, respond: oneshot::Sender<Result<()>>, deadline: Instant) {
        let request_id = short_id("req_");
        let request = update.to_request(request_id.clone());
        self.send_tracked(request_id, request, deadline, PendingKind::Update { update, respond })
            .await;
    }

    /// Send a request that must be acknowledged by `deadline`.
    async fn send_tracked(
        &mut self,
        request_id: String,
        request: BackendRequest,
        deadline: Instant,
        kind: PendingKind,
    ) {
        let name = request.name();
        tracing::debug!("Sending {name} ({request_id})");
        match self.transport.send(request).await {
            Ok(()) => {
                self.pending.insert(request_id, PendingRequest { name, deadline, kind });
            }
            Err(err) => {
                let reason = err.to_string();
                kind.fail(err);
                self.transport_lost(reason).await;
            }
        }
    }

    async fn send(&mut self, request: BackendRequest) {
        let name = request.name();
        if let Err(err) = self.transport.send(request).await {
            tracing::warn!("Failed to send {name}: {err}");
            self.transport_lost(err.to_string()).await;
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|pending| pending.deadline)
            .chain(self.queued.iter().map(|queued| queued.deadline))
            .min()
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in expired {
            if let Some(pending) = self.pending.remove(&request_id) {
                tracing::warn!("Backend did not acknowledge {} ({request_id}) in time", pending.name);
                pending.kind.fail(Error::BackendTimeout(pending.name));
            }
        }

        let (expired, waiting): (VecDeque<_>, VecDeque<_>) =
            self.queued.drain(..).partition(|queued| queued.deadline <= now);
        self.queued = waiting;
        for QueuedUpdate { update, respond, .. } in expired {
            tracing::warn!("{} timed out while queued behind the active generation", update.name());
            let _ = respond.send(Err(Error::BackendTimeout(update.name())));
        }
    }

    fn record_transcript(&mut self, item_id: &str, transcript: &str) {
        match self.chat_ctx.get_mut(item_id) {
            Some(ChatItem::Message(msg)) => msg.content = vec![transcript.to_string()],
            Some(_) => tracing::warn!("Transcript {item_id} collides with a non-message item"),
            None => {
                let msg = ChatMessage::new(ChatRole::User, transcript).with_id(item_id);
                if let Err(err) = self.chat_ctx.insert(msg) {
                    tracing::warn!("Failed to record transcript: {err}");
                }
            }
        }
    }

    fn append_history(&mut self, items: Vec<ChatItem>) {
        for item in items {
            if let Err(err) = self.chat_ctx.insert(item) {
                tracing::warn!("Failed to record generation output: {err}");
            }
        }
    }

    async fn transport_lost(&mut self, reason: String) {
        if self.finished {
            return;
        }
        tracing::warn!("Transport lost: {reason}");
        self.emit_error(ErrorEvent::new(ErrorKind::Transport, reason));
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.shared.mark_closed();

        if let Some(writer) = self.generation.as_mut() {
            let items = writer.close(GenerationStatus::Cancelled);
            self.append_history(items);
        }
        for (_, pending) in self.pending.drain() {
            pending.kind.fail(Error::SessionClosed);
        }
        for QueuedUpdate { respond, .. } in self.queued.drain(..) {
            let _ = respond.send(Err(Error::SessionClosed));
        }
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            cmd.reject();
        }

        if let Err(err) = self.transport.close().await {
            tracing::debug!("Error while closing transport: {err}");
        }
        tracing::info!("Session closed");
    }

    fn generation_open(&self) -> bool {
        self.generation.as_ref().is_some_and(GenerationWriter::is_open)
    }

    const fn transcription_enabled(&self) -> bool {
        self.capabilities.input_transcription && self.options.input_transcription
    }

    fn emit(&self, event: RealtimeEvent) {
        tracing::trace!("Emitting {}", event.name());
        let _ = self.events.send(event);
    }

    fn emit_error(&self, error: ErrorEvent) {
        self.emit(RealtimeEvent::Error(error));
    }
}

/// Resolves when the owning model is closed; pends forever otherwise.
async fn shutdown_requested(shutdown: Option<&mut watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        let closed = rx.wait_for(|closed| *closed).await.is_ok();
        if closed {
            return;
        }
    }
    std::future::pending::<()>().await;
}

/// The generation named `generation_id`, if it is still being written.
fn active_writer<'a>(
    generation: &'a mut Option<GenerationWriter>,
    generation_id: &str,
) -> Option<&'a mut GenerationWriter> {
    match generation {
        Some(writer) if writer.id() == generation_id && writer.is_open() => Some(writer),
        _ => {
            tracing::trace!("Ignoring output for inactive generation {generation_id}");
            None
        }
    }
}
