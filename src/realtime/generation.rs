//! One backend turn fanned out into independently consumed streams.
//!
//! The engine keeps a [`GenerationWriter`] holding the sending halves; the
//! caller receives a [`GenerationCreatedEvent`] holding the receiving halves.
//! Every channel is unbounded so a slow reader of one stream never stalls the
//! others or the engine. Closing the writer drops all senders: readers drain
//! what was already produced and then see the end of the stream.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, watch};

use crate::audio::AudioFrame;
use crate::llm::{ChatItem, ChatMessage, ChatRole, FunctionCall};
use crate::protocol::GenerationStatus;

/// Number of generations whose messages can still be truncated.
const TRUNCATABLE_GENERATIONS: usize = 2;

/// Receiving half of one generation channel.
#[derive(Debug)]
pub struct ChannelStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> ChannelStream<T> {
    const fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    /// Await the next element; `None` once the stream is finished or cut off.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Stream for ChannelStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

pub type TextStream = ChannelStream<String>;
pub type AudioStream = ChannelStream<AudioFrame>;
pub type MessageStream = ChannelStream<MessageGeneration>;
pub type FunctionStream = ChannelStream<FunctionCall>;

/// One assistant message within a generation.
#[derive(Debug)]
pub struct MessageGeneration {
    pub message_id: String,
    pub text_stream: TextStream,
    pub audio_stream: AudioStream,
}

/// A generation handed to the caller.
#[derive(Debug)]
pub struct GenerationCreatedEvent {
    pub generation_id: String,
    pub message_stream: MessageStream,
    pub function_stream: FunctionStream,
    /// True if the generation answers `generate_reply`.
    pub user_initiated: bool,
    status: watch::Receiver<GenerationStatus>,
}

impl GenerationCreatedEvent {
    #[must_use]
    pub fn status(&self) -> GenerationStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.status() == GenerationStatus::Cancelled
    }

    /// Wait until the engine stops producing for this generation.
    pub async fn done(&mut self) -> GenerationStatus {
        match self.status.wait_for(|status| status.is_finished()).await {
            Ok(status) => *status,
            // The writer vanished without a verdict, which only happens on teardown.
            Err(_) => GenerationStatus::Cancelled,
        }
    }
}

#[derive(Debug)]
struct MessageWriter {
    id: String,
    text_tx: Option<mpsc::UnboundedSender<String>>,
    audio_tx: Option<mpsc::UnboundedSender<AudioFrame>>,
    text: String,
}

impl MessageWriter {
    fn finish(&mut self) {
        self.text_tx = None;
        self.audio_tx = None;
    }
}

/// Output in the order the backend produced it.
#[derive(Debug)]
enum Produced {
    /// Index into `GenerationWriter::messages`.
    Message(usize),
    FunctionCall(FunctionCall),
}

/// Engine-side half of a generation.
#[derive(Debug)]
pub(crate) struct GenerationWriter {
    id: String,
    message_tx: Option<mpsc::UnboundedSender<MessageGeneration>>,
    function_tx: Option<mpsc::UnboundedSender<FunctionCall>>,
    messages: Vec<MessageWriter>,
    produced: Vec<Produced>,
    status_tx: watch::Sender<GenerationStatus>,
}

impl GenerationWriter {
    pub(crate) fn open(id: impl Into<String>, user_initiated: bool) -> (Self, GenerationCreatedEvent) {
        let id = id.into();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (function_tx, function_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(GenerationStatus::Open);

        let event = GenerationCreatedEvent {
            generation_id: id.clone(),
            message_stream: ChannelStream::new(message_rx),
            function_stream: ChannelStream::new(function_rx),
            user_initiated,
            status: status_rx,
        };
        let writer = Self {
            id,
            message_tx: Some(message_tx),
            function_tx: Some(function_tx),
            messages: Vec::new(),
            produced: Vec::new(),
            status_tx,
        };
        (writer, event)
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Streams are still live.
    pub(crate) const fn is_open(&self) -> bool {
        self.message_tx.is_some()
    }

    /// Announce a new message. Returns `false` if the generation is closed or
    /// the message id was already announced.
    pub(crate) fn add_message(&mut self, message_id: &str) -> bool {
        let Some(message_tx) = &self.message_tx else {
            return false;
        };
        if self.messages.iter().any(|msg| msg.id == message_id) {
            return false;
        }

        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        // A reader that dropped the message stream simply misses the message.
        let _ = message_tx.send(MessageGeneration {
            message_id: message_id.to_string(),
            text_stream: ChannelStream::new(text_rx),
            audio_stream: ChannelStream::new(audio_rx),
        });
        self.produced.push(Produced::Message(self.messages.len()));
        self.messages.push(MessageWriter {
            id: message_id.to_string(),
            text_tx: Some(text_tx),
            audio_tx: Some(audio_tx),
            text: String::new(),
        });
        true
    }

    pub(crate) fn push_text(&mut self, message_id: &str, delta: String) -> bool {
        let Some(msg) = self.live_message(message_id) else {
            return false;
        };
        msg.text.push_str(&delta);
        if let Some(tx) = &msg.text_tx {
            let _ = tx.send(delta);
        }
        true
    }

    pub(crate) fn push_audio(&mut self, message_id: &str, frame: AudioFrame) -> bool {
        let Some(msg) = self.live_message(message_id) else {
            return false;
        };
        if let Some(tx) = &msg.audio_tx {
            let _ = tx.send(frame);
        }
        true
    }

    pub(crate) fn finish_message(&mut self, message_id: &str) -> bool {
        let Some(msg) = self.live_message(message_id) else {
            return false;
        };
        msg.finish();
        true
    }

    pub(crate) fn push_function_call(&mut self, call: FunctionCall) -> bool {
        let Some(function_tx) = &self.function_tx else {
            return false;
        };
        let _ = function_tx.send(call.clone());
        self.produced.push(Produced::FunctionCall(call));
        true
    }

    /// Close every stream and publish `status`. Returns the history items the
    /// generation produced; empty if it was already closed.
    pub(crate) fn close(&mut self, status: GenerationStatus) -> Vec<ChatItem> {
        if !self.is_open() {
            return Vec::new();
        }
        self.message_tx = None;
        self.function_tx = None;
        for msg in &mut self.messages {
            msg.finish();
        }
        self.status_tx.send_replace(status);

        let interrupted = status == GenerationStatus::Cancelled;
        let mut messages: Vec<Option<ChatItem>> = self
            .messages
            .drain(..)
            .map(|msg| {
                (!msg.text.is_empty() || !interrupted).then(|| {
                    ChatItem::Message(ChatMessage {
                        id: msg.id,
                        role: ChatRole::Assistant,
                        content: vec![msg.text],
                        interrupted,
                    })
                })
            })
            .collect();
        self.produced
            .drain(..)
            .filter_map(|produced| match produced {
                Produced::Message(index) => messages.get_mut(index).and_then(Option::take),
                Produced::FunctionCall(call) => Some(ChatItem::FunctionCall(call)),
            })
            .collect()
    }

    /// Record the final status reported by the backend for an already closed generation.
    pub(crate) fn settle(&self, status: GenerationStatus) {
        if !self.status_tx.borrow().is_finished() {
            self.status_tx.send_replace(status);
        }
    }

    fn live_message(&mut self, message_id: &str) -> Option<&mut MessageWriter> {
        if !self.is_open() {
            return None;
        }
        self.messages.iter_mut().find(|msg| msg.id == message_id)
    }
}

/// Message ids of the most recent generations, for validating `truncate`.
#[derive(Debug, Default)]
pub(crate) struct MessageLedger {
    generations: VecDeque<(String, Vec<String>)>,
}

impl MessageLedger {
    pub(crate) fn begin(&mut self, generation_id: &str) {
        self.generations.push_back((generation_id.to_string(), Vec::new()));
        while self.generations.len() > TRUNCATABLE_GENERATIONS {
            self.generations.pop_front();
        }
    }

    pub(crate) fn record(&mut self, generation_id: &str, message_id: &str) {
        if let Some((_, messages)) = self
            .generations
            .iter_mut()
            .rev()
            .find(|(id, _)| id == generation_id)
        {
            messages.push(message_id.to_string());
        }
    }

    pub(crate) fn contains(&self, message_id: &str) -> bool {
        self.generations
            .iter()
            .any(|(_, messages)| messages.iter().any(|id| id == message_id))
    }
}
