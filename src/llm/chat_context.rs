use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::short_id;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    #[default]
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: Vec<String>,
    /// Set when the message was cut short by an interruption.
    #[serde(default)]
    pub interrupted: bool,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            id: short_id("item_"),
            role,
            content: vec![text.into()],
            interrupted: false,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// All text parts joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    pub id: String,
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
}

impl FunctionCall {
    #[must_use]
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: short_id("item_"),
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parsed arguments. Models occasionally emit an empty string for no arguments.
    ///
    /// # Errors
    /// Returns an error if the arguments are not valid JSON.
    pub fn parsed_arguments(&self) -> Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        Ok(serde_json::from_str(&self.arguments)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCallOutput {
    pub id: String,
    pub call_id: String,
    pub name: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

impl FunctionCallOutput {
    #[must_use]
    pub fn new(call: &FunctionCall, output: impl Into<String>, is_error: bool) -> Self {
        Self {
            id: short_id("item_"),
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            output: output.into(),
            is_error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatItem {
    Message(ChatMessage),
    FunctionCall(FunctionCall),
    FunctionCallOutput(FunctionCallOutput),
}

impl ChatItem {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Message(msg) => &msg.id,
            Self::FunctionCall(call) => &call.id,
            Self::FunctionCallOutput(output) => &output.id,
        }
    }

    #[must_use]
    pub const fn as_message(&self) -> Option<&ChatMessage> {
        match self {
            Self::Message(msg) => Some(msg),
            _ => None,
        }
    }
}

impl From<ChatMessage> for ChatItem {
    fn from(msg: ChatMessage) -> Self {
        Self::Message(msg)
    }
}

impl From<FunctionCall> for ChatItem {
    fn from(call: FunctionCall) -> Self {
        Self::FunctionCall(call)
    }
}

impl From<FunctionCallOutput> for ChatItem {
    fn from(output: FunctionCallOutput) -> Self {
        Self::FunctionCallOutput(output)
    }
}

/// Ordered conversation history.
///
/// Identifiers are unique and every function output refers to a call that
/// appears earlier in the history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChatContext {
    items: Vec<ChatItem>,
}

impl ChatContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns `Error::InvalidChatContext` if the items violate the history invariants.
    pub fn from_items(items: Vec<ChatItem>) -> Result<Self> {
        let ctx = Self { items };
        ctx.validate()?;
        Ok(ctx)
    }

    #[must_use]
    pub fn items(&self) -> &[ChatItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a new text message and return a copy of it.
    pub fn add_message(&mut self, role: ChatRole, text: impl Into<String>) -> ChatMessage {
        let msg = ChatMessage::new(role, text);
        self.items.push(ChatItem::Message(msg.clone()));
        msg
    }

    /// Append an item.
    ///
    /// # Errors
    /// Returns `Error::InvalidChatContext` if the id is already present or a
    /// function output has no matching call.
    pub fn insert(&mut self, item: impl Into<ChatItem>) -> Result<()> {
        let item = item.into();
        if self.index_of(item.id()).is_some() {
            return Err(Error::InvalidChatContext(format!("duplicate item id: {}", item.id())));
        }
        if let ChatItem::FunctionCallOutput(output) = &item {
            if !self.has_call(&output.call_id) {
                return Err(Error::InvalidChatContext(format!(
                    "function output references unknown call: {}",
                    output.call_id
                )));
            }
        }
        self.items.push(item);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ChatItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ChatItem> {
        self.items.iter_mut().find(|item| item.id() == id)
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<ChatItem> {
        let index = self.index_of(id)?;
        Some(self.items.remove(index))
    }

    /// Keep only the most recent `max_items` items. The kept window never starts
    /// with a function output whose call was dropped.
    pub fn truncate(&mut self, max_items: usize) {
        if self.items.len() <= max_items {
            return;
        }
        let mut start = self.items.len() - max_items;
        while start < self.items.len()
            && matches!(self.items[start], ChatItem::FunctionCallOutput(_))
        {
            start += 1;
        }
        self.items.drain(..start);
    }

    /// # Errors
    /// Returns `Error::InvalidChatContext` on duplicate ids or orphaned function outputs.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::with_capacity(self.items.len());
        let mut calls = HashSet::new();
        for item in &self.items {
            if !ids.insert(item.id()) {
                return Err(Error::InvalidChatContext(format!("duplicate item id: {}", item.id())));
            }
            match item {
                ChatItem::FunctionCall(call) => {
                    calls.insert(call.call_id.as_str());
                }
                ChatItem::FunctionCallOutput(output) if !calls.contains(output.call_id.as_str()) => {
                    return Err(Error::InvalidChatContext(format!(
                        "function output references unknown call: {}",
                        output.call_id
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn has_call(&self, call_id: &str) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, ChatItem::FunctionCall(call) if call.call_id == call_id))
    }
}
