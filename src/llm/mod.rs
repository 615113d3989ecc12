//! Conversation history and tool definitions owned by a realtime session.

pub mod chat_context;
pub mod tool_context;

pub use chat_context::{ChatContext, ChatItem, ChatMessage, ChatRole, FunctionCall, FunctionCallOutput};
pub use tool_context::{FunctionTool, ToolChoice, ToolContext};
