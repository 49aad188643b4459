// ChatPay — Conversation primitives (ids, outbound adapter, form engine)

pub mod confirm;
pub mod engine;
pub mod registry;
pub mod validate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Conversation id
// ---------------------------------------------------------------------------

/// Stable address of one chat conversation, formatted as `<channel>:<chat_id>`.
///
/// A conversation runs at most one workflow at a time and owns at most one
/// pending prompt in the [`registry::PromptRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(channel: &str, chat_id: &str) -> Self {
        Self(format!("{}:{}", channel, chat_id))
    }

    /// Channel part of the id (empty when the id carries no channel prefix).
    pub fn channel(&self) -> &str {
        self.0.split_once(':').map(|(c, _)| c).unwrap_or("")
    }

    pub fn chat_id(&self) -> &str {
        self.0.split_once(':').map(|(_, id)| id).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Outbound adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    #[default]
    Plain,
    Markdown,
}

/// Outbound half of the chat transport: "send this text to conversation C".
///
/// Implementations log their own delivery failures; the form engine never
/// aborts a workflow because a message could not be delivered.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send_message(&self, conversation: &ConversationId, text: &str, format: TextFormat);
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
