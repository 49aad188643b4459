// ChatPay — Channel trait and base channel

pub mod console;
pub mod telegram;

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use async_trait::async_trait;
use std::sync::Arc;

/// Channel is the interface that all chat transports must implement.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn send(&self, msg: OutboundMessage) -> anyhow::Result<()>;
    fn is_running(&self) -> bool;
}

/// BaseChannel provides common functionality for all channels.
#[derive(Clone)]
pub struct BaseChannel {
    channel_name: String,
    allow_list: Vec<String>,
    bus: Arc<MessageBus>,
}

impl BaseChannel {
    pub fn new(name: &str, allow_list: Vec<String>, bus: Arc<MessageBus>) -> Self {
        Self {
            channel_name: name.to_string(),
            allow_list,
            bus,
        }
    }

    /// Check if a sender is allowed to use this channel.
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        if self.allow_list.is_empty() {
            return true;
        }

        let (id_part, user_part) = match sender_id.split_once('|') {
            Some((id, user)) => (id, Some(user)),
            None => (sender_id, None),
        };

        self.allow_list.iter().any(|allowed| {
            let trimmed = allowed.trim_start_matches('@');
            [allowed.as_str(), trimmed]
                .iter()
                .any(|a| sender_id == *a || id_part == *a || user_part == Some(*a))
        })
    }

    /// Publish an inbound message onto the bus for the router.
    pub async fn handle_message(&self, sender_id: &str, chat_id: &str, content: &str) {
        if !self.is_allowed(sender_id) {
            tracing::warn!(
                channel = %self.channel_name,
                sender = %sender_id,
                "Message blocked: sender not in allow list"
            );
            return;
        }

        self.bus
            .publish_inbound(InboundMessage {
                channel: self.channel_name.clone(),
                sender_id: sender_id.to_string(),
                chat_id: chat_id.to_string(),
                content: content.to_string(),
            })
            .await;
    }

    pub fn name(&self) -> &str {
        &self.channel_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_empty() {
        let bus = Arc::new(MessageBus::new());
        let ch = BaseChannel::new("test", vec![], bus);
        assert!(ch.is_allowed("anyone"));
    }

    #[test]
    fn test_allow_list_exact() {
        let bus = Arc::new(MessageBus::new());
        let ch = BaseChannel::new("test", vec!["user123".into()], bus);
        assert!(ch.is_allowed("user123"));
        assert!(!ch.is_allowed("user456"));
    }

    #[test]
    fn test_allow_list_compound_id() {
        let bus = Arc::new(MessageBus::new());
        let ch = BaseChannel::new("test", vec!["123".into()], bus);
        assert!(ch.is_allowed("123|john"));
        assert!(!ch.is_allowed("456|john"));
    }

    #[test]
    fn test_allow_list_at_prefix() {
        let bus = Arc::new(MessageBus::new());
        let ch = BaseChannel::new("test", vec!["@john".into()], bus);
        assert!(ch.is_allowed("john"));
        assert!(ch.is_allowed("789|john"));
    }

    #[tokio::test]
    async fn test_blocked_sender_is_not_published() {
        let bus = Arc::new(MessageBus::new());
        let ch = BaseChannel::new("test", vec!["42".into()], bus.clone());
        ch.handle_message("13", "c", "/start").await;
        ch.handle_message("42", "c", "/help").await;

        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.content, "/help");
    }
}
