// ChatPay — Message bus (single inbound stream, per-channel outbound routing)

use crate::conversation::{ConversationId, Outbox, TextFormat};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
}

impl InboundMessage {
    pub fn conversation(&self) -> ConversationId {
        ConversationId::new(&self.channel, &self.chat_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub format: TextFormat,
}

// ---------------------------------------------------------------------------
// Message bus
// ---------------------------------------------------------------------------

pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<OutboundMessage>>>,
    handlers: Arc<RwLock<HashMap<String, mpsc::Sender<OutboundMessage>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(100);
        let (outbound_tx, outbound_rx) = mpsc::channel(100);

        Self {
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
            outbound_tx,
            outbound_rx: Arc::new(tokio::sync::Mutex::new(outbound_rx)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn publish_inbound(&self, msg: InboundMessage) {
        if let Err(e) = self.inbound_tx.send(msg).await {
            tracing::error!("Failed to publish inbound message: {}", e);
        }
    }

    /// Next inbound message from any channel, in arrival order.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    pub async fn publish_outbound(&self, msg: OutboundMessage) {
        // Route to channel-specific handler if registered
        let handler = self.handlers.read().await.get(&msg.channel).cloned();
        if let Some(handler) = handler {
            if let Err(e) = handler.send(msg).await {
                tracing::error!("Failed to send to channel handler: {}", e);
            }
            return;
        }

        // Unrouted messages go to the global outbound queue
        if let Err(e) = self.outbound_tx.send(msg).await {
            tracing::error!("Failed to publish outbound message: {}", e);
        }
    }

    pub async fn subscribe_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Register a channel-specific handler for outbound messages.
    pub async fn register_handler(&self, channel: &str, sender: mpsc::Sender<OutboundMessage>) {
        self.handlers.write().await.insert(channel.to_string(), sender);
    }

    /// Get the inbound sender (for channels to publish messages).
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Outbox for MessageBus {
    async fn send_message(&self, conversation: &ConversationId, text: &str, format: TextFormat) {
        self.publish_outbound(OutboundMessage {
            channel: conversation.channel().to_string(),
            chat_id: conversation.chat_id().to_string(),
            content: text.to_string(),
            format,
        })
        .await;
    }
}
