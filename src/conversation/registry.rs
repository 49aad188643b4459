// ChatPay — Conversation session registry
//
// Demultiplexes the single inbound message stream by conversation id and
// hands each message to the one pending prompt registered for that
// conversation. At most one prompt may be pending per conversation.

use super::ConversationId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("a prompt is already pending for conversation {0}")]
    Concurrent(ConversationId),
    #[error("no reply received within {0:?}")]
    Timeout(Duration),
    #[error("prompt was revoked")]
    Revoked,
}

struct PendingPrompt {
    token: u64,
    created_at: Instant,
    resolve: oneshot::Sender<String>,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<HashMap<ConversationId, PendingPrompt>>,
    next_token: AtomicU64,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<ConversationId, PendingPrompt>> {
        // Critical sections never panic, so a poisoned lock still holds a consistent map.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A registered prompt that has not been answered yet.
///
/// Registering before the prompt text goes out means a reply can never race
/// ahead of its prompt. Dropping the value unregisters the prompt.
pub struct PendingReply {
    inner: Arc<Inner>,
    conversation: ConversationId,
    token: u64,
    rx: Option<oneshot::Receiver<String>>,
}

impl PendingReply {
    /// Wait for the reply. With a `timeout`, the prompt is removed and
    /// [`PromptError::Timeout`] returned once it elapses.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<String, PromptError> {
        let Some(rx) = self.rx.take() else {
            return Err(PromptError::Revoked);
        };

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::debug!(conversation = %self.conversation, ?limit, "Prompt timed out");
                    return Err(PromptError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        reply.map_err(|_| {
            tracing::debug!(conversation = %self.conversation, "Prompt revoked");
            PromptError::Revoked
        })
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        let mut pending = self.inner.pending();
        if pending
            .get(&self.conversation)
            .is_some_and(|p| p.token == self.token)
        {
            pending.remove(&self.conversation);
        }
    }
}

#[derive(Clone, Default)]
pub struct PromptRegistry {
    inner: Arc<Inner>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the conversation's next prompt without waiting on it yet.
    ///
    /// Fails fast with [`PromptError::Concurrent`] if a prompt is already
    /// pending for the conversation.
    pub fn register(&self, conversation: &ConversationId) -> Result<PendingReply, PromptError> {
        let (tx, rx) = oneshot::channel();
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.inner.pending();
        if pending.contains_key(conversation) {
            tracing::error!(
                conversation = %conversation,
                "Prompt requested while another prompt is pending"
            );
            return Err(PromptError::Concurrent(conversation.clone()));
        }
        pending.insert(
            conversation.clone(),
            PendingPrompt {
                token,
                created_at: Instant::now(),
                resolve: tx,
            },
        );
        tracing::debug!(conversation = %conversation, "Prompt registered");

        Ok(PendingReply {
            inner: self.inner.clone(),
            conversation: conversation.clone(),
            token,
            rx: Some(rx),
        })
    }

    /// Wait for the next message on `conversation`.
    ///
    /// Same as [`register`](Self::register) followed by
    /// [`PendingReply::wait`]. A prompt removed through
    /// [`cancel_all`](Self::cancel_all) yields [`PromptError::Revoked`].
    pub async fn await_next_message(
        &self,
        conversation: &ConversationId,
        timeout: Option<Duration>,
    ) -> Result<String, PromptError> {
        self.register(conversation)?.wait(timeout).await
    }

    /// Route an inbound message to the conversation's pending prompt.
    ///
    /// The prompt is unregistered before it is resolved, so a second message
    /// arriving before the next prompt is registered is never delivered.
    /// Returns `false` when no prompt was waiting.
    pub fn deliver(&self, conversation: &ConversationId, text: &str) -> bool {
        let prompt = self.inner.pending().remove(conversation);
        match prompt {
            Some(prompt) => {
                tracing::debug!(
                    conversation = %conversation,
                    waited_ms = prompt.created_at.elapsed().as_millis() as u64,
                    "Prompt resolved"
                );
                prompt.resolve.send(text.to_string()).is_ok()
            }
            None => false,
        }
    }

    /// Reject and remove any prompt pending for `conversation`.
    pub fn cancel_all(&self, conversation: &ConversationId) -> bool {
        // Dropping the resolver wakes the waiter with `Revoked`.
        self.inner.pending().remove(conversation).is_some()
    }

    pub fn is_pending(&self, conversation: &ConversationId) -> bool {
        self.inner.pending().contains_key(conversation)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::testing::reply;

    fn conv(id: &str) -> ConversationId {
        ConversationId::new("test", id)
    }

    #[tokio::test]
    async fn test_delivers_to_waiting_prompt() {
        let registry = PromptRegistry::new();
        let c = conv("1");

        let waiter = {
            let registry = registry.clone();
            let c = c.clone();
            tokio::spawn(async move { registry.await_next_message(&c, None).await })
        };

        reply(&registry, &c, "hello").await;
        assert_eq!(waiter.await.unwrap(), Ok("hello".to_string()));
        assert!(!registry.is_pending(&c));
    }

    #[tokio::test]
    async fn test_second_prompt_fails_fast() {
        let registry = PromptRegistry::new();
        let c = conv("1");

        let first = {
            let registry = registry.clone();
            let c = c.clone();
            tokio::spawn(async move { registry.await_next_message(&c, None).await })
        };
        while !registry.is_pending(&c) {
            tokio::task::yield_now().await;
        }

        let second = registry.await_next_message(&c, None).await;
        assert_eq!(second, Err(PromptError::Concurrent(c.clone())));

        // The original waiter is untouched by the rejected request.
        assert!(registry.deliver(&c, "answer"));
        assert_eq!(first.await.unwrap(), Ok("answer".to_string()));
    }

    #[tokio::test]
    async fn test_reply_before_wait_is_kept() {
        let registry = PromptRegistry::new();
        let c = conv("1");

        let pending = registry.register(&c).unwrap();
        assert!(registry.deliver(&c, "early"));
        assert_eq!(pending.wait(None).await, Ok("early".to_string()));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unawaited_registration_is_released() {
        let registry = PromptRegistry::new();
        let c = conv("1");

        let pending = registry.register(&c).unwrap();
        assert!(matches!(registry.register(&c), Err(PromptError::Concurrent(_))));
        drop(pending);
        assert!(!registry.is_pending(&c));
    }

    #[tokio::test]
    async fn test_message_without_prompt_is_ignored() {
        let registry = PromptRegistry::new();
        assert!(!registry.deliver(&conv("1"), "stray"));
    }

    #[tokio::test]
    async fn test_no_cross_talk_between_conversations() {
        let registry = PromptRegistry::new();
        let a = conv("a");
        let b = conv("b");

        let wait_b = {
            let registry = registry.clone();
            let b = b.clone();
            tokio::spawn(async move { registry.await_next_message(&b, None).await })
        };
        while !registry.is_pending(&b) {
            tokio::task::yield_now().await;
        }

        assert!(!registry.deliver(&a, "for a"));
        assert!(registry.is_pending(&b));

        assert!(registry.deliver(&b, "for b"));
        assert_eq!(wait_b.await.unwrap(), Ok("for b".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_removes_prompt() {
        let registry = PromptRegistry::new();
        let c = conv("1");
        let result = registry
            .await_next_message(&c, Some(Duration::from_millis(20)))
            .await;
        assert_eq!(result, Err(PromptError::Timeout(Duration::from_millis(20))));
        assert!(!registry.is_pending(&c));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_revokes_waiter() {
        let registry = PromptRegistry::new();
        let c = conv("1");

        let waiter = {
            let registry = registry.clone();
            let c = c.clone();
            tokio::spawn(async move { registry.await_next_message(&c, None).await })
        };
        while !registry.is_pending(&c) {
            tokio::task::yield_now().await;
        }

        assert!(registry.cancel_all(&c));
        assert_eq!(waiter.await.unwrap(), Err(PromptError::Revoked));
        assert!(!registry.cancel_all(&c));
    }

    #[tokio::test]
    async fn test_dropped_waiter_releases_prompt() {
        let registry = PromptRegistry::new();
        let c = conv("1");

        let waiter = {
            let registry = registry.clone();
            let c = c.clone();
            tokio::spawn(async move { registry.await_next_message(&c, None).await })
        };
        while !registry.is_pending(&c) {
            tokio::task::yield_now().await;
        }

        waiter.abort();
        let _ = waiter.await;
        assert!(!registry.is_pending(&c));
    }

    #[tokio::test]
    async fn test_replayed_message_is_not_delivered_twice() {
        let registry = PromptRegistry::new();
        let c = conv("1");

        let waiter = {
            let registry = registry.clone();
            let c = c.clone();
            tokio::spawn(async move { registry.await_next_message(&c, None).await })
        };
        while !registry.is_pending(&c) {
            tokio::task::yield_now().await;
        }

        assert!(registry.deliver(&c, "YES"));
        assert!(!registry.deliver(&c, "YES"));
        assert_eq!(waiter.await.unwrap(), Ok("YES".to_string()));
    }
}
