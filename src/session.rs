// ChatPay — Session store (file-based credential persistence per conversation)

use crate::api::Credential;
use crate::conversation::ConversationId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to access session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse session file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// An authenticated conversation. Read-only for workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub conversation_id: ConversationId,
    pub user_id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub credential: Credential,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Live session for the conversation; expired sessions are removed and reported absent.
    async fn get(&self, conversation: &ConversationId) -> Option<Session>;
    async fn set(&self, session: Session) -> Result<(), SessionError>;
    async fn delete(&self, conversation: &ConversationId);
}

pub struct FileSessionStore {
    sessions_dir: PathBuf,
    cache: Arc<RwLock<HashMap<ConversationId, Session>>>,
}

impl FileSessionStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            sessions_dir: workspace.join("sessions"),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn session_path(&self, conversation: &ConversationId) -> PathBuf {
        let safe_name = conversation.as_str().replace(['/', '\\', ':', '|'], "_");
        self.sessions_dir.join(format!("{}.json", safe_name))
    }

    async fn load(&self, conversation: &ConversationId) -> Option<Session> {
        {
            let cache = self.cache.read().await;
            if let Some(session) = cache.get(conversation) {
                return Some(session.clone());
            }
        }

        let path = self.session_path(conversation);
        if !path.exists() {
            return None;
        }
        match load_session(&path).await {
            Ok(session) => {
                self.cache
                    .write()
                    .await
                    .insert(conversation.clone(), session.clone());
                Some(session)
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation, "Failed to load session: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, conversation: &ConversationId) -> Option<Session> {
        let session = self.load(conversation).await?;
        if session.is_expired(Utc::now()) {
            tracing::info!(conversation = %conversation, "Session expired");
            self.delete(conversation).await;
            return None;
        }
        Some(session)
    }

    async fn set(&self, session: Session) -> Result<(), SessionError> {
        let path = self.session_path(&session.conversation_id);
        save_session(&path, &session).await?;
        self.cache
            .write()
            .await
            .insert(session.conversation_id.clone(), session);
        Ok(())
    }

    async fn delete(&self, conversation: &ConversationId) {
        self.cache.write().await.remove(conversation);
        let path = self.session_path(conversation);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to delete session file: {}", e);
            }
        }
    }
}

async fn save_session(path: &Path, session: &Session) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Atomic write: write to temp file then rename
    let tmp_path = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(session)?;
    tokio::fs::write(&tmp_path, &content).await?;
    tokio::fs::rename(&tmp_path, path).await?;

    Ok(())
}

async fn load_session(path: &Path) -> Result<Session, SessionError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}
