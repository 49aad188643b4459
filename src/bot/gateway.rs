// ChatPay — Gateway service (runs chat channels and the command router)

use super::Router;
use crate::api::http::HttpTransferApi;
use crate::audit::AuditLogger;
use crate::bus::{MessageBus, OutboundMessage};
use crate::channel::telegram::TelegramChannel;
use crate::channel::Channel;
use crate::config::Config;
use crate::conversation::registry::PromptRegistry;
use crate::session::FileSessionStore;
use crate::workflow::runner::{RunnerSettings, WorkflowRunner};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wire the HTTP API client, session store, audit log and runner into a router.
pub fn build_router(config: &Config, bus: Arc<MessageBus>) -> anyhow::Result<Router> {
    let workspace = config.workspace_path()?;
    std::fs::create_dir_all(&workspace)?;

    let api = Arc::new(HttpTransferApi::from_config(&config.api)?);
    let sessions = Arc::new(FileSessionStore::new(&workspace));
    let audit = Arc::new(AuditLogger::new(workspace.join("audit.jsonl")));

    let runner = WorkflowRunner::new(
        PromptRegistry::new(),
        bus.clone(),
        api,
        RunnerSettings::from_config(config),
    )
    .with_audit(audit);

    tracing::info!(workspace = %workspace.display(), api = %config.api.base_url, "Router configured");
    Ok(Router::new(config, runner, sessions, bus))
}

pub struct Gateway {
    router: Arc<Router>,
    bus: Arc<MessageBus>,
    channels: Vec<Arc<dyn Channel>>,
}

impl Gateway {
    pub fn new(router: Router, bus: Arc<MessageBus>, channels: Vec<Arc<dyn Channel>>) -> Self {
        Self {
            router: Arc::new(router),
            bus,
            channels,
        }
    }

    /// Gateway over every channel enabled in `config`.
    pub fn from_config(config: &Config, router: Router, bus: Arc<MessageBus>) -> Self {
        let mut channels: Vec<Arc<dyn Channel>> = Vec::new();

        // Initialize Telegram if enabled
        if config.channels.telegram.enabled {
            let ch = TelegramChannel::new(
                &config.channels.telegram.token,
                config.channels.telegram.allow_from.clone(),
                bus.clone(),
            );
            channels.push(Arc::new(ch));
        }

        Self::new(router, bus, channels)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut set = tokio::task::JoinSet::new();

        tracing::info!("Gateway starting with {} channels", self.channels.len());

        // 1. Start all channels
        for channel in &self.channels {
            let ch = channel.clone();
            let name = ch.name().to_string();

            // Register a handler in the bus for this channel
            let (tx, mut rx) = mpsc::channel::<OutboundMessage>(100);
            self.bus.register_handler(&name, tx).await;

            if let Err(e) = ch.start().await {
                tracing::error!(channel = %name, "Failed to start channel: {}", e);
                continue;
            }

            // Bridge bus outbound -> channel send
            set.spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if let Err(e) = ch.send(msg).await {
                        tracing::error!(channel = %name, "Failed to send message: {}", e);
                    }
                }
                tracing::info!(channel = %name, "Outbound bridge stopped");
            });
        }

        // 2. Start the command router
        let router = self.router.clone();
        set.spawn(async move {
            if let Err(e) = router.run().await {
                tracing::error!("Router stopped with error: {}", e);
            }
        });

        while let Some(res) = set.join_next().await {
            match res {
                Ok(_) => tracing::info!("Task completed"),
                Err(e) => tracing::error!("Task failed: {}", e),
            }
        }

        Ok(())
    }
}
