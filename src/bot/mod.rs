// ChatPay — Command router
//
// Consumes the inbound bus in arrival order. Replies to a pending prompt go
// to the prompt registry; slash commands start, revoke or query workflows.

pub mod gateway;

use crate::bus::{InboundMessage, MessageBus};
use crate::config::Config;
use crate::conversation::{ConversationId, Outbox, TextFormat};
use crate::session::{Session, SessionStore};
use crate::workflow::runner::WorkflowRunner;
use crate::workflow::{WorkflowKind, WorkflowTracker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const HELP_TEXT: &str = "ChatPay commands\n\
/login - authenticate with your email\n\
/transfer_email - send USDC to an email address\n\
/transfer_wallet - send USDC to a wallet address\n\
/transfer_bank - withdraw to a bank account\n\
/transfer_bulk - send USDC to several recipients\n\
/transfers - show recent transfers\n\
/balance - show wallet balances\n\
/wallets - list your wallets\n\
/default_wallet - choose your default wallet\n\
/add_payee - save a new payee\n\
/profile - show your profile\n\
/kyc - show your KYC status\n\
/cancel - stop the current operation\n\
/logout - end your session";

const WELCOME_TEXT: &str =
    "Welcome to *ChatPay*! Use /login to get started or /help to see all commands.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Login,
    Logout,
    Cancel,
    Workflow(WorkflowKind),
    DefaultWallet,
    History,
    Balance,
    Wallets,
    Profile,
    Kyc,
    Unknown,
}

impl Command {
    /// Parse a slash command. `None` when the text is not a command.
    pub fn parse(text: &str) -> Option<Command> {
        let word = text.split_whitespace().next()?.strip_prefix('/')?;
        // Group chats address commands as /cmd@BotName
        let name = word.split('@').next().unwrap_or(word).to_lowercase();
        let command = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "login" => Command::Login,
            "logout" => Command::Logout,
            "cancel" => Command::Cancel,
            "transfers" | "transfer_list" => Command::History,
            "balance" | "balances" => Command::Balance,
            "wallets" => Command::Wallets,
            "default_wallet" => Command::DefaultWallet,
            "add_payee" => Command::Workflow(WorkflowKind::AddPayee),
            "profile" => Command::Profile,
            "kyc" => Command::Kyc,
            other => match other.strip_prefix("transfer_").map(str::parse::<WorkflowKind>) {
                Some(Ok(kind)) if kind.is_transfer() => Command::Workflow(kind),
                _ => Command::Unknown,
            },
        };
        Some(command)
    }

    /// Commands that abort whatever the conversation is doing.
    pub fn revokes(&self) -> bool {
        matches!(self, Command::Start | Command::Cancel | Command::Logout)
    }
}

struct RateLimiter {
    // Key: sender_id
    history: tokio::sync::Mutex<HashMap<String, Vec<std::time::Instant>>>,
    max_requests: usize,
    window: std::time::Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            history: tokio::sync::Mutex::new(HashMap::new()),
            max_requests,
            window: std::time::Duration::from_secs(window_secs),
        }
    }

    async fn check_rate_limit(&self, key: &str) -> bool {
        if self.max_requests == 0 {
            return true; // No limit
        }

        let mut history = self.history.lock().await;
        let now = std::time::Instant::now();
        let entries = history.entry(key.to_string()).or_default();

        let window = self.window;
        entries.retain(|&t| now.duration_since(t) < window);

        if entries.len() >= self.max_requests {
            return false;
        }

        entries.push(now);
        true
    }
}

#[derive(Clone)]
struct ActiveWorkflow {
    name: &'static str,
    tracker: WorkflowTracker,
}

/// Conversations with a running workflow.
type ActiveMap = Arc<Mutex<HashMap<ConversationId, ActiveWorkflow>>>;

/// What a revoking command found on the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Revocation {
    Revoked,
    /// The workflow is quoting or submitting and runs to its end.
    Busy,
    Idle,
}

/// Unregisters the conversation's workflow when the task ends.
struct ActiveGuard {
    active: ActiveMap,
    conversation: ConversationId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.conversation);
    }
}

#[derive(Clone)]
pub struct Router {
    runner: WorkflowRunner,
    sessions: Arc<dyn SessionStore>,
    bus: Arc<MessageBus>,
    rate_limiter: Arc<RateLimiter>,
    active: ActiveMap,
}

impl Router {
    pub fn new(
        config: &Config,
        runner: WorkflowRunner,
        sessions: Arc<dyn SessionStore>,
        bus: Arc<MessageBus>,
    ) -> Self {
        Self {
            runner,
            sessions,
            bus,
            rate_limiter: Arc::new(RateLimiter::new(
                config.gateway.rate_limit_requests,
                config.gateway.rate_limit_seconds,
            )),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run the router listening for inbound messages.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!("Router started, waiting for messages...");

        while let Some(msg) = self.bus.consume_inbound().await {
            self.handle(msg).await;
        }

        tracing::info!("Message bus closed, shutting down router");
        Ok(())
    }

    /// Name of the workflow currently running on `conversation`.
    pub fn active_workflow(&self, conversation: &ConversationId) -> Option<&'static str> {
        self.active_entry(conversation).map(|a| a.name)
    }

    fn active_entry(&self, conversation: &ConversationId) -> Option<ActiveWorkflow> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(conversation)
            .cloned()
    }

    pub async fn handle(&self, msg: InboundMessage) {
        let conversation = msg.conversation();
        let command = Command::parse(&msg.content);
        tracing::debug!(
            conversation = %conversation,
            sender = %msg.sender_id,
            "Processing inbound message"
        );

        // Revoking commands win over a pending prompt
        if let Some(cmd) = command.filter(Command::revokes) {
            if self.allowed(&msg, &conversation).await {
                self.dispatch(cmd, &conversation).await;
            }
            return;
        }

        // Commands are never taken as answers
        if command.is_none() && self.runner.registry().deliver(&conversation, &msg.content) {
            return;
        }

        match command {
            Some(cmd) => {
                if !self.allowed(&msg, &conversation).await {
                    return;
                }
                if let Some(workflow) = self.active_workflow(&conversation) {
                    self.say(
                        &conversation,
                        &format!(
                            "Another operation ({}) is already in progress. Finish it or /cancel first.",
                            workflow
                        ),
                    )
                    .await;
                    return;
                }
                self.dispatch(cmd, &conversation).await;
            }
            None if self.active_workflow(&conversation).is_some() => {
                self.say(&conversation, "Please wait, your request is being processed.")
                    .await;
            }
            None => {
                self.say(&conversation, "I didn't understand that. Use /help to see what I can do.")
                    .await;
            }
        }
    }

    async fn allowed(&self, msg: &InboundMessage, conversation: &ConversationId) -> bool {
        if self.rate_limiter.check_rate_limit(&msg.sender_id).await {
            return true;
        }
        tracing::warn!(sender = %msg.sender_id, "Rate limit exceeded");
        self.say(conversation, "Rate limit exceeded. Please wait a moment.")
            .await;
        false
    }

    async fn dispatch(&self, command: Command, conversation: &ConversationId) {
        match command {
            Command::Start => {
                self.revoke(conversation);
                self.bus
                    .send_message(conversation, WELCOME_TEXT, TextFormat::Markdown)
                    .await;
            }
            Command::Help => self.say(conversation, HELP_TEXT).await,
            Command::Cancel => match self.revoke(conversation) {
                // The workflow sends its own final message
                Revocation::Revoked => {}
                Revocation::Busy => {
                    self.say(
                        conversation,
                        "Your request is already being processed and can no longer be cancelled.",
                    )
                    .await;
                }
                Revocation::Idle => self.say(conversation, "Nothing to cancel.").await,
            },
            Command::Logout => {
                self.revoke(conversation);
                self.sessions.delete(conversation).await;
                self.say(conversation, "You have been logged out.").await;
            }
            Command::Login => self.start_login(conversation),
            Command::Workflow(kind) => {
                let Some(session) = self.session_or_login(conversation).await else {
                    return;
                };
                let runner = self.runner.clone();
                let conv = conversation.clone();
                self.spawn_workflow(conversation, kind.name(), move |tracker| async move {
                    runner.run_tracked(&conv, kind, &session, &tracker).await;
                });
            }
            Command::DefaultWallet => {
                let Some(session) = self.session_or_login(conversation).await else {
                    return;
                };
                let runner = self.runner.clone();
                let conv = conversation.clone();
                self.spawn_workflow(conversation, "default_wallet", move |tracker| async move {
                    runner.run_set_default_wallet(&conv, &session, &tracker).await;
                });
            }
            Command::History | Command::Balance | Command::Wallets | Command::Profile | Command::Kyc => {
                let Some(session) = self.session_or_login(conversation).await else {
                    return;
                };
                match command {
                    Command::History => self.runner.list_transfers(conversation, &session).await,
                    Command::Balance => self.runner.show_balances(conversation, &session).await,
                    Command::Wallets => self.runner.list_wallets(conversation, &session).await,
                    Command::Profile => self.runner.show_profile(conversation, &session).await,
                    _ => self.runner.show_kyc(conversation, &session).await,
                }
            }
            Command::Unknown => {
                self.say(conversation, "Unknown command. Use /help to see what I can do.")
                    .await;
            }
        }
    }

    async fn session_or_login(&self, conversation: &ConversationId) -> Option<Session> {
        let session = self.sessions.get(conversation).await;
        if session.is_none() {
            self.say(conversation, "Please /login first.").await;
        }
        session
    }

    fn start_login(&self, conversation: &ConversationId) {
        let runner = self.runner.clone();
        let sessions = self.sessions.clone();
        let conv = conversation.clone();
        self.spawn_workflow(conversation, "login", move |tracker| async move {
            runner.run_login(&conv, sessions.as_ref(), &tracker).await;
        });
    }

    /// Run a workflow as the conversation's single active workflow.
    ///
    /// The tracker is registered before the task is spawned, so a revoking
    /// command that arrives before the first prompt still finds it.
    fn spawn_workflow<F, Fut>(&self, conversation: &ConversationId, name: &'static str, start: F)
    where
        F: FnOnce(WorkflowTracker) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let tracker = WorkflowTracker::new();
        self.active.lock().unwrap_or_else(|e| e.into_inner()).insert(
            conversation.clone(),
            ActiveWorkflow {
                name,
                tracker: tracker.clone(),
            },
        );
        let guard = ActiveGuard {
            active: self.active.clone(),
            conversation: conversation.clone(),
        };
        let task = start(tracker);
        tokio::spawn(async move {
            let _guard = guard;
            task.await;
        });
    }

    /// Stop the conversation's workflow while it still waits on the user.
    fn revoke(&self, conversation: &ConversationId) -> Revocation {
        let Some(active) = self.active_entry(conversation) else {
            return Revocation::Idle;
        };
        match active.tracker.revoke() {
            Ok(()) => {
                // Wake the pending prompt, if any; otherwise the next one fails
                self.runner.registry().cancel_all(conversation);
                tracing::info!(conversation = %conversation, workflow = active.name, "Active workflow revoked");
                Revocation::Revoked
            }
            Err(state) if state.is_terminal() => Revocation::Idle,
            Err(state) => {
                tracing::debug!(conversation = %conversation, state = %state, "Workflow can no longer be revoked");
                Revocation::Busy
            }
        }
    }

    async fn say(&self, conversation: &ConversationId, text: &str) {
        self.bus
            .send_message(conversation, text, TextFormat::Plain)
            .await;
    }
}
