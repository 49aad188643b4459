// ChatPay — Interactive console channel (rustyline)

use crate::bus::{MessageBus, OutboundMessage};
use crate::channel::{BaseChannel, Channel};
use async_trait::async_trait;
use rustyline::error::ReadlineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A single local conversation, `console:<session>`, read from the terminal.
pub struct ConsoleChannel {
    base: BaseChannel,
    session: String,
    running: Arc<AtomicBool>,
    closed: Arc<Notify>,
}

impl ConsoleChannel {
    pub fn new(session: &str, bus: Arc<MessageBus>) -> Self {
        Self {
            base: BaseChannel::new("console", Vec::new(), bus),
            session: session.to_string(),
            running: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(Notify::new()),
        }
    }

    /// Resolves once the user leaves the console (`exit`, Ctrl+D).
    pub async fn wait_closed(&self) {
        self.closed.notified().await;
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut rl = rustyline::DefaultEditor::new()?;
        let base = self.base.clone();
        let session = self.session.clone();
        let running = self.running.clone();
        let closed = self.closed.clone();
        let handle = tokio::runtime::Handle::current();

        tokio::task::spawn_blocking(move || {
            while running.load(Ordering::SeqCst) {
                match rl.readline("> ") {
                    Ok(line) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if trimmed == "exit" || trimmed == "quit" {
                            break;
                        }
                        let _ = rl.add_history_entry(trimmed);
                        handle.block_on(base.handle_message("console", &session, trimmed));
                    }
                    Err(ReadlineError::Interrupted) => {
                        println!("Use 'exit' or Ctrl+D to quit.");
                    }
                    Err(ReadlineError::Eof) => break,
                    Err(e) => {
                        tracing::error!("Readline error: {}", e);
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            closed.notify_one();
        });

        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        println!("\n{}\n", msg.content);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
