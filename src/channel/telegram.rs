// ChatPay — Telegram channel implementation using teloxide

#[cfg(feature = "telegram")]
mod implementation {
    use crate::bus::{MessageBus, OutboundMessage};
    use crate::channel::{BaseChannel, Channel};
    use crate::conversation::TextFormat;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use teloxide::prelude::*;
    use teloxide::types::ParseMode;

    pub struct TelegramChannel {
        base: BaseChannel,
        bot: Bot,
        running: Arc<AtomicBool>,
    }

    impl TelegramChannel {
        pub fn new(token: &str, allow_list: Vec<String>, bus: Arc<MessageBus>) -> Self {
            Self {
                base: BaseChannel::new("telegram", allow_list, bus),
                bot: Bot::new(token),
                running: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl Channel for TelegramChannel {
        fn name(&self) -> &str {
            self.base.name()
        }

        async fn start(&self) -> anyhow::Result<()> {
            if self.running.swap(true, Ordering::SeqCst) {
                return Ok(());
            }

            let bot = self.bot.clone();
            let base = Arc::new(self.base.clone());
            let running = self.running.clone();

            tracing::info!(channel = %self.name(), "Starting Telegram channel");

            tokio::spawn(async move {
                let handler = Update::filter_message().endpoint(
                    |base: Arc<BaseChannel>, msg: Message| async move {
                        if let Some(text) = msg.text() {
                            let sender_id = match msg.from.as_ref() {
                                Some(user) => match &user.username {
                                    Some(username) => format!("{}|{}", user.id, username),
                                    None => user.id.to_string(),
                                },
                                None => msg.chat.id.to_string(),
                            };
                            let chat_id = msg.chat.id.to_string();

                            base.handle_message(&sender_id, &chat_id, text).await;
                        }
                        respond(())
                    },
                );

                Dispatcher::builder(bot, handler)
                    .dependencies(dptree::deps![base])
                    .enable_ctrlc_handler()
                    .build()
                    .dispatch()
                    .await;

                running.store(false, Ordering::SeqCst);
                tracing::info!("Telegram dispatcher stopped");
            });

            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, msg: OutboundMessage) -> anyhow::Result<()> {
            let chat_id = ChatId(msg.chat_id.parse()?);

            if msg.format == TextFormat::Markdown {
                let formatted = self
                    .bot
                    .send_message(chat_id, &msg.content)
                    .parse_mode(ParseMode::Markdown)
                    .await;
                match formatted {
                    Ok(_) => return Ok(()),
                    // Unbalanced markup is rejected by Telegram; resend as plain text
                    Err(e) => tracing::debug!("Markdown send failed, retrying as plain: {}", e),
                }
            }

            self.bot.send_message(chat_id, &msg.content).await?;
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }
}

#[cfg(feature = "telegram")]
pub use implementation::TelegramChannel;

#[cfg(not(feature = "telegram"))]
pub struct TelegramChannel;

#[cfg(not(feature = "telegram"))]
impl TelegramChannel {
    pub fn new(
        _token: &str,
        _allow_list: Vec<String>,
        _bus: std::sync::Arc<crate::bus::MessageBus>,
    ) -> Self {
        Self
    }
}

#[cfg(not(feature = "telegram"))]
#[async_trait::async_trait]
impl crate::channel::Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }
    async fn start(&self) -> anyhow::Result<()> {
        anyhow::bail!("Telegram feature not enabled (rebuild with --features telegram)")
    }
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn send(&self, _msg: crate::bus::OutboundMessage) -> anyhow::Result<()> {
        anyhow::bail!("Telegram feature not enabled")
    }
    fn is_running(&self) -> bool {
        false
    }
}
