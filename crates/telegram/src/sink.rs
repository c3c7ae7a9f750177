use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{info, warn};

use common::{Error, NotificationSink, Result};

/// Delivers alert messages to a fixed set of Telegram chats.
pub struct TelegramSink {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramSink {
    pub fn new(token: impl Into<String>, chat_ids: &[i64]) -> Self {
        info!(chats = chat_ids.len(), "Telegram notifications enabled");
        Self {
            bot: Bot::new(token),
            chat_ids: chat_ids.iter().copied().map(ChatId).collect(),
        }
    }

    pub fn chat_ids(&self) -> &[ChatId] {
        &self.chat_ids
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    /// Succeeds when at least one chat received the message.
    async fn send(&self, text: &str) -> Result<()> {
        if self.chat_ids.is_empty() {
            return Err(Error::Notification("no Telegram chat ids configured".into()));
        }
        let delivered = send_alert(&self.bot, &self.chat_ids, text).await;
        if delivered == 0 {
            return Err(Error::Notification(format!(
                "delivered to none of {} chats",
                self.chat_ids.len()
            )));
        }
        Ok(())
    }
}

/// Send a proactive alert to all configured chat IDs.
/// Returns how many chats accepted it.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) -> usize {
    let mut delivered = 0;
    for &chat_id in chat_ids {
        match bot.send_message(chat_id, message).await {
            Ok(_) => delivered += 1,
            Err(e) => warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert"),
        }
    }
    delivered
}
