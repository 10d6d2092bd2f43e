//! Telegram client using teloxide.

use teloxide::prelude::*;
use teloxide::types::{BotCommand, ChatAction, InputFile};
use tracing::{info, warn};

use crate::chatbot::commands::COMMANDS;
use crate::chatbot::engine::Reply;

/// Telegram caps text messages at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Publish the command menu shown in Telegram clients.
    pub async fn register_commands(&self) -> Result<(), String> {
        let commands: Vec<BotCommand> = COMMANDS
            .iter()
            .map(|c| BotCommand::new(c.name, c.description))
            .collect();

        self.bot.set_my_commands(commands).await.map_err(|e| {
            let msg = format!("Failed to register commands: {e}");
            warn!("{}", msg);
            msg
        })?;

        info!("Registered {} bot commands", COMMANDS.len());
        Ok(())
    }

    pub async fn send_typing(&self, chat_id: ChatId) {
        if let Err(e) = self.bot.send_chat_action(chat_id, ChatAction::Typing).await {
            warn!("Failed to send typing action: {e}");
        }
    }

    pub async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<i64, String> {
        let mut last_id = 0;
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            last_id = self
                .bot
                .send_message(chat_id, chunk)
                .await
                .map(|msg| msg.id.0 as i64)
                .map_err(|e| {
                    let msg = format!("Failed to send: {e}");
                    warn!("{}", msg);
                    msg
                })?;
        }
        Ok(last_id)
    }

    /// Send an audio file as a voice message, then remove the file.
    pub async fn send_voice_file(&self, chat_id: ChatId, path: &std::path::Path) -> Result<i64, String> {
        info!("🔊 Sending voice to chat {} ({:?})", chat_id, path);

        let result = self
            .bot
            .send_voice(chat_id, InputFile::file(path))
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send voice: {e}");
                warn!("{}", msg);
                msg
            });

        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove {:?}: {e}", path);
        }
        result
    }

    /// Deliver replies in order. A failed send doesn't stop the rest.
    pub async fn deliver(&self, chat_id: ChatId, replies: Vec<Reply>) {
        for reply in replies {
            let _ = match reply {
                Reply::Text(text) => self.send_message(chat_id, &text).await,
                Reply::Voice(path) => self.send_voice_file(chat_id, &path).await,
            };
        }
    }
}

/// Split text into pieces of at most `max` characters.
fn split_message(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let end = rest.char_indices().nth(max).map_or(rest.len(), |(idx, _)| idx);
        chunks.push(&rest[..end]);
        rest = &rest[end..];
    }
    chunks
}
