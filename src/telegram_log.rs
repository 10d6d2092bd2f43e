//! tracing layer that mirrors the bot's own log lines into a Telegram chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCH: usize = 50;
const MAX_LOG_CHARS: usize = 4000;

enum LogLine {
    /// WARN/ERROR, sent right away.
    Urgent(String),
    /// INFO, batched.
    Info(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
    /// Only events whose target starts with this are forwarded.
    target_prefix: &'static str,
}

impl TelegramLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId, target_prefix: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();

        tokio::spawn(async move {
            let mut batch: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    line = rx.recv() => match line {
                        Some(LogLine::Urgent(text)) => send_log(&bot, chat_id, &text).await,
                        Some(LogLine::Info(text)) => {
                            batch.push(text);
                            if batch.len() >= MAX_BATCH {
                                flush(&bot, chat_id, &mut batch).await;
                            }
                        }
                        None => {
                            flush(&bot, chat_id, &mut batch).await;
                            break;
                        }
                    },
                    _ = interval.tick() => flush(&bot, chat_id, &mut batch).await,
                }
            }
        });

        Self { tx, target_prefix }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    let text = truncate_log(text);
    if let Err(e) = bot.send_message(chat_id, text).await {
        // Not through tracing: that would feed back into this layer.
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let combined = batch.join("\n");
    batch.clear();
    send_log(bot, chat_id, &combined).await;
}

fn truncate_log(text: &str) -> String {
    match text.char_indices().nth(MAX_LOG_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Default)]
struct LineVisitor {
    line: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.line = format!("{:?}", value);
        } else if self.line.is_empty() {
            self.line = format!("{} = {:?}", field.name(), value);
        } else {
            self.line.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

fn format_line(level: Level, line: String) -> LogLine {
    match level {
        Level::ERROR => LogLine::Urgent(format!("❌ {}", line)),
        Level::WARN => LogLine::Urgent(format!("⚠️ {}", line)),
        _ => LogLine::Info(line),
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::INFO || !meta.target().starts_with(self.target_prefix) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        if self.tx.send(format_line(*meta.level(), visitor.line)).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_log() {
        assert_eq!(truncate_log("short"), "short");
        let long = "л".repeat(MAX_LOG_CHARS + 10);
        let cut = truncate_log(&long);
        assert_eq!(cut.chars().count(), MAX_LOG_CHARS + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_levels() {
        assert!(matches!(format_line(Level::ERROR, "x".into()), LogLine::Urgent(s) if s == "❌ x"));
        assert!(matches!(format_line(Level::WARN, "x".into()), LogLine::Urgent(s) if s.starts_with("⚠️")));
        assert!(matches!(format_line(Level::INFO, "x".into()), LogLine::Info(s) if s == "x"));
    }
}
