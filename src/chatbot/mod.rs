//! Chatbot module - commands, preferences, completion and speech.

pub mod commands;
pub mod completion;
pub mod context;
pub mod database;
pub mod engine;
pub mod prefs;
pub mod speech;
pub mod telegram;


pub use completion::CompletionClient;
pub use database::Database;
pub use engine::{Assistant, AssistantConfig, FreeTextPolicy, Reply};
pub use prefs::{JsonPreferenceStore, PreferenceStore, UserPreferences};
pub use speech::{SpeechClient, SpeechOutcome};
pub use telegram::TelegramClient;
