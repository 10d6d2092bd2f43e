//! Assistant engine - turns one incoming message into replies.
//!
//! Transport-agnostic: the Telegram layer hands us `(user_id, text)` and
//! delivers whatever [`Reply`] values come back.

use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::chatbot::commands::{self, Command, Input};
use crate::chatbot::completion::{CompletionClient, build_messages};
use crate::chatbot::context::ConversationContext;
use crate::chatbot::prefs::{Language, Persona, PreferenceStore, UnknownChoice, UserPreferences, Voice};
use crate::chatbot::speech::{SpeechClient, SpeechOutcome};

pub const WELCOME: &str = "👋 Welcome to BEKNMD, the digital nomad is online. Type /help";
pub const UNKNOWN_COMMAND: &str = "⚠️ Unknown command. Type /ask to chat or /help";

/// What to do with a message that isn't a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreeTextPolicy {
    /// Answer with the unknown-command hint.
    #[default]
    Reject,
    /// Treat it as `/ask <text>`.
    Forward,
}

/// Something to send back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Temporary audio file; the sender removes it after delivery.
    Voice(PathBuf),
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub free_text: FreeTextPolicy,
    pub timezone: Tz,
    /// Our own username, used to skip `/cmd@other_bot`.
    pub bot_username: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            free_text: FreeTextPolicy::Reject,
            timezone: chrono_tz::UTC,
            bot_username: None,
        }
    }
}

/// Localized reply when the completion service fails.
pub fn unavailable_message(language: Language) -> &'static str {
    match language {
        Language::En => "AI is temporarily unavailable.",
        Language::Ru => "ИИ временно недоступен.",
        Language::Es => "La IA no está disponible temporalmente.",
    }
}

fn choice_error(e: &UnknownChoice) -> String {
    format!("⚠️ Unknown {} '{}'. Choose one of: {}", e.kind, e.value, e.options.join(", "))
}

/// The assistant.
pub struct Assistant {
    config: AssistantConfig,
    store: Arc<dyn PreferenceStore>,
    context: Mutex<ConversationContext>,
    completion: CompletionClient,
    speech: SpeechClient,
}

impl Assistant {
    pub fn new(
        config: AssistantConfig,
        store: Arc<dyn PreferenceStore>,
        completion: CompletionClient,
        speech: SpeechClient,
    ) -> Self {
        Self {
            config,
            store,
            context: Mutex::new(ConversationContext::new()),
            completion,
            speech,
        }
    }

    /// Handle one message from a user.
    pub async fn handle(&self, user_id: u64, text: &str) -> Vec<Reply> {
        let input = commands::parse(text, self.config.bot_username.as_deref());
        if let Input::OtherBot(target) = &input {
            info!("Ignoring command for @{} from {}", target, user_id);
            return Vec::new();
        }

        let prefs = self.ensure_user(user_id);

        match input {
            Input::Command(cmd) => self.run(user_id, prefs, cmd).await,
            Input::OtherBot(_) => Vec::new(),
            Input::UnknownCommand(name) => {
                info!("Unknown command /{} from {}", name, user_id);
                vec![Reply::Text(UNKNOWN_COMMAND.to_string())]
            }
            Input::Text(text) => match self.config.free_text {
                FreeTextPolicy::Reject => vec![Reply::Text(UNKNOWN_COMMAND.to_string())],
                FreeTextPolicy::Forward => self.run(user_id, prefs, Command::Ask(text)).await,
            },
        }
    }

    /// Current preferences, creating defaults on first contact.
    pub fn preferences(&self, user_id: u64) -> UserPreferences {
        self.ensure_user(user_id)
    }

    /// Number of stored turns for a user.
    pub async fn context_len(&self, user_id: u64) -> usize {
        self.context.lock().await.len(user_id)
    }

    fn ensure_user(&self, user_id: u64) -> UserPreferences {
        match self.store.ensure(user_id) {
            Ok(prefs) => prefs,
            Err(e) => {
                error!("Failed to load preferences for {}: {}", user_id, e);
                UserPreferences::default()
            }
        }
    }

    fn save(&self, user_id: u64, prefs: UserPreferences) {
        if let Err(e) = self.store.set(user_id, prefs) {
            error!("Failed to save preferences for {}: {}", user_id, e);
        }
    }

    async fn run(&self, user_id: u64, mut prefs: UserPreferences, cmd: Command) -> Vec<Reply> {
        match cmd {
            Command::Start => vec![Reply::Text(WELCOME.to_string())],
            Command::Help => vec![Reply::Text(commands::help_text())],

            Command::Ask(prompt) => {
                if prompt.is_empty() {
                    return vec![Reply::Text("❓ Use like this: /ask What is the meaning of life?".into())];
                }
                self.converse(user_id, prefs, &prompt, prefs.mode, prefs.voice_mode).await
            }
            Command::Talk(prompt) => {
                if prompt.is_empty() {
                    return vec![Reply::Text("❓ Use like this: /talk Tell me a story".into())];
                }
                self.converse(user_id, prefs, &prompt, prefs.mode, true).await
            }
            Command::Meme => {
                self.converse(user_id, prefs, "Tell me one short meme-style joke.", Persona::Meme, prefs.voice_mode)
                    .await
            }
            Command::Wisdom => {
                self.converse(user_id, prefs, "Share one short piece of wisdom.", Persona::Wise, prefs.voice_mode)
                    .await
            }

            Command::Speak(text) => {
                let text = if text.is_empty() {
                    match self.context.lock().await.last_reply(user_id) {
                        Some(last) => last.to_string(),
                        None => return vec![Reply::Text("❓ Use like this: /speak Hello there".into())],
                    }
                } else {
                    text
                };
                vec![self.speak(prefs, &text).await]
            }

            Command::VoiceOn => {
                prefs.voice_mode = true;
                self.save(user_id, prefs);
                info!("Voice mode on for {}", user_id);
                vec![Reply::Text("🔊 Voice mode on. I'll read my replies aloud.".into())]
            }
            Command::VoiceOff => {
                prefs.voice_mode = false;
                self.save(user_id, prefs);
                info!("Voice mode off for {}", user_id);
                vec![Reply::Text("🔇 Voice mode off.".into())]
            }

            Command::Language(arg) => {
                if arg.is_empty() {
                    let options: Vec<_> = Language::ALL.iter().map(|l| l.code()).collect();
                    return vec![Reply::Text(format!(
                        "🌐 Language: {}. Options: {}",
                        prefs.language.code(),
                        options.join(", ")
                    ))];
                }
                match arg.parse::<Language>() {
                    Ok(language) => {
                        prefs.language = language;
                        self.save(user_id, prefs);
                        vec![Reply::Text(format!("✅ Language set to {} ({})", language.name(), language.code()))]
                    }
                    Err(e) => vec![Reply::Text(choice_error(&e))],
                }
            }
            Command::Mode(arg) => {
                if arg.is_empty() {
                    let options: Vec<_> = Persona::ALL.iter().map(|p| p.as_str()).collect();
                    return vec![Reply::Text(format!(
                        "🎭 Mode: {}. Options: {}",
                        prefs.mode.as_str(),
                        options.join(", ")
                    ))];
                }
                match arg.parse::<Persona>() {
                    Ok(mode) => {
                        prefs.mode = mode;
                        self.save(user_id, prefs);
                        vec![Reply::Text(format!("✅ Mode set to {}", mode.as_str()))]
                    }
                    Err(e) => vec![Reply::Text(choice_error(&e))],
                }
            }
            Command::Voice(arg) => {
                if arg.is_empty() {
                    let options: Vec<_> = Voice::ALL.iter().map(|v| v.name()).collect();
                    return vec![Reply::Text(format!(
                        "🎙 Voice: {}. Options: {}",
                        prefs.voice.name(),
                        options.join(", ")
                    ))];
                }
                match arg.parse::<Voice>() {
                    Ok(voice) => {
                        prefs.voice = voice;
                        self.save(user_id, prefs);
                        vec![Reply::Text(format!("✅ Voice set to {}", voice.name()))]
                    }
                    Err(e) => vec![Reply::Text(choice_error(&e))],
                }
            }

            Command::Time => {
                let now = chrono::Utc::now().with_timezone(&self.config.timezone);
                vec![Reply::Text(format!("🕒 {}", now.format("%Y-%m-%d %H:%M:%S %Z")))]
            }
        }
    }

    /// Completion reply, plus a voice note when `voiced` and the call succeeded.
    async fn converse(
        &self,
        user_id: u64,
        prefs: UserPreferences,
        prompt: &str,
        persona: Persona,
        voiced: bool,
    ) -> Vec<Reply> {
        match self.complete(user_id, prefs.language, persona, prompt).await {
            Ok(reply) => {
                let mut replies = vec![Reply::Text(reply.clone())];
                if voiced {
                    replies.push(self.speak(prefs, &reply).await);
                }
                replies
            }
            Err(notice) => vec![Reply::Text(notice)],
        }
    }

    /// Ask the model. Context is only recorded on success.
    async fn complete(&self, user_id: u64, language: Language, persona: Persona, prompt: &str) -> Result<String, String> {
        let history = self.context.lock().await.window(user_id);
        let messages = build_messages(persona, language, &history, prompt);

        match self.completion.complete(&messages).await {
            Ok(reply) => {
                self.context.lock().await.record_exchange(user_id, prompt, &reply);
                Ok(reply)
            }
            Err(e) => {
                warn!("Completion failed for {}: {}", user_id, e);
                Err(unavailable_message(language).to_string())
            }
        }
    }

    async fn speak(&self, prefs: UserPreferences, text: &str) -> Reply {
        match self.speech.speak(text, prefs.voice, prefs.language).await {
            SpeechOutcome::Audio(path) => Reply::Voice(path),
            SpeechOutcome::Notice(notice) => Reply::Text(notice),
        }
    }
}
