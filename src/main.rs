use std::sync::Arc;

use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use beknmd::chatbot::{
    Assistant, AssistantConfig, CompletionClient, Database, JsonPreferenceStore, PreferenceStore,
    SpeechClient, TelegramClient,
};
use beknmd::config::{Config, StoreKind, Transport};
use beknmd::telegram_log::TelegramLogLayer;

struct BotState {
    assistant: Assistant,
    telegram: TelegramClient,
}

fn open_store(config: &Config) -> Result<Arc<dyn PreferenceStore>, String> {
    let path = config.preferences_path();
    let store: Arc<dyn PreferenceStore> = match config.store {
        StoreKind::Json => Arc::new(JsonPreferenceStore::open(&path).map_err(|e| e.to_string())?),
        StoreKind::Sqlite => Arc::new(Database::open(&path).map_err(|e| e.to_string())?),
    };
    Ok(store)
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("beknmd.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let tg_layer = config
        .log_chat_id
        .map(|chat_id| TelegramLogLayer::new(bot.clone(), chat_id, "beknmd"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(tg_layer)
        .init();

    info!("🚀 Starting beknmd...");
    info!("Data dir: {:?}", config.data_dir);
    info!("Free text policy: {:?}", config.free_text);

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open preference store: {e}");
            std::process::exit(1);
        }
    };

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            Some(me.username().to_string())
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            None
        }
    };

    let assistant = Assistant::new(
        AssistantConfig {
            free_text: config.free_text,
            timezone: config.timezone,
            bot_username,
        },
        store,
        CompletionClient::new(config.openrouter_api_key.clone()),
        SpeechClient::new(config.elevenlabs_api_key.clone()),
    );

    let telegram = TelegramClient::new(bot.clone());
    telegram.register_commands().await.ok();

    let state = Arc::new(BotState { assistant, telegram });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    match &config.transport {
        Transport::Polling => {
            // A leftover webhook blocks getUpdates.
            if let Err(e) = bot.delete_webhook().await {
                warn!("Failed to delete webhook: {e}");
            }
            info!("Listening with long polling");
            dispatcher.dispatch().await;
        }
        Transport::Webhook { listen, .. } => {
            let Some(url) = config.webhook_url().and_then(|u| reqwest::Url::parse(&u).ok()) else {
                error!("Invalid webhook host");
                std::process::exit(1);
            };

            let options = webhooks::Options::new(*listen, url).drop_pending_updates();
            let listener = match webhooks::axum(bot.clone(), options).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Failed to set up webhook: {e}");
                    std::process::exit(1);
                }
            };

            info!("Listening for webhooks on {}", listen);
            dispatcher
                .dispatch_with_listener(listener, LoggingErrorHandler::with_custom_text("Webhook listener error"))
                .await;

            if let Err(e) = bot.delete_webhook().await {
                warn!("Failed to delete webhook: {e}");
            }
        }
    }

    info!("👋 Stopped");
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let user = match msg.from {
        Some(ref u) => u,
        None => return Ok(()),
    };

    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    let username = user.username.as_deref().unwrap_or(&user.first_name);
    let text_preview: String = text.chars().take(100).collect();
    info!("📨 {} ({}): \"{}\"", username, user.id, text_preview);

    state.telegram.send_typing(msg.chat.id).await;
    let replies = state.assistant.handle(user.id.0, text).await;
    state.telegram.deliver(msg.chat.id, replies).await;

    Ok(())
}
