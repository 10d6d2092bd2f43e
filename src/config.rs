use chrono_tz::Tz;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use teloxide::types::ChatId;

use crate::chatbot::FreeTextPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A required variable is not set.
    Missing(&'static str),
    /// A variable is set but can't be used.
    Invalid { var: &'static str, value: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(var) => write!(f, "environment variable {} is required", var),
            Self::Invalid { var, value, reason } => {
                write!(f, "invalid {}='{}': {}", var, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// How updates reach the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Polling,
    Webhook {
        /// Public host Telegram pushes to.
        host: String,
        /// Local bind address.
        listen: SocketAddr,
    },
}

/// Where preferences are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Json,
    Sqlite,
}

pub struct Config {
    pub telegram_bot_token: String,
    pub openrouter_api_key: String,
    pub elevenlabs_api_key: String,
    pub transport: Transport,
    /// Directory for state files (preferences, logs).
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub free_text: FreeTextPolicy,
    /// Timezone for `/time`.
    pub timezone: Tz,
    /// Chat that receives forwarded log lines.
    pub log_chat_id: Option<ChatId>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));

        let telegram_bot_token = require("TG_API")?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Invalid {
                var: "TG_API",
                value: "<hidden>".into(),
                reason: "expected format 123456789:ABCdefGHI...".into(),
            });
        }

        let openrouter_api_key = require("OPENROUTER")?;
        let elevenlabs_api_key = require("ELEVEN_KEY")?;

        let webhook_host = get("RENDER_EXTERNAL_HOSTNAME");
        let wants_webhook = match get("BOT_TRANSPORT").as_deref() {
            None => webhook_host.is_some(),
            Some("polling") => false,
            Some("webhook") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "BOT_TRANSPORT",
                    value: other.to_string(),
                    reason: "expected 'polling' or 'webhook'".into(),
                });
            }
        };

        let transport = if wants_webhook {
            let host = webhook_host.ok_or(ConfigError::Missing("RENDER_EXTERNAL_HOSTNAME"))?;
            let bind_host = get("WEBAPP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
            let ip: IpAddr = bind_host.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "WEBAPP_HOST",
                value: bind_host.clone(),
                reason: e.to_string(),
            })?;
            let port = match get("PORT") {
                Some(port) => port.parse::<u16>().map_err(|e| ConfigError::Invalid {
                    var: "PORT",
                    value: port.clone(),
                    reason: e.to_string(),
                })?,
                None => 5000,
            };
            Transport::Webhook { host, listen: SocketAddr::new(ip, port) }
        } else {
            Transport::Polling
        };

        let store = match get("BOT_STORE").as_deref() {
            None | Some("json") => StoreKind::Json,
            Some("sqlite") => StoreKind::Sqlite,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "BOT_STORE",
                    value: other.to_string(),
                    reason: "expected 'json' or 'sqlite'".into(),
                });
            }
        };

        let free_text = match get("BOT_FREE_TEXT").as_deref() {
            None | Some("reject") => FreeTextPolicy::Reject,
            Some("forward") => FreeTextPolicy::Forward,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "BOT_FREE_TEXT",
                    value: other.to_string(),
                    reason: "expected 'reject' or 'forward'".into(),
                });
            }
        };

        let timezone = match get("BOT_TIMEZONE") {
            Some(tz) => tz.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                var: "BOT_TIMEZONE",
                value: tz.clone(),
                reason: e.to_string(),
            })?,
            None => chrono_tz::UTC,
        };

        let log_chat_id = match get("BOT_LOG_CHAT_ID") {
            Some(id) => Some(ChatId(id.parse::<i64>().map_err(|e| ConfigError::Invalid {
                var: "BOT_LOG_CHAT_ID",
                value: id.clone(),
                reason: e.to_string(),
            })?)),
            None => None,
        };

        let data_dir = get("BOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token,
            openrouter_api_key,
            elevenlabs_api_key,
            transport,
            data_dir,
            store,
            free_text,
            timezone,
            log_chat_id,
        })
    }

    /// Path Telegram posts updates to.
    pub fn webhook_path(&self) -> String {
        format!("/webhook/{}", self.telegram_bot_token)
    }

    /// Full public webhook URL, if running in webhook mode.
    pub fn webhook_url(&self) -> Option<String> {
        match &self.transport {
            Transport::Webhook { host, .. } => Some(format!("https://{}{}", host, self.webhook_path())),
            Transport::Polling => None,
        }
    }

    pub fn preferences_path(&self) -> PathBuf {
        match self.store {
            StoreKind::Json => self.data_dir.join("user_prefs.json"),
            StoreKind::Sqlite => self.data_dir.join("user_prefs.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TOKEN: &str = "123456789:ABCdefGHIjklMNOpqrsTUVwxyz";

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let mut env: HashMap<String, String> = HashMap::from([
            ("TG_API".to_string(), TOKEN.to_string()),
            ("OPENROUTER".to_string(), "or-key".to_string()),
            ("ELEVEN_KEY".to_string(), "el-key".to_string()),
        ]);
        for (k, v) in vars {
            env.insert(k.to_string(), v.to_string());
        }
        Config::from_lookup(|k| env.get(k).cloned())
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).expect("should load minimal config");
        assert_eq!(config.transport, Transport::Polling);
        assert_eq!(config.store, StoreKind::Json);
        assert_eq!(config.free_text, FreeTextPolicy::Reject);
        assert_eq!(config.timezone, chrono_tz::UTC);
        assert_eq!(config.preferences_path(), PathBuf::from("./user_prefs.json"));
        assert!(config.webhook_url().is_none());
        assert!(config.log_chat_id.is_none());
    }

    #[test]
    fn test_webhook_from_host() {
        let config = load(&[("RENDER_EXTERNAL_HOSTNAME", "bot.example.com"), ("PORT", "8443")]).unwrap();
        assert_eq!(
            config.transport,
            Transport::Webhook {
                host: "bot.example.com".into(),
                listen: "0.0.0.0:8443".parse().unwrap(),
            }
        );
        assert_eq!(
            config.webhook_url().unwrap(),
            format!("https://bot.example.com/webhook/{TOKEN}")
        );
    }

    #[test]
    fn test_polling_override_ignores_host() {
        let config = load(&[("RENDER_EXTERNAL_HOSTNAME", "bot.example.com"), ("BOT_TRANSPORT", "polling")]).unwrap();
        assert_eq!(config.transport, Transport::Polling);
    }

    #[test]
    fn test_webhook_without_host() {
        let err = assert_err(load(&[("BOT_TRANSPORT", "webhook")]));
        assert!(matches!(err, ConfigError::Missing("RENDER_EXTERNAL_HOSTNAME")));
    }

    #[test]
    fn test_missing_keys() {
        let err = assert_err(load(&[("OPENROUTER", "")]));
        assert!(matches!(err, ConfigError::Missing("OPENROUTER")));
        assert!(err.to_string().contains("OPENROUTER"));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["invalid_token_no_colon", "notanumber:ABCdef", "123456789:"] {
            let err = assert_err(load(&[("TG_API", token)]));
            assert!(matches!(err, ConfigError::Invalid { var: "TG_API", .. }), "{token}");
            assert!(!err.to_string().contains(token));
        }
    }

    #[test]
    fn test_invalid_port() {
        let err = assert_err(load(&[("RENDER_EXTERNAL_HOSTNAME", "h"), ("PORT", "eighty")]));
        assert!(matches!(err, ConfigError::Invalid { var: "PORT", .. }));
    }

    #[test]
    fn test_options() {
        let config = load(&[
            ("BOT_STORE", "sqlite"),
            ("BOT_FREE_TEXT", "forward"),
            ("BOT_TIMEZONE", "Asia/Bishkek"),
            ("BOT_LOG_CHAT_ID", "-100123"),
            ("BOT_DATA_DIR", "/var/lib/beknmd"),
        ])
        .unwrap();
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.free_text, FreeTextPolicy::Forward);
        assert_eq!(config.timezone, chrono_tz::Asia::Bishkek);
        assert_eq!(config.log_chat_id, Some(ChatId(-100123)));
        assert_eq!(config.preferences_path(), PathBuf::from("/var/lib/beknmd/user_prefs.db"));
    }

    #[test]
    fn test_invalid_choices() {
        assert!(matches!(assert_err(load(&[("BOT_STORE", "redis")])), ConfigError::Invalid { var: "BOT_STORE", .. }));
        assert!(matches!(assert_err(load(&[("BOT_FREE_TEXT", "echo")])), ConfigError::Invalid { var: "BOT_FREE_TEXT", .. }));
        assert!(matches!(assert_err(load(&[("BOT_TIMEZONE", "Mars/Base")])), ConfigError::Invalid { var: "BOT_TIMEZONE", .. }));
    }
}
