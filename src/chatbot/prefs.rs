//! Per-user preferences and the stores that persist them.
//!
//! Handlers only talk to the [`PreferenceStore`] trait, so the backing
//! storage (flat JSON file or SQLite, see `database.rs`) can be swapped
//! through configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{info, warn};

/// Reply language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ru,
    Es,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::En, Language::Ru, Language::Es];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
            Language::Es => "es",
        }
    }

    /// Name used inside the system prompt.
    pub fn name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Ru => "Russian",
            Language::Es => "Spanish",
        }
    }
}

/// Persona ("vibe") that flavors completion replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Wise,
    Meme,
    Smart,
}

impl Persona {
    pub const ALL: [Persona; 3] = [Persona::Wise, Persona::Meme, Persona::Smart];

    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::Wise => "wise",
            Persona::Meme => "meme",
            Persona::Smart => "smart",
        }
    }
}

/// Voices available on the speech service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Sargazy,
    Kanykey,
    Almambet,
}

impl Voice {
    pub const ALL: [Voice; 3] = [Voice::Sargazy, Voice::Kanykey, Voice::Almambet];

    pub fn name(&self) -> &'static str {
        match self {
            Voice::Sargazy => "Sargazy",
            Voice::Kanykey => "Kanykey",
            Voice::Almambet => "Almambet",
        }
    }

    /// ElevenLabs voice identifier.
    pub fn voice_id(&self) -> &'static str {
        match self {
            Voice::Sargazy => "EXAVITQu4vr4xnSDxMaL",
            Voice::Kanykey => "21m00Tcm4TlvDq8ikWAM",
            Voice::Almambet => "AZnzlk1XvdvUeBnXmlld",
        }
    }
}

/// Value that didn't match any known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChoice {
    pub kind: &'static str,
    pub value: String,
    pub options: Vec<&'static str>,
}

impl fmt::Display for UnknownChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown {} '{}' (available: {})",
            self.kind,
            self.value,
            self.options.join(", ")
        )
    }
}

impl std::error::Error for UnknownChoice {}

impl FromStr for Language {
    type Err = UnknownChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Language::ALL
            .into_iter()
            .find(|l| l.code() == wanted)
            .ok_or_else(|| UnknownChoice {
                kind: "language",
                value: s.trim().to_string(),
                options: Language::ALL.iter().map(|l| l.code()).collect(),
            })
    }
}

impl FromStr for Persona {
    type Err = UnknownChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Persona::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| UnknownChoice {
                kind: "mode",
                value: s.trim().to_string(),
                options: Persona::ALL.iter().map(|p| p.as_str()).collect(),
            })
    }
}

impl FromStr for Voice {
    type Err = UnknownChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Voice::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownChoice {
                kind: "voice",
                value: wanted.to_string(),
                options: Voice::ALL.iter().map(|v| v.name()).collect(),
            })
    }
}

/// Everything we remember about a user between restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub mode: Persona,
    #[serde(default)]
    pub voice: Voice,
    #[serde(default)]
    pub voice_mode: bool,
}

/// Errors from a preference store.
#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: std::io::Error },
    Json { path: PathBuf, source: serde_json::Error },
    Sqlite(rusqlite::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "preference file '{}': {}", path.display(), source)
            }
            Self::Json { path, source } => {
                write!(f, "invalid preference file '{}': {}", path.display(), source)
            }
            Self::Sqlite(e) => write!(f, "preference database: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::Sqlite(e) => Some(e),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

/// Key/value access to user preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, user_id: u64) -> Result<Option<UserPreferences>, StoreError>;

    /// Insert or replace. Persists before returning.
    fn set(&self, user_id: u64, prefs: UserPreferences) -> Result<(), StoreError>;

    /// Fetch the user's preferences, creating the default entry on first contact.
    fn ensure(&self, user_id: u64) -> Result<UserPreferences, StoreError> {
        match self.get(user_id)? {
            Some(prefs) => Ok(prefs),
            None => {
                let prefs = UserPreferences::default();
                self.set(user_id, prefs)?;
                info!("👤 New user {}", user_id);
                Ok(prefs)
            }
        }
    }
}

/// Flat JSON file mapping user id to preferences, rewritten on every change.
pub struct JsonPreferenceStore {
    path: PathBuf,
    prefs: Mutex<HashMap<u64, UserPreferences>>,
}

impl JsonPreferenceStore {
    /// Load the file once; a missing file starts an empty store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let prefs = if path.exists() {
            let json = std::fs::read_to_string(path)
                .map_err(|e| StoreError::Io { path: path.to_path_buf(), source: e })?;
            let prefs: HashMap<u64, UserPreferences> = serde_json::from_str(&json)
                .map_err(|e| StoreError::Json { path: path.to_path_buf(), source: e })?;
            info!("Loaded preferences from {:?} ({} users)", path, prefs.len());
            prefs
        } else {
            info!("No preference file, starting fresh");
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            prefs: Mutex::new(prefs),
        })
    }

    fn save(&self, prefs: &HashMap<u64, UserPreferences>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(prefs)
            .map_err(|e| StoreError::Json { path: self.path.clone(), source: e })?;

        // Write next to the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| StoreError::Io { path: tmp.clone(), source: e })?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::Io { path: self.path.clone(), source: e })?;

        Ok(())
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn get(&self, user_id: u64) -> Result<Option<UserPreferences>, StoreError> {
        let prefs = self.prefs.lock().expect("preference lock poisoned");
        Ok(prefs.get(&user_id).copied())
    }

    fn set(&self, user_id: u64, value: UserPreferences) -> Result<(), StoreError> {
        let mut prefs = self.prefs.lock().expect("preference lock poisoned");
        prefs.insert(user_id, value);
        if let Err(e) = self.save(&prefs) {
            warn!("Failed to save preferences: {e}");
            return Err(e);
        }
        Ok(())
    }
}
