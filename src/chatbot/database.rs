//! SQLite-backed preference store.

use crate::chatbot::prefs::{PreferenceStore, StoreError, UserPreferences};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Preference store kept in an embedded SQLite database.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;

        info!("Loaded preference database from {:?} ({} users)", path, db.count()?);
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS user_prefs (
                user_id INTEGER PRIMARY KEY,
                prefs TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#)?;
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM user_prefs", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// Preferences are stored as a JSON document per user so the row layout matches
// the flat-file store and new fields only need a serde default.
impl PreferenceStore for Database {
    fn get(&self, user_id: u64) -> Result<Option<UserPreferences>, StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let json: Option<String> = conn
            .query_row(
                "SELECT prefs FROM user_prefs WHERE user_id = ?1",
                params![user_id as i64],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|e| StoreError::Json {
                path: format!("user_prefs/{user_id}").into(),
                source: e,
            }),
            None => Ok(None),
        }
    }

    fn set(&self, user_id: u64, prefs: UserPreferences) -> Result<(), StoreError> {
        let json = serde_json::to_string(&prefs).map_err(|e| StoreError::Json {
            path: format!("user_prefs/{user_id}").into(),
            source: e,
        })?;
        let now = chrono::Utc::now().to_rfc3339();

        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO user_prefs (user_id, prefs, updated_at) VALUES (?1, ?2, ?3)",
            params![user_id as i64, json, now],
        )?;
        debug!("Saved preferences for {}", user_id);
        Ok(())
    }
}
