//! Both preference backends behave the same behind the store interface.

use std::sync::Arc;

use beknmd::chatbot::prefs::{Language, Persona, Voice};
use beknmd::chatbot::{Database, JsonPreferenceStore, PreferenceStore, UserPreferences};
use tempfile::TempDir;

fn backends(dir: &TempDir) -> Vec<(&'static str, Arc<dyn PreferenceStore>)> {
    let json: Arc<dyn PreferenceStore> =
        Arc::new(JsonPreferenceStore::open(&dir.path().join("user_prefs.json")).unwrap());
    let sqlite: Arc<dyn PreferenceStore> = Arc::new(Database::open(&dir.path().join("user_prefs.db")).unwrap());
    vec![("json", json), ("sqlite", sqlite)]
}

#[test]
fn ensure_then_update() {
    let dir = TempDir::new().unwrap();
    for (name, store) in backends(&dir) {
        assert_eq!(store.get(10).unwrap(), None, "{name}");

        let mut prefs = store.ensure(10).unwrap();
        assert_eq!(prefs, UserPreferences::default(), "{name}");

        prefs.language = Language::Ru;
        prefs.mode = Persona::Smart;
        prefs.voice = Voice::Kanykey;
        prefs.voice_mode = true;
        store.set(10, prefs).unwrap();

        // ensure never overwrites an existing entry
        assert_eq!(store.ensure(10).unwrap(), prefs, "{name}");
    }
}

#[test]
fn entries_survive_restart() {
    let dir = TempDir::new().unwrap();
    let prefs = UserPreferences { language: Language::Es, voice_mode: true, ..Default::default() };

    for (_, store) in backends(&dir) {
        store.set(77, prefs).unwrap();
    }

    for (name, store) in backends(&dir) {
        assert_eq!(store.get(77).unwrap(), Some(prefs), "{name}");
    }
}

#[test]
fn json_file_is_rewritten_wholesale() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("user_prefs.json");
    let store = JsonPreferenceStore::open(&path).unwrap();
    store.ensure(1).unwrap();
    store.ensure(2).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        json["1"],
        serde_json::json!({"language": "en", "mode": "wise", "voice": "Sargazy", "voice_mode": false})
    );
    assert!(json.get("2").is_some());
}
