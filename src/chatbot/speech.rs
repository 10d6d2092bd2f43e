//! Text-to-speech using ElevenLabs, with an offline fallback.
//!
//! Generated audio is written to a temporary file and the caller gets the
//! path back. When the service is out of quota the caller gets a notice
//! instead; any other failure goes to the local synthesizer (espeak-ng, then
//! ffmpeg to OGG Opus).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chatbot::prefs::{Language, Voice};

pub const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
pub const SPEECH_MODEL: &str = "eleven_multilingual_v2";

/// Longer texts are cut before synthesis.
pub const MAX_SPEECH_CHARS: usize = 900;

pub const QUOTA_NOTICE: &str = "📛 ElevenLabs limit reached.";
pub const UNAVAILABLE_NOTICE: &str = "🔇 Voice is unavailable right now.";

/// What a speech request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Audio file ready to send. The caller owns (and should remove) it.
    Audio(PathBuf),
    /// Nothing to play; tell the user this instead.
    Notice(String),
}

#[derive(Debug)]
pub enum SpeechError {
    Http(String),
    Quota,
    Api(String),
    Io(std::io::Error),
    Synth(String),
}

impl std::fmt::Display for SpeechError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeechError::Http(e) => write!(f, "TTS request failed: {e}"),
            SpeechError::Quota => write!(f, "TTS quota exhausted"),
            SpeechError::Api(e) => write!(f, "TTS error {e}"),
            SpeechError::Io(e) => write!(f, "TTS file error: {e}"),
            SpeechError::Synth(e) => write!(f, "local synthesizer failed: {e}"),
        }
    }
}

impl std::error::Error for SpeechError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpeechError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SpeechError {
    fn from(e: std::io::Error) -> Self {
        SpeechError::Io(e)
    }
}

/// Offline synthesizer used when the hosted service fails.
pub trait FallbackSynthesizer: Send + Sync {
    /// Write audio for `text` to `output`. Blocking.
    fn synthesize(&self, text: &str, language: Language, output: &Path) -> Result<(), SpeechError>;

    /// File extension of the produced audio.
    fn extension(&self) -> &'static str {
        "wav"
    }
}

/// Runs `espeak-ng`, then converts its WAV output to OGG Opus with `ffmpeg`
/// so Telegram plays it as a voice note.
pub struct Espeak {
    program: String,
    ffmpeg: String,
}

impl Espeak {
    pub fn new() -> Self {
        Self::with_programs("espeak-ng", "ffmpeg")
    }

    pub fn with_programs(program: &str, ffmpeg: &str) -> Self {
        Self {
            program: program.to_string(),
            ffmpeg: ffmpeg.to_string(),
        }
    }

    fn run_espeak(&self, text: &str, language: Language, wav_path: &str) -> Result<(), SpeechError> {
        // Text goes through stdin so a leading '-' is never read as a flag.
        let mut child = Command::new(&self.program)
            .args(["-v", language.code(), "-w", wav_path, "--stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SpeechError::Synth(format!("failed to run {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(text.as_bytes()) {
                drop(stdin);
                let _ = child.kill();
                let _ = child.wait();
                return Err(SpeechError::Synth(format!("failed to write to {}: {e}", self.program)));
            }
        }
        let result = child.wait_with_output()?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(SpeechError::Synth(stderr.trim().to_string()));
        }
        Ok(())
    }

    /// Convert WAV to OGG Opus for Telegram voice messages.
    fn convert_wav_to_ogg(&self, wav_path: &str, ogg_path: &str) -> Result<(), SpeechError> {
        let output = Command::new(&self.ffmpeg)
            .args(["-y", "-i", wav_path, "-c:a", "libopus", "-b:a", "64k", "-f", "ogg", ogg_path])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| SpeechError::Synth(format!("failed to run {}: {e}", self.ffmpeg)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechError::Synth(format!("ffmpeg conversion failed: {}", stderr.trim())));
        }
        Ok(())
    }
}

impl Default for Espeak {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackSynthesizer for Espeak {
    fn synthesize(&self, text: &str, language: Language, output: &Path) -> Result<(), SpeechError> {
        let output_path = output
            .to_str()
            .ok_or_else(|| SpeechError::Synth(format!("non-UTF-8 path {:?}", output)))?;
        let wav_path = output.with_extension("wav");
        let wav_str = wav_path
            .to_str()
            .ok_or_else(|| SpeechError::Synth(format!("non-UTF-8 path {:?}", wav_path)))?;

        let result = self
            .run_espeak(text, language, wav_str)
            .and_then(|_| self.convert_wav_to_ogg(wav_str, output_path));

        let _ = std::fs::remove_file(&wav_path);
        result
    }

    fn extension(&self) -> &'static str {
        "ogg"
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice_settings: VoiceSettings,
    model_id: &'static str,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// TTS client for the ElevenLabs API.
pub struct SpeechClient {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
    fallback: Arc<dyn FallbackSynthesizer>,
}

impl SpeechClient {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, ELEVENLABS_URL.to_string(), Arc::new(Espeak::new()))
    }

    /// `endpoint` is the text-to-speech base URL; the voice id is appended.
    pub fn with_endpoint(api_key: String, endpoint: String, fallback: Arc<dyn FallbackSynthesizer>) -> Self {
        Self {
            api_key,
            endpoint,
            client: reqwest::Client::new(),
            fallback,
        }
    }

    /// Speak `text` with the given voice, falling back to the local synthesizer.
    pub async fn speak(&self, text: &str, voice: Voice, language: Language) -> SpeechOutcome {
        let text = truncate_chars(text, MAX_SPEECH_CHARS);
        let preview: String = text.chars().take(50).collect();
        info!("🔊 TTS ({}): \"{}\"", voice.name(), preview);

        let audio = match self.request(text, voice).await {
            Ok(audio) => audio,
            Err(SpeechError::Quota) => {
                warn!("TTS quota exhausted");
                return SpeechOutcome::Notice(QUOTA_NOTICE.to_string());
            }
            Err(e) => {
                warn!("{e}, using local synthesizer");
                return self.fallback(text, language).await;
            }
        };

        match write_temp(&audio, "mp3") {
            Ok(path) => {
                debug!("Wrote {} bytes of audio to {:?}", audio.len(), path);
                SpeechOutcome::Audio(path)
            }
            Err(e) => {
                warn!("Failed to store TTS audio: {e}");
                self.fallback(text, language).await
            }
        }
    }

    async fn request(&self, text: &str, voice: Voice) -> Result<Vec<u8>, SpeechError> {
        let body = SpeechRequest {
            text,
            voice_settings: VoiceSettings { stability: 0.3, similarity_boost: 0.8 },
            model_id: SPEECH_MODEL,
        };

        let response = self
            .client
            .post(format!("{}/{}", self.endpoint, voice.voice_id()))
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SpeechError::Quota);
        }
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Api(format!("{}: {}", status, body)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Http(format!("failed to read audio: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn fallback(&self, text: &str, language: Language) -> SpeechOutcome {
        let synth = self.fallback.clone();
        let text = text.to_string();

        let result = tokio::task::spawn_blocking(move || -> Result<PathBuf, SpeechError> {
            let path = temp_path(synth.extension())?;
            if let Err(e) = synth.synthesize(&text, language, &path) {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
            Ok(path)
        })
        .await;

        match result {
            Ok(Ok(path)) => {
                info!("🔊 Local synthesizer wrote {:?}", path);
                SpeechOutcome::Audio(path)
            }
            Ok(Err(e)) => {
                warn!("{e}");
                SpeechOutcome::Notice(UNAVAILABLE_NOTICE.to_string())
            }
            Err(e) => {
                warn!("Local synthesizer task failed: {e}");
                SpeechOutcome::Notice(UNAVAILABLE_NOTICE.to_string())
            }
        }
    }
}

/// First `max` characters of `text` (never splits a character).
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Create an empty temp file that outlives this process's handle.
fn temp_path(extension: &str) -> Result<PathBuf, SpeechError> {
    let file = tempfile::Builder::new()
        .prefix("beknmd_voice_")
        .suffix(&format!(".{extension}"))
        .tempfile()?;
    let (_, path) = file.keep().map_err(|e| SpeechError::Io(e.error))?;
    Ok(path)
}

fn write_temp(data: &[u8], extension: &str) -> Result<PathBuf, SpeechError> {
    let path = temp_path(extension)?;
    if let Err(e) = std::fs::write(&path, data) {
        let _ = std::fs::remove_file(&path);
        return Err(e.into());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, body::Bytes, extract::Path as UrlPath, http::{HeaderMap, StatusCode}, routing::post};
    use serde_json::Value;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a fixed payload instead of running espeak.
    struct StubSynth {
        calls: AtomicUsize,
        fail: bool,
        last_language: Mutex<Option<Language>>,
    }

    impl StubSynth {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), fail, last_language: Mutex::new(None) })
        }
    }

    impl FallbackSynthesizer for StubSynth {
        fn synthesize(&self, _text: &str, language: Language, output: &Path) -> Result<(), SpeechError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_language.lock().unwrap() = Some(language);
            if self.fail {
                return Err(SpeechError::Synth("stub failure".into()));
            }
            std::fs::write(output, b"RIFFfake")?;
            Ok(())
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/tts")
    }

    fn status_router(status: StatusCode) -> Router {
        Router::new().route("/tts/{voice}", post(move || async move { (status, "nope") }))
    }

    fn take_audio(outcome: SpeechOutcome) -> PathBuf {
        match outcome {
            SpeechOutcome::Audio(path) => path,
            SpeechOutcome::Notice(text) => panic!("expected audio, got notice: {text}"),
        }
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("привет", 2), "пр");
    }

    #[tokio::test]
    async fn test_success_writes_mp3() {
        type Seen = Arc<Mutex<Option<(String, String, Value)>>>;
        let seen: Seen = Arc::default();
        let seen_clone = seen.clone();
        let router = Router::new().route(
            "/tts/{voice}",
            post(move |UrlPath(voice): UrlPath<String>, headers: HeaderMap, Json(body): Json<Value>| {
                let seen = seen_clone.clone();
                async move {
                    let key = headers.get("xi-api-key").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
                    *seen.lock().unwrap() = Some((voice, key, body));
                    Bytes::from_static(b"ID3audio")
                }
            }),
        );
        let synth = StubSynth::new(false);
        let client = SpeechClient::with_endpoint("eleven".into(), serve(router).await, synth.clone());

        let path = take_audio(client.speak("hello there", Voice::Kanykey, Language::En).await);
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp3"));
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3audio");
        std::fs::remove_file(&path).unwrap();

        let (voice, key, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(voice, Voice::Kanykey.voice_id());
        assert_eq!(key, "eleven");
        assert_eq!(body["text"], "hello there");
        assert_eq!(body["model_id"], SPEECH_MODEL);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_long_text_is_truncated() {
        let seen: Arc<Mutex<Option<String>>> = Arc::default();
        let seen_clone = seen.clone();
        let router = Router::new().route(
            "/tts/{voice}",
            post(move |Json(body): Json<Value>| {
                let seen = seen_clone.clone();
                async move {
                    *seen.lock().unwrap() = body["text"].as_str().map(str::to_string);
                    Bytes::from_static(b"ID3")
                }
            }),
        );
        let client = SpeechClient::with_endpoint("k".into(), serve(router).await, StubSynth::new(false));

        let text = "ж".repeat(1500);
        let path = take_audio(client.speak(&text, Voice::Sargazy, Language::Ru).await);
        let _ = std::fs::remove_file(path);

        let sent = seen.lock().unwrap().take().unwrap();
        assert_eq!(sent.chars().count(), MAX_SPEECH_CHARS);
    }

    #[tokio::test]
    async fn test_quota_returns_notice() {
        let synth = StubSynth::new(false);
        let client = SpeechClient::with_endpoint(
            "k".into(),
            serve(status_router(StatusCode::TOO_MANY_REQUESTS)).await,
            synth.clone(),
        );

        let outcome = client.speak("hi", Voice::Sargazy, Language::En).await;
        assert_eq!(outcome, SpeechOutcome::Notice(QUOTA_NOTICE.to_string()));
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_service_error_uses_fallback() {
        let synth = StubSynth::new(false);
        let client = SpeechClient::with_endpoint(
            "k".into(),
            serve(status_router(StatusCode::SERVICE_UNAVAILABLE)).await,
            synth.clone(),
        );

        let path = take_audio(client.speak("hola", Voice::Sargazy, Language::Es).await);
        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));
        std::fs::remove_file(&path).unwrap();

        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*synth.last_language.lock().unwrap(), Some(Language::Es));
    }

    #[tokio::test]
    async fn test_connection_error_uses_fallback() {
        // Bind and drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let synth = StubSynth::new(false);
        let client = SpeechClient::with_endpoint("k".into(), format!("http://{addr}/tts"), synth.clone());

        let path = take_audio(client.speak("hi", Voice::Almambet, Language::En).await);
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_fallback_failure_returns_notice() {
        let client = SpeechClient::with_endpoint(
            "k".into(),
            serve(status_router(StatusCode::BAD_GATEWAY)).await,
            StubSynth::new(true),
        );

        let outcome = client.speak("hi", Voice::Sargazy, Language::En).await;
        assert_eq!(outcome, SpeechOutcome::Notice(UNAVAILABLE_NOTICE.to_string()));
    }

    #[test]
    fn test_espeak_produces_ogg() {
        assert_eq!(Espeak::new().extension(), "ogg");
    }

    #[test]
    fn test_espeak_missing_program_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out.ogg");
        let synth = Espeak::with_programs("beknmd-no-such-espeak", "beknmd-no-such-ffmpeg");

        let err = synth.synthesize("hello", Language::En, &output).unwrap_err();
        assert!(matches!(err, SpeechError::Synth(ref msg) if msg.contains("beknmd-no-such-espeak")));
        assert!(!output.with_extension("wav").exists());
    }

    #[tokio::test]
    async fn test_missing_espeak_returns_notice() {
        let client = SpeechClient::with_endpoint(
            "k".into(),
            serve(status_router(StatusCode::SERVICE_UNAVAILABLE)).await,
            Arc::new(Espeak::with_programs("beknmd-no-such-espeak", "ffmpeg")),
        );

        let outcome = client.speak("hi", Voice::Sargazy, Language::En).await;
        assert_eq!(outcome, SpeechOutcome::Notice(UNAVAILABLE_NOTICE.to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_conversion_returns_notice() {
        // `true` exits cleanly without writing audio; the converter is missing.
        let client = SpeechClient::with_endpoint(
            "k".into(),
            serve(status_router(StatusCode::SERVICE_UNAVAILABLE)).await,
            Arc::new(Espeak::with_programs("true", "beknmd-no-such-ffmpeg")),
        );

        let outcome = client.speak("hi", Voice::Sargazy, Language::En).await;
        assert_eq!(outcome, SpeechOutcome::Notice(UNAVAILABLE_NOTICE.to_string()));
    }
}
