//! OpenRouter chat completion client.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chatbot::context::{Role, Turn};
use crate::chatbot::prefs::{Language, Persona};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const MODEL: &str = "openchat/openchat-3.5-0106";

pub struct CompletionClient {
    api_key: String,
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'static str,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// System instruction for a persona replying in a language.
pub fn system_prompt(persona: Persona, language: Language) -> String {
    let flavor = match persona {
        Persona::Wise => "Answer calmly, like an old nomad sharing hard-won wisdom.",
        Persona::Meme => "Keep it short and funny, internet meme style.",
        Persona::Smart => "Be precise and well-reasoned, like a sharp expert.",
    };
    format!(
        "You are a {} character who replies in {}. {}",
        persona.as_str(),
        language.name(),
        flavor
    )
}

/// Assemble the request: system turn, prior turns, then the new prompt.
pub fn build_messages(persona: Persona, language: Language, history: &[Turn], prompt: &str) -> Vec<Turn> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Turn::system(system_prompt(persona, language)));
    messages.extend(history.iter().cloned());
    messages.push(Turn::user(prompt));
    messages
}

impl CompletionClient {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, OPENROUTER_URL.to_string())
    }

    pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
        Self {
            api_key,
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    pub async fn complete(&self, messages: &[Turn]) -> Result<String, Error> {
        let request = ApiRequest {
            model: MODEL,
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
        };

        debug!("Completion request with {} messages", messages.len());

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let reply = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(Error::Empty)?;

        info!("💬 Completion: {} chars", reply.chars().count());
        Ok(reply)
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}
