//! Per-user conversation history.
//!
//! Only the most recent [`CONTEXT_WINDOW`] turns are ever sent to the model.
//! Older turns are kept up to [`MAX_STORED_TURNS`] and then dropped. History
//! lives in memory only and is lost on restart.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Number of prior turns included in a completion request.
pub const CONTEXT_WINDOW: usize = 5;

/// Turns retained per user.
pub const MAX_STORED_TURNS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Conversation history for every user.
#[derive(Default)]
pub struct ConversationContext {
    turns: HashMap<u64, VecDeque<Turn>>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed exchange.
    pub fn record_exchange(&mut self, user_id: u64, prompt: &str, reply: &str) {
        let history = self.turns.entry(user_id).or_default();
        history.push_back(Turn::user(prompt));
        history.push_back(Turn::assistant(reply));

        while history.len() > MAX_STORED_TURNS {
            history.pop_front();
        }
    }

    /// The turns to send with the next request, oldest first.
    pub fn window(&self, user_id: u64) -> Vec<Turn> {
        match self.turns.get(&user_id) {
            Some(history) => {
                let skip = history.len().saturating_sub(CONTEXT_WINDOW);
                history.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Most recent assistant reply, if any.
    pub fn last_reply(&self, user_id: u64) -> Option<&str> {
        self.turns
            .get(&user_id)?
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.content.as_str())
    }

    /// Total turns stored for a user (including ones outside the window).
    pub fn len(&self, user_id: u64) -> usize {
        self.turns.get(&user_id).map_or(0, |h| h.len())
    }
}
