//! Command registration table and parsing.

use regex::Regex;
use std::sync::LazyLock;

/// A parsed bot command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Ask(String),
    Speak(String),
    VoiceOn,
    VoiceOff,
    Language(String),
    Mode(String),
    Voice(String),
    Meme,
    Wisdom,
    Time,
    Talk(String),
}

/// One entry of the registration table.
pub struct CommandSpec {
    pub name: &'static str,
    pub args: &'static str,
    pub description: &'static str,
    build: fn(String) -> Command,
}

/// Every command the bot answers to, in `/help` order.
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "start", args: "", description: "Wake the bot up", build: |_| Command::Start },
    CommandSpec { name: "help", args: "", description: "Show this list", build: |_| Command::Help },
    CommandSpec { name: "ask", args: "<question>", description: "Ask the AI anything", build: Command::Ask },
    CommandSpec { name: "talk", args: "<text>", description: "Ask and get a voice reply", build: Command::Talk },
    CommandSpec { name: "speak", args: "[text]", description: "Read text (or the last reply) aloud", build: Command::Speak },
    CommandSpec { name: "voice_on", args: "", description: "Voice every reply", build: |_| Command::VoiceOn },
    CommandSpec { name: "voice_off", args: "", description: "Text replies only", build: |_| Command::VoiceOff },
    CommandSpec { name: "language", args: "[en|ru|es]", description: "Reply language", build: Command::Language },
    CommandSpec { name: "mode", args: "[wise|meme|smart]", description: "Pick the bot's vibe", build: Command::Mode },
    CommandSpec { name: "voice", args: "[Sargazy|Kanykey|Almambet]", description: "Pick a voice", build: Command::Voice },
    CommandSpec { name: "meme", args: "", description: "Get a meme-style joke", build: |_| Command::Meme },
    CommandSpec { name: "wisdom", args: "", description: "Get a piece of wisdom", build: |_| Command::Wisdom },
    CommandSpec { name: "time", args: "", description: "Current time", build: |_| Command::Time },
];

// `\w` is Unicode-aware, so `/погода` is a command name too.
static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(\w+)(?:@(\w+))?(?:\s+([\s\S]*))?$").unwrap());

/// What an incoming message turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    /// A `/command` we don't register.
    UnknownCommand(String),
    /// A `/command@name` addressed to some other bot in the chat.
    OtherBot(String),
    /// Anything that isn't a command.
    Text(String),
}

/// Parse a message. `bot_username` is our own username (without `@`); when
/// known, commands suffixed with a different name are not ours.
pub fn parse(text: &str, bot_username: Option<&str>) -> Input {
    let text = text.trim();
    let Some(caps) = COMMAND_RE.captures(text) else {
        return Input::Text(text.to_string());
    };

    let name = caps[1].to_lowercase();
    if let (Some(target), Some(own)) = (caps.get(2), bot_username) {
        if !target.as_str().eq_ignore_ascii_case(own.trim_start_matches('@')) {
            return Input::OtherBot(target.as_str().to_string());
        }
    }
    let args = caps.get(3).map(|m| m.as_str().trim().to_string()).unwrap_or_default();

    match COMMANDS.iter().find(|c| c.name == name) {
        Some(spec) => Input::Command((spec.build)(args)),
        None => Input::UnknownCommand(name),
    }
}

/// `/help` text built from the registration table.
pub fn help_text() -> String {
    let mut out = String::from("🧭 Commands:\n");
    for cmd in COMMANDS {
        if cmd.args.is_empty() {
            out.push_str(&format!("/{} - {}\n", cmd.name, cmd.description));
        } else {
            out.push_str(&format!("/{} {} - {}\n", cmd.name, cmd.args, cmd.description));
        }
    }
    out
}
