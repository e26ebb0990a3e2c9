//! Chat commands and how to recognize them in chat text.
//!
//! A channel message only counts as a command when it is addressed to the
//! gateway: prefixed with the command prefix (`!next`), or, when enabled,
//! led by the gateway's nickname (`mpdirc: next`, `mpdirc, next`). Private
//! messages are always addressed.

use std::{fmt, str::FromStr};

use crate::{
    config::Config,
    error::{Error, Result},
    events::ChatMessage,
    protocol::irc,
};

/// Commands understood on the chat side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatCommand {
    Status,
    Next,
    Previous,
    Play,
    TogglePause,
    Stop,
    Repeat,
    Random,
    Announce,
    Help,
}

impl ChatCommand {
    /// Canonical names, in the order `help` lists them.
    pub const NAMES: [&'static str; 10] = [
        "status", "next", "prev", "play", "pause", "stop", "repeat", "random", "announce",
        "help",
    ];
}

impl FromStr for ChatCommand {
    type Err = Error;

    fn from_str(word: &str) -> Result<Self> {
        let command = match word.to_ascii_lowercase().as_str() {
            "status" | "np" => Self::Status,
            "next" => Self::Next,
            "prev" | "previous" => Self::Previous,
            "play" => Self::Play,
            "pause" | "toggle" => Self::TogglePause,
            "stop" => Self::Stop,
            "repeat" => Self::Repeat,
            "random" => Self::Random,
            "announce" => Self::Announce,
            "help" => Self::Help,
            _ => return Err(Error::invalid_argument(format!("Unknown command: {word}"))),
        };
        Ok(command)
    }
}

impl fmt::Display for ChatCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Status => "status",
            Self::Next => "next",
            Self::Previous => "prev",
            Self::Play => "play",
            Self::TogglePause => "pause",
            Self::Stop => "stop",
            Self::Repeat => "repeat",
            Self::Random => "random",
            Self::Announce => "announce",
            Self::Help => "help",
        };
        write!(f, "{name}")
    }
}

/// Recognizes commands addressed to the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Addressing {
    prefix: String,
    by_nick: bool,
}

impl Addressing {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            prefix: config.command_prefix.clone(),
            by_nick: config.address_by_nick,
        }
    }

    /// Extracts the command from `message`, when it is addressed to `nick`.
    ///
    /// Returns `None` for chatter, and an error carrying the reply for an
    /// addressed but unknown command.
    pub fn parse(&self, message: &ChatMessage, nick: &str) -> Option<Result<ChatCommand>> {
        let rest = self.addressed(&message.text, nick, message.direct)?;
        let word = rest.split_whitespace().next()?;
        Some(word.parse())
    }

    /// The text after the addressing, if any.
    fn addressed<'t>(&self, text: &'t str, nick: &str, direct: bool) -> Option<&'t str> {
        let text = text.trim();

        if !self.prefix.is_empty() {
            if let Some(rest) = text.strip_prefix(self.prefix.as_str()) {
                // "! foo" is not a command
                return (!rest.starts_with(char::is_whitespace)).then_some(rest);
            }
        }

        if self.by_nick || direct {
            if let Some(rest) = strip_nick(text, nick) {
                return Some(rest.trim_start());
            }
        }

        direct.then_some(text)
    }

    /// One line listing the commands.
    #[must_use]
    pub fn help(&self) -> String {
        let commands: Vec<String> = ChatCommand::NAMES
            .iter()
            .map(|name| format!("{}{name}", self.prefix))
            .collect();
        format!("Commands: {}", commands.join(", "))
    }
}

/// Strips a leading `nick:` or `nick,`.
fn strip_nick<'t>(text: &'t str, nick: &str) -> Option<&'t str> {
    let (head, rest) = text.split_at_checked(nick.len())?;
    if !irc::eq_ignore_case(head, nick) {
        return None;
    }
    rest.strip_prefix([':', ','])
}
