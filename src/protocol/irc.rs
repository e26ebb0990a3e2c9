//! IRC message codec (RFC 2812 subset).
//!
//! Inbound lines have the shape
//!
//! ```text
//! [@tags] [:prefix] COMMAND [param ...] [:trailing]
//! ```
//!
//! Outbound messages are built with the constructors on [`Message`] and
//! rendered through its `Display` implementation.

use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// Longest line a server accepts, `\r\n` included.
pub const MAX_MESSAGE_LENGTH: usize = 512;

/// Room left for the `:nick!user@host ` prefix servers add when relaying.
const RELAY_PREFIX_RESERVE: usize = 100;

/// Registration succeeded.
pub const RPL_WELCOME: &str = "001";
/// Requested nickname is taken.
pub const ERR_NICKNAMEINUSE: &str = "433";
/// Server password was wrong.
pub const ERR_PASSWDMISMATCH: &str = "464";

/// A single IRC message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    fn new<I>(command: &str, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            prefix: None,
            command: command.to_owned(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn pass(password: &str) -> Self {
        Self::new("PASS", [password])
    }

    #[must_use]
    pub fn nick(nick: &str) -> Self {
        Self::new("NICK", [nick])
    }

    #[must_use]
    pub fn user(user: &str, realname: &str) -> Self {
        Self::new("USER", [user, "0", "*", realname])
    }

    #[must_use]
    pub fn join(channel: &str) -> Self {
        Self::new("JOIN", [channel])
    }

    #[must_use]
    pub fn pong(token: &str) -> Self {
        Self::new("PONG", [token])
    }

    #[must_use]
    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", [target, text])
    }

    /// The nickname part of the prefix, if the message came from a user.
    #[must_use]
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split_once('!').map_or(prefix, |(nick, _)| nick);
        (!nick.is_empty()).then_some(nick)
    }

    #[must_use]
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl FromStr for Message {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        // IRCv3 message tags are not used.
        if rest.starts_with('@') {
            rest = rest.split_once(' ').map_or("", |(_, rest)| rest);
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (source, remainder) = stripped.split_once(' ').unwrap_or((stripped, ""));
            prefix = Some(source.to_owned());
            rest = remainder;
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => match rest.strip_prefix(':') {
                Some(trailing) => ("", Some(trailing)),
                None => (rest, None),
            },
        };

        let mut words = head.split(' ').filter(|word| !word.is_empty());
        let command = words
            .next()
            .ok_or_else(|| Error::invalid_data(format!("message without command: {line}")))?
            .to_ascii_uppercase();

        let mut params: Vec<String> = words.map(ToOwned::to_owned).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_owned());
        }

        Ok(Self {
            prefix,
            command,
            params,
        })
    }
}

/// Renders the message without line terminator.
///
/// The last parameter is sent as trailing parameter when it is empty, starts
/// with `:` or contains spaces.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                write!(f, " {param}")?;
            }
            if last.is_empty() || last.starts_with(':') || last.contains(' ') {
                write!(f, " :{last}")?;
            } else {
                write!(f, " {last}")?;
            }
        }

        Ok(())
    }
}

/// Splits `text` into `PRIVMSG` lines for `target` that fit the line limit.
///
/// Line breaks inside `text` become separate messages; other control
/// characters that would break framing are dropped. Blank pieces are skipped.
#[must_use]
pub fn privmsgs(target: &str, text: &str) -> Vec<Message> {
    // "PRIVMSG <target> :<text>\r\n"
    let overhead = "PRIVMSG ".len() + target.len() + " :".len() + "\r\n".len();
    let budget = MAX_MESSAGE_LENGTH
        .saturating_sub(overhead + RELAY_PREFIX_RESERVE)
        .max(1);

    text.lines()
        .map(|line| line.replace(['\r', '\0'], ""))
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| split_at_budget(&line, budget))
        .map(|chunk| Message::privmsg(target, &chunk))
        .collect()
}

/// Splits on character boundaries so that no chunk exceeds `budget` bytes.
fn split_at_budget(line: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for chr in line.chars() {
        if current.len() + chr.len_utf8() > budget {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(chr);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Whether `target` names a channel rather than a user.
#[must_use]
pub fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}

/// Case-insensitive comparison of nicknames and channel names.
///
/// Uses the `rfc1459` mapping, where `[]\~` are the lower case of `{}|^`.
#[must_use]
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    fn fold(chr: char) -> char {
        match chr {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            other => other.to_ascii_lowercase(),
        }
    }

    a.len() == b.len() && a.chars().map(fold).eq(b.chars().map(fold))
}
