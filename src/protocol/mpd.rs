//! Music Player Daemon protocol codec.
//!
//! The protocol is plain text. A connection starts with a greeting:
//!
//! ```text
//! OK MPD 0.23.5
//! ```
//!
//! Each command is one line; its response is zero or more `key: value` lines
//! followed by `OK`, or a single error line:
//!
//! ```text
//! ACK [50@0] {play} song doesn't exist: "10240"
//! ```
//!
//! `idle player` is answered only once the player changes, with
//! `changed: player` and `OK`. Sending `noidle` while waiting ends the idle
//! request early.

use std::{fmt, str::FromStr};

use semver::Version;

use crate::{
    error::{Error, Result},
    player::Command,
    state::{PlayState, Status, Track},
};

/// Oldest server version the gateway talks to.
pub const MIN_VERSION: Version = Version::new(0, 14, 0);

/// Idle subsystem the gateway subscribes to.
pub const IDLE_SUBSYSTEM: &str = "player";

/// Greeting prefix sent by the server on connect.
const GREETING: &str = "OK MPD ";

/// A `key: value` pair of a response.
pub type Pair = (String, String);

/// One line of a server response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Line {
    /// End of a successful response.
    Ok,
    /// End of one command inside a `command_list_ok_begin` list.
    ListOk,
    /// The request failed.
    Ack(Ack),
    /// A response field.
    Pair(Pair),
}

impl FromStr for Line {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        match line {
            "OK" => Ok(Self::Ok),
            "list_OK" => Ok(Self::ListOk),
            _ if line.starts_with("ACK ") => line.parse().map(Self::Ack),
            _ => line
                .split_once(": ")
                .map(|(key, value)| Self::Pair((key.to_owned(), value.to_owned())))
                .ok_or_else(|| Error::invalid_data(format!("malformed response line: {line}"))),
        }
    }
}

/// An error reported by the server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ack {
    pub code: u32,
    /// Position of the failing command within a command list.
    pub index: u32,
    pub command: String,
    pub message: String,
}

impl FromStr for Ack {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let malformed = || Error::invalid_data(format!("malformed error line: {line}"));

        let rest = line.strip_prefix("ACK [").ok_or_else(malformed)?;
        let (position, rest) = rest.split_once("] {").ok_or_else(malformed)?;
        let (code, index) = position.split_once('@').ok_or_else(malformed)?;
        let (command, message) = rest.split_once('}').ok_or_else(malformed)?;

        Ok(Self {
            code: code.parse()?,
            index: index.parse()?,
            command: command.to_owned(),
            message: message.trim_start().to_owned(),
        })
    }
}

/// Shows the message only, as the server meant it for humans.
impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Ack {}

impl From<Ack> for Error {
    fn from(ack: Ack) -> Self {
        Self::server_side(ack)
    }
}

/// Parses the greeting line into the server's protocol version.
///
/// # Errors
///
/// Returns [`InvalidData`](crate::error::ErrorKind::InvalidData) if the line is
/// not a greeting.
pub fn parse_greeting(line: &str) -> Result<Version> {
    let version = line
        .strip_prefix(GREETING)
        .ok_or_else(|| Error::invalid_data(format!("not an MPD server: {line}")))?;

    Ok(Version::parse(version.trim())?)
}

/// Rejects servers older than [`MIN_VERSION`].
///
/// # Errors
///
/// Returns [`ProtocolVersionTooOld`](crate::error::ErrorKind::ProtocolVersionTooOld).
pub fn check_version(version: &Version) -> Result<()> {
    if *version < MIN_VERSION {
        return Err(Error::protocol_too_old(format!(
            "MPD {version} too old, please upgrade to {MIN_VERSION} or newer"
        )));
    }
    Ok(())
}

/// Quotes a command argument.
#[must_use]
pub fn quote(argument: &str) -> String {
    let mut quoted = String::with_capacity(argument.len() + 2);
    quoted.push('"');
    for chr in argument.chars() {
        if chr == '"' || chr == '\\' {
            quoted.push('\\');
        }
        quoted.push(chr);
    }
    quoted.push('"');
    quoted
}

/// Encodes a control command as a request line.
#[must_use]
pub fn encode(command: Command) -> String {
    let flag = |on: bool| if on { "1" } else { "0" };

    match command {
        Command::Next => "next".to_owned(),
        Command::Previous => "previous".to_owned(),
        Command::Play => "play".to_owned(),
        // Without an argument `pause` toggles.
        Command::TogglePause => "pause".to_owned(),
        Command::Stop => "stop".to_owned(),
        Command::SetRepeat(on) => format!("repeat {}", flag(on)),
        Command::SetRandom(on) => format!("random {}", flag(on)),
    }
}

/// Request line for authentication.
#[must_use]
pub fn password(password: &str) -> String {
    format!("password {}", quote(password))
}

/// Request line for the idle subscription.
#[must_use]
pub fn idle() -> String {
    format!("idle {IDLE_SUBSYSTEM}")
}

/// Whether the pairs of an idle response name the player subsystem.
#[must_use]
pub fn player_changed(pairs: &[Pair]) -> bool {
    pairs
        .iter()
        .any(|(key, value)| key == "changed" && value == IDLE_SUBSYSTEM)
}

fn value<'a>(pairs: &'a [Pair], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Whole seconds of a fractional `elapsed`/`duration` value.
fn seconds(value: &str) -> Result<u32> {
    let whole = value.split_once('.').map_or(value, |(whole, _)| whole);
    Ok(whole.parse()?)
}

/// Parses the response to `status`.
///
/// Fractional `elapsed` and `duration` are preferred over the older
/// `time: elapsed:total` field when present. Missing fields default to zero,
/// as they do while stopped.
///
/// # Errors
///
/// Returns [`InvalidData`](crate::error::ErrorKind::InvalidData) if a numeric
/// field does not parse.
pub fn parse_status(pairs: &[Pair]) -> Result<Status> {
    let state = match value(pairs, "state") {
        Some("play") => PlayState::Playing,
        Some("pause") => PlayState::Paused,
        Some("stop") => PlayState::Stopped,
        _ => PlayState::Unknown,
    };

    let (mut elapsed, mut total) = match value(pairs, "time") {
        Some(time) => {
            let (elapsed, total) = time
                .split_once(':')
                .ok_or_else(|| Error::invalid_data(format!("malformed time: {time}")))?;
            (elapsed.parse::<u32>()?, total.parse::<u32>()?)
        }
        None => (0, 0),
    };
    if let Some(value) = value(pairs, "elapsed") {
        elapsed = seconds(value)?;
    }
    if let Some(value) = value(pairs, "duration") {
        total = seconds(value)?;
    }

    Ok(Status {
        state,
        elapsed,
        total,
        repeat: value(pairs, "repeat") == Some("1"),
        random: value(pairs, "random") == Some("1"),
    })
}

/// Parses the response to `currentsong`.
///
/// Returns `None` when nothing is queued. Only the first value of each tag
/// counts.
#[must_use]
pub fn parse_song(pairs: &[Pair]) -> Option<Track> {
    if pairs.is_empty() {
        return None;
    }

    let tag = |name: &str| value(pairs, name).map(ToOwned::to_owned);
    Some(Track {
        artist: tag("Artist"),
        title: tag("Title"),
        album: tag("Album"),
    })
}
