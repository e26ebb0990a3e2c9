//! Gateway configuration.
//!
//! A [`Config`] is assembled once at startup, from defaults, an optional TOML
//! file and command line overrides, and is read-only afterwards.
//!
//! ```toml
//! announce = true
//! reconnect_interval = 30
//!
//! [player]
//! host = "localhost"
//! port = 6600
//!
//! [chat]
//! host = "irc.libera.chat"
//! nick = "mpdirc"
//! channel = "#music"
//! ```

use std::{fs, time::Duration};

use serde::{Deserialize, Deserializer};
use veil::Redact;

use crate::{
    error::{Error, Result},
    protocol::irc,
};

/// Configuration files are small; anything larger is a mistake.
const MAX_FILE_SIZE: u64 = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub player: PlayerConfig,
    pub chat: ChatConfig,

    /// Announce track starts in the channel.
    pub announce: bool,

    /// Stay attached to the terminal instead of detaching.
    pub foreground: bool,

    /// Delay between reconnection attempts, in seconds in the file.
    #[serde(deserialize_with = "seconds")]
    pub reconnect_interval: Duration,

    /// Limit for connecting and for each request/response exchange, in
    /// seconds in the file.
    #[serde(deserialize_with = "seconds")]
    pub timeout: Duration,

    /// Prefix that marks a channel message as a command, like `!next`.
    pub command_prefix: String,

    /// Also accept commands addressed by nickname, like `mpdirc: next`.
    pub address_by_nick: bool,
}

/// Where and how to reach the Music Player Daemon.
#[derive(Clone, Redact, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlayerConfig {
    pub host: String,
    pub port: u16,
    #[redact]
    pub password: Option<String>,
}

/// Where and how to reach the IRC network.
#[derive(Clone, Redact, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChatConfig {
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub realname: String,
    pub channel: String,
    #[redact]
    pub password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            player: PlayerConfig::default(),
            chat: ChatConfig::default(),
            announce: true,
            foreground: false,
            reconnect_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            command_prefix: String::from("!"),
            address_by_nick: true,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 6600,
            password: None,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        let name = env!("CARGO_PKG_NAME");
        Self {
            host: String::from("localhost"),
            port: 6667,
            nick: name.to_owned(),
            realname: format!("{name} {}", env!("CARGO_PKG_VERSION")),
            channel: String::new(),
            password: None,
        }
    }
}

fn seconds<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl Config {
    /// Loads a configuration file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument`](crate::error::ErrorKind::InvalidArgument) if
    /// the file cannot be read, is too large or is not valid TOML for this
    /// structure.
    pub fn from_file(path: &str) -> Result<Self> {
        let invalid = |e: &dyn std::fmt::Display| Error::invalid_argument(format!("{path}: {e}"));

        let size = fs::metadata(path).map_err(|e| invalid(&e))?.len();
        if size > MAX_FILE_SIZE {
            return Err(invalid(&format!("larger than {MAX_FILE_SIZE} bytes")));
        }

        let contents = fs::read_to_string(path).map_err(|e| invalid(&e))?;
        Self::from_toml(&contents).map_err(|e| invalid(&e))
    }

    /// Parses a configuration from TOML text on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument`](crate::error::ErrorKind::InvalidArgument) if
    /// the text is not valid TOML for this structure.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Checks and normalizes the configuration.
    ///
    /// A channel without channel prefix gets `#` prepended.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument`](crate::error::ErrorKind::InvalidArgument) if a
    /// required value is missing or unusable.
    pub fn validate(mut self) -> Result<Self> {
        let required = |value: &str, name: &str| {
            if value.trim().is_empty() {
                Err(Error::invalid_argument(format!("{name} must be set")))
            } else {
                Ok(())
            }
        };

        required(&self.player.host, "player host")?;
        required(&self.chat.host, "chat host")?;
        required(&self.chat.nick, "chat nick")?;
        required(&self.chat.channel, "chat channel")?;

        if self.chat.nick.contains(char::is_whitespace) {
            return Err(Error::invalid_argument(format!(
                "chat nick \"{}\" contains whitespace",
                self.chat.nick
            )));
        }

        self.chat.channel = self.chat.channel.trim().to_owned();
        if !irc::is_channel(&self.chat.channel) {
            self.chat.channel.insert(0, '#');
        }

        if self.reconnect_interval.is_zero() {
            return Err(Error::invalid_argument("reconnect interval must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(Error::invalid_argument("timeout must be positive"));
        }

        Ok(self)
    }
}
