//! Error handling for mpdirc.
//!
//! Every link catches its own failures and hands them to the gateway as an
//! [`struct@Error`] with an [`ErrorKind`]. The kind decides what happens next:
//!
//! * Recoverable kinds ([`ServerSide`](ErrorKind::ServerSide),
//!   [`CommandFailed`](ErrorKind::CommandFailed),
//!   [`NotConnected`](ErrorKind::NotConnected)) are reported to the channel and
//!   the session carries on.
//! * Fatal kinds ([`Disconnected`](ErrorKind::Disconnected),
//!   [`DeadlineExceeded`](ErrorKind::DeadlineExceeded), ...) tear the session
//!   down and hand the link to its reconnect supervisor.
//! * [`ProtocolVersionTooOld`](ErrorKind::ProtocolVersionTooOld) is terminal: it
//!   is never retried and ends the process.
//!
//! # Example
//!
//! ```rust
//! use mpdirc::error::{Error, ErrorKind, Result};
//!
//! fn check(version: &semver::Version) -> Result<()> {
//!     if version.minor < 14 {
//!         return Err(Error::protocol_too_old(format!("MPD {version} is too old")));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Standard result type for mpdirc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories of the gateway.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// The remote end could not be reached or refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// The server speaks a protocol version older than supported. Terminal.
    #[error("protocol version too old")]
    ProtocolVersionTooOld,

    /// The server rejected a request; the session stays usable.
    #[error("server error")]
    ServerSide,

    /// A control command was rejected; the session stays usable.
    #[error("command failed")]
    CommandFailed,

    /// No session exists to run the request on.
    #[error("not connected")]
    NotConnected,

    /// The session was closed or broke down mid-stream.
    #[error("disconnected")]
    Disconnected,

    /// The remote end did not answer in time.
    #[error("operation timed out")]
    DeadlineExceeded,

    /// The remote end sent something that could not be understood.
    #[error("invalid data")]
    InvalidData,

    /// A caller supplied an unusable value, typically configuration.
    #[error("invalid argument specified")]
    InvalidArgument,
}

impl ErrorKind {
    /// Whether a session that produced this kind must be torn down.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            Self::ServerSide | Self::CommandFailed | Self::NotConnected | Self::InvalidArgument
        )
    }

    /// Whether this kind must never be retried.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::ProtocolVersionTooOld
    }
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for a refused or unreachable endpoint.
    pub fn connection_refused<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ConnectionRefused, error)
    }

    /// Creates an error for a server that predates the minimum version.
    pub fn protocol_too_old<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ProtocolVersionTooOld, error)
    }

    /// Creates an error for a request the server rejected.
    pub fn server_side<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ServerSide, error)
    }

    /// Creates an error for a control command the server rejected.
    pub fn command_failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::CommandFailed, error)
    }

    /// Creates an error for a request made without a session.
    pub fn not_connected<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotConnected, error)
    }

    /// Creates an error for a session that went away.
    pub fn disconnected<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Disconnected, error)
    }

    /// Creates an error for a request that was not answered in time.
    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    /// Creates an error for unparseable protocol data.
    pub fn invalid_data<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidData, error)
    }

    /// Creates an error for invalid arguments.
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// Whether the session that produced this error must be torn down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Whether this error must end the process instead of being retried.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// The human-readable message of the underlying error, without the kind.
    ///
    /// This is what gets relayed to the channel.
    #[must_use]
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// * `ConnectionRefused`, `AddrNotAvailable`, `NotFound` -> `ConnectionRefused`
/// * `BrokenPipe`, `ConnectionReset`, `UnexpectedEof`, ... -> `Disconnected`
/// * `TimedOut` -> `DeadlineExceeded`
/// * `InvalidData` -> `InvalidData`
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            ConnectionRefused | AddrNotAvailable | NotFound | PermissionDenied => {
                Self::connection_refused(err)
            }
            BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected | UnexpectedEof
            | WriteZero => Self::disconnected(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidData => Self::invalid_data(err),
            InvalidInput => Self::invalid_argument(err),
            _ => Self::disconnected(err),
        }
    }
}

/// Converts version parsing errors to `InvalidData`.
///
/// Versions only ever come from a server greeting.
impl From<semver::Error> for Error {
    fn from(err: semver::Error) -> Self {
        Self::invalid_data(err)
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

/// Converts configuration file errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts integer parsing errors to `InvalidData`.
impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::invalid_data(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recoverable_and_fatal_kinds() {
        assert!(!Error::server_side("no such song").is_fatal());
        assert!(!Error::command_failed("not playing").is_fatal());
        assert!(!Error::not_connected("no session").is_fatal());

        assert!(Error::disconnected("eof").is_fatal());
        assert!(Error::deadline_exceeded("slow").is_fatal());
        assert!(Error::connection_refused("nope").is_fatal());
    }

    #[test]
    fn only_old_protocol_is_terminal() {
        assert!(Error::protocol_too_old("0.13.0").is_terminal());
        assert!(!Error::connection_refused("nope").is_terminal());
        assert!(!Error::disconnected("eof").is_terminal());
    }

    #[test]
    fn message_omits_kind() {
        let err = Error::server_side("No such song");
        assert_eq!(err.message(), "No such song");
        assert_eq!(err.to_string(), "server error: No such song");
    }

    #[test]
    fn io_errors_map_to_link_kinds() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(Error::from(refused).kind, ErrorKind::ConnectionRefused);

        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert_eq!(Error::from(eof).kind, ErrorKind::Disconnected);
    }
}
