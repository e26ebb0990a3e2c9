//! The player side of the gateway.
//!
//! [`PlayerLink`] is the contract the gateway drives; [`Mpd`] implements it
//! over a Music Player Daemon connection.
//!
//! # Idle bracketing
//!
//! While connected, the link keeps an idle subscription open so that the
//! server tells it about player changes. The server does not accept other
//! commands during an idle request, so every operation must:
//!
//! 1. interrupt the idle request,
//! 2. run its command(s),
//! 3. subscribe again, also when the command failed.
//!
//! Skipping step 3 on any path silently stops all change notifications.

mod mpd;

pub use mpd::Mpd;

use std::fmt;

use crate::{
    error::Result,
    events::PlayerEvent,
    state::{PlayState, PlayerState},
};

/// Control commands the player link can run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Next,
    Previous,
    Play,
    TogglePause,
    Stop,
    SetRepeat(bool),
    SetRandom(bool),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next => write!(f, "next"),
            Self::Previous => write!(f, "previous"),
            Self::Play => write!(f, "play"),
            Self::TogglePause => write!(f, "toggle pause"),
            Self::Stop => write!(f, "stop"),
            Self::SetRepeat(on) => write!(f, "set repeat {on}"),
            Self::SetRandom(on) => write!(f, "set random {on}"),
        }
    }
}

/// Whether a status fetch also fetches the current song.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SongPolicy {
    /// Always fetch the song.
    Fetch,
    /// Fetch the song only when the new state starts a track; see
    /// [`PlayState::starts_track`].
    OnTrackStart,
    /// Keep the previously known song.
    Keep,
}

impl SongPolicy {
    /// Whether a transition from `previous` to `next` needs the song.
    #[must_use]
    pub fn wants_song(self, previous: PlayState, next: PlayState) -> bool {
        match self {
            Self::Fetch => true,
            Self::OnTrackStart => next.starts_track(previous),
            Self::Keep => false,
        }
    }
}

/// The gateway's view of a player connection.
///
/// All methods are driven from the single gateway task. Errors are returned,
/// never raised: the gateway decides from [`Error::is_fatal`] whether the
/// session has to go.
///
/// [`Error::is_fatal`]: crate::error::Error::is_fatal
#[allow(async_fn_in_trait)]
pub trait PlayerLink {
    /// Opens a session, authenticates, fetches the initial status and song and
    /// subscribes to player changes.
    ///
    /// # Errors
    ///
    /// * `ConnectionRefused` if the server cannot be reached
    /// * `ProtocolVersionTooOld` if the server is too old; never retry
    /// * anything else that goes wrong during the handshake
    async fn connect(&mut self) -> Result<PlayerState>;

    /// Whether a session exists.
    fn is_connected(&self) -> bool;

    /// Waits for the idle subscription to fire.
    ///
    /// Never completes without a session. Must be cancel-safe: the gateway
    /// waits on it inside `tokio::select!`.
    async fn next_event(&mut self) -> PlayerEvent;

    /// Re-subscribes to player changes if no subscription is pending.
    ///
    /// # Errors
    ///
    /// Returns the session error if the subscription could not be sent.
    async fn rearm(&mut self) -> Result<()>;

    /// Runs a control command, bracketed by idle interruption and
    /// re-subscription.
    ///
    /// # Errors
    ///
    /// * `NotConnected` without a session
    /// * `CommandFailed` if the server rejected the command
    /// * a fatal kind if the session broke down
    async fn call(&mut self, command: Command) -> Result<()>;

    /// Fetches a fresh status, and the song if `policy` asks for it.
    ///
    /// The result replaces `previous` wholesale; when the song is not fetched,
    /// the previous song is carried over.
    ///
    /// # Errors
    ///
    /// As for [`call`](Self::call).
    async fn fetch_status(
        &mut self,
        previous: &PlayerState,
        policy: SongPolicy,
    ) -> Result<PlayerState>;

    /// Returns and clears whether a player change was swallowed while
    /// interrupting the idle subscription.
    fn take_missed_change(&mut self) -> bool;

    /// Closes the session, if any.
    fn disconnect(&mut self);
}
