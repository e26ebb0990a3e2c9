//! Events the links hand to the gateway.
//!
//! Links never touch the cached player state. They only report what happened
//! on their connection, and the gateway folds that into its state and decides
//! what to say on the other side.
//!
//! # Example
//!
//! ```rust
//! use mpdirc::events::{ChatEvent, PlayerEvent};
//!
//! fn describe(event: &PlayerEvent) -> &'static str {
//!     match event {
//!         PlayerEvent::Changed => "player state changed",
//!         PlayerEvent::Failed(_) => "player link failed",
//!     }
//! }
//! ```

use crate::error::Error;

/// Events of the player link.
#[derive(Debug)]
pub enum PlayerEvent {
    /// The idle subscription fired for the player subsystem.
    ///
    /// Emitted on play, pause, stop, seek and track changes. The status itself
    /// is not part of the event; the gateway fetches it.
    Changed,

    /// The session reported an error while idle.
    ///
    /// Fatal errors mean the session is gone and must be reconnected.
    Failed(Error),
}

/// Events of the chat link.
#[derive(Debug)]
pub enum ChatEvent {
    /// Someone said something in the channel or to the gateway directly.
    Message(ChatMessage),

    /// The chat session broke down.
    Failed(Error),
}

/// A line of text received on the chat link.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChatMessage {
    /// Nickname of the sender.
    pub sender: String,

    /// The text as sent.
    pub text: String,

    /// Whether the message was sent to the gateway privately rather than to
    /// the channel.
    pub direct: bool,
}
