//! The chat side of the gateway.
//!
//! [`ChatLink`] is the contract the gateway drives; [`Irc`] implements it
//! over a plain IRC connection to a single channel.

mod irc;

pub use irc::Irc;

use crate::{error::Result, events::ChatEvent};

/// The gateway's view of a chat connection.
///
/// All methods are driven from the single gateway task.
#[allow(async_fn_in_trait)]
pub trait ChatLink {
    /// Opens a session, registers and joins the configured channel.
    ///
    /// # Errors
    ///
    /// * `ConnectionRefused` if the server cannot be reached or rejects the
    ///   password
    /// * `DeadlineExceeded` if registration does not complete in time
    /// * anything else that goes wrong during registration
    async fn connect(&mut self) -> Result<()>;

    /// Whether a session exists.
    fn is_connected(&self) -> bool;

    /// The nickname currently in use, which can differ from the configured
    /// one after a collision.
    fn nick(&self) -> &str;

    /// Says `text` in the channel.
    ///
    /// Fire and forget: write failures surface through
    /// [`next_event`](Self::next_event). Without a session the text is
    /// dropped.
    fn send(&mut self, text: &str);

    /// Waits for the next message or failure.
    ///
    /// Never completes without a session. Must be cancel-safe.
    async fn next_event(&mut self) -> ChatEvent;

    /// Closes the session, if any.
    fn disconnect(&mut self);
}
