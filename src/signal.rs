//! System signal handling for orderly shutdown.
//!
//! * Unix: SIGINT, SIGTERM and SIGQUIT
//! * Windows: Ctrl-C only
//!
//! # Example
//!
//! ```no_run
//! use mpdirc::signal::Handler;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example(shutdown: CancellationToken) {
//!     let mut signals = Handler::new().unwrap();
//!     let signal = signals.recv().await;
//!     println!("received {signal}, shutting down");
//!     shutdown.cancel();
//! }
//! ```

use std::fmt;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Signal that triggered a shutdown.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[expect(clippy::module_name_repetitions)]
pub enum ShutdownSignal {
    /// Interrupt signal (Ctrl-C/SIGINT)
    Interrupt,
    /// Termination signal (SIGTERM)
    Terminate,
    /// Quit signal (SIGQUIT)
    Quit,
}

/// Waits for shutdown signals.
///
/// Handlers are registered on construction, so signals that arrive before
/// the first [`recv`](Self::recv) are not lost.
pub struct Handler {
    #[cfg(unix)]
    sigterm: Signal,
    #[cfg(unix)]
    sigquit: Signal,
}

impl Handler {
    /// Creates a new signal handler.
    ///
    /// # Errors
    ///
    /// Returns error if signal handlers cannot be registered.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self {
                sigterm: signal(SignalKind::terminate())?,
                sigquit: signal(SignalKind::quit())?,
            })
        }

        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Waits for the next signal.
    ///
    /// On Windows, this only waits for Ctrl-C and always returns
    /// `ShutdownSignal::Interrupt`.
    pub async fn recv(&mut self) -> ShutdownSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
                _ = self.sigterm.recv() => ShutdownSignal::Terminate,
                _ = self.sigquit.recv() => ShutdownSignal::Quit,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            ShutdownSignal::Interrupt
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "Ctrl+C"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Quit => write!(f, "SIGQUIT"),
        }
    }
}
