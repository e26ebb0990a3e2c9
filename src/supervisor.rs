//! Per-link reconnection state machine.
//!
//! ```text
//! Idle ──begin──▶ Connecting ──connected──▶ Connected
//!                   │    ▲                      │
//!             failed│    │begin           failed│
//!                   ▼    │                      │
//!               AwaitingRetry ◀─────────────────┘
//! ```
//!
//! Retries run at a fixed interval, forever. The only way out is a terminal
//! failure, which escalates to the process instead of scheduling a retry.
//!
//! The supervisor owns the retry deadline itself, so there is never more than
//! one pending per link: failing again while a retry is pending keeps the
//! existing deadline.

use std::{fmt, time::Duration};

use tokio::time::Instant;

use crate::error::Error;

/// Where a link is in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    AwaitingRetry { deadline: Instant },
}

/// Classification of the last failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Failure {
    Retryable,
    Terminal,
}

/// What the caller must do after a failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Retry {
    /// A retry is due at this instant.
    Scheduled(Instant),
    /// Give up on the link and end the process.
    Escalate,
}

#[derive(Clone, Debug)]
pub struct Supervisor {
    link: &'static str,
    interval: Duration,
    phase: Phase,
    attempts: u64,
    last_failure: Option<Failure>,
}

impl Supervisor {
    #[must_use]
    pub fn new(link: &'static str, interval: Duration) -> Self {
        Self {
            link,
            interval,
            phase: Phase::Idle,
            attempts: 0,
            last_failure: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// Connection attempts since the last success.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<Failure> {
        self.last_failure
    }

    /// The pending retry deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::AwaitingRetry { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Whether a pending retry is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Marks the start of a connection attempt.
    ///
    /// Returns `false`, and changes nothing, when the link is already
    /// connecting or connected.
    pub fn begin(&mut self) -> bool {
        match self.phase {
            Phase::Connecting | Phase::Connected => false,
            Phase::Idle | Phase::AwaitingRetry { .. } => {
                self.attempts = self.attempts.saturating_add(1);
                self.phase = Phase::Connecting;
                debug!("{} connection attempt {}", self.link, self.attempts);
                true
            }
        }
    }

    /// Marks the link as connected.
    pub fn connected(&mut self) {
        if self.attempts > 1 {
            info!(
                "{} connected after {} attempts",
                self.link, self.attempts
            );
        }
        self.phase = Phase::Connected;
        self.attempts = 0;
        self.last_failure = None;
    }

    /// Records a failure at `now` and decides what happens next.
    pub fn failed(&mut self, now: Instant, error: &Error) -> Retry {
        if error.is_terminal() {
            error!("{} failed permanently: {error}", self.link);
            self.phase = Phase::Idle;
            self.last_failure = Some(Failure::Terminal);
            return Retry::Escalate;
        }

        self.last_failure = Some(Failure::Retryable);

        let deadline = match self.phase {
            Phase::AwaitingRetry { deadline } => deadline,
            Phase::Idle | Phase::Connecting | Phase::Connected => {
                let deadline = now + self.interval;
                self.phase = Phase::AwaitingRetry { deadline };
                deadline
            }
        };

        warn!(
            "{} failed: {error}; retrying in {}s",
            self.link,
            deadline.saturating_duration_since(now).as_secs()
        );
        Retry::Scheduled(deadline)
    }

    /// Drops any pending retry.
    pub fn cancel(&mut self) {
        if self.deadline().is_some() {
            debug!("cancelled {} reconnection", self.link);
        }
        self.phase = Phase::Idle;
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::AwaitingRetry { .. } => write!(f, "awaiting retry"),
        }
    }
}
