//! Gateway between a Music Player Daemon and an IRC channel.
//!
//! The gateway keeps two connections alive, one to MPD and one to IRC, and
//! translates between them:
//!
//! * track starts on the player are announced in the channel,
//! * commands in the channel (`!next`, `!status`, ...) control the player.
//!
//! Either side may go away at any time; each is reconnected on its own at a
//! fixed interval while the other keeps working.
//!
//! # Layout
//!
//! * [`gateway`] - the single-task event loop tying everything together
//! * [`player`] and [`chat`] - the two links, behind traits
//! * [`supervisor`] - the per-link reconnection state machine
//! * [`protocol`] - MPD and IRC wire codecs
//! * [`command`], [`state`] and [`events`] - the vocabulary in between
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod chat;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod player;
pub mod protocol;
pub mod signal;
pub mod state;
pub mod supervisor;
