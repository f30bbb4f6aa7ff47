//! # Trivia Session Library
//!
//! This library provides the core logic of a live trivia session: a host
//! starts a round of timed multiple choice questions, every connected
//! participant answers against the clock, and each one privately receives
//! its final score when the round is over.
//!
//! The state machine in [`game`] is transport agnostic: it talks to
//! participants through [`session::Tunnel`]s and asks its caller to
//! schedule [`AlarmMessage`]s. [`coordinator`] wraps it for use from many
//! concurrent connections on a tokio runtime.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
use serde::{Deserialize, Serialize};

pub mod bank;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod game;
pub mod leaderboard;
pub mod round;
pub mod session;
pub mod watcher;

/// Messages sent to participants
///
/// Some are sent to a single participant, others are broadcast to all of
/// them; see the variants of [`game::UpdateMessage`] and
/// [`round::UpdateMessage`].
#[derive(Debug, Serialize, Clone, derive_more::From)]
pub enum UpdateMessage {
    /// Session and round level messages
    Game(game::UpdateMessage),
    /// Messages about the question being asked
    Round(round::UpdateMessage),
}

impl UpdateMessage {
    /// Converts the update message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Deferred events the session asks its caller to deliver later
///
/// Every alarm carries the epoch it was scheduled in. The session bumps its
/// epoch whenever pending alarms must be cancelled, and ignores any alarm
/// whose epoch is not current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// One second of the countdown has elapsed
    Tick {
        /// Epoch the countdown belongs to
        epoch: u64,
    },
    /// The pause after a question is over; the next question can be issued
    Advance {
        /// Epoch the pause belongs to
        epoch: u64,
    },
}

impl AlarmMessage {
    /// The epoch the alarm was scheduled in
    pub fn epoch(&self) -> u64 {
        match self {
            Self::Tick { epoch } | Self::Advance { epoch } => *epoch,
        }
    }
}
