//! Configuration constants for the trivia session
//!
//! This module contains the fixed limits and default values used across
//! the session. Values that an embedding server may want to tune live in
//! [`crate::config::Options`] and default to the ones defined here.

/// Session-wide limits
pub mod session {
    /// Maximum number of participants connected to the session at once
    pub const MAX_PARTICIPANT_COUNT: usize = 1000;
}

/// Round and countdown configuration constants
pub mod round {
    /// Default number of questions issued per round
    pub const QUESTIONS_PER_ROUND: usize = 6;
    /// Maximum number of questions a round can be configured with
    pub const MAX_QUESTIONS_PER_ROUND: usize = 50;
    /// Default countdown length of a question in seconds
    pub const QUESTION_DURATION: u64 = 10;
    /// Minimum countdown length of a question in seconds
    pub const MIN_QUESTION_DURATION: u64 = 1;
    /// Maximum countdown length of a question in seconds
    pub const MAX_QUESTION_DURATION: u64 = 240;
    /// Default delay in milliseconds between the end of a question and the next one
    pub const SETTLE_DELAY: u64 = 2000;
    /// Maximum delay in milliseconds between the end of a question and the next one
    pub const MAX_SETTLE_DELAY: u64 = 30_000;
    /// Granularity of the countdown in milliseconds
    pub const TICK_INTERVAL: u64 = 1000;
}

/// Scoring constants
pub mod scoring {
    /// Points for a correct answer submitted as soon as the question appears
    pub const MAX_POINTS: u64 = 100;
    /// Points lost for every second waited before answering
    pub const POINTS_LOST_PER_SECOND: u64 = 10;
}

/// Question bank limits
pub mod bank {
    /// Maximum length of a category name
    pub const MAX_CATEGORY_LENGTH: usize = 100;
    /// Maximum length of a question text
    pub const MAX_QUESTION_LENGTH: usize = 200;
    /// Maximum number of options of a question
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Maximum length of a single option
    pub const MAX_OPTION_LENGTH: usize = 200;
}
