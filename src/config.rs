//! Session options
//!
//! Tunable parameters of the round engine. Every field has a default
//! matching the classic game: six questions of ten seconds each, with a two
//! second pause between questions.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::constants::round;

type ValidationResult = garde::Result;

/// Validates that a duration falls within specified bounds
///
/// # Arguments
///
/// * `field` - Name of the field being validated (for error messages)
/// * `val` - The duration value to validate
fn validate_duration<const MIN_MILLIS: u64, const MAX_MILLIS: u64>(
    field: &'static str,
    val: &Duration,
) -> ValidationResult {
    if (u128::from(MIN_MILLIS)..=u128::from(MAX_MILLIS)).contains(&val.as_millis()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "{field} is outside of the bounds [{MIN_MILLIS}ms,{MAX_MILLIS}ms]",
        )))
    }
}

/// Validates the countdown length of a question
fn validate_question_duration(val: &Duration) -> ValidationResult {
    if val.subsec_nanos() != 0 {
        return Err(garde::Error::new(
            "question_duration must be a whole number of seconds",
        ));
    }
    validate_duration::<
        { round::MIN_QUESTION_DURATION * 1000 },
        { round::MAX_QUESTION_DURATION * 1000 },
    >("question_duration", val)
}

/// Validates the pause between questions
fn validate_settle_delay(val: &Duration) -> ValidationResult {
    validate_duration::<0, { round::MAX_SETTLE_DELAY }>("settle_delay", val)
}

/// Options controlling the pace of a round
#[serde_with::serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Options {
    /// Number of questions issued before the round ends
    #[garde(range(min = 1, max = round::MAX_QUESTIONS_PER_ROUND))]
    pub questions_per_round: usize,
    /// Countdown length of every question
    #[garde(custom(|v, _| validate_question_duration(v)))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub question_duration: Duration,
    /// Pause after a question ends during which the correct answer is shown
    #[garde(custom(|v, _| validate_settle_delay(v)))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub settle_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            questions_per_round: round::QUESTIONS_PER_ROUND,
            question_duration: Duration::from_secs(round::QUESTION_DURATION),
            settle_delay: Duration::from_millis(round::SETTLE_DELAY),
        }
    }
}

impl Options {
    /// Countdown length in whole seconds
    pub fn question_seconds(&self) -> u64 {
        self.question_duration.as_secs()
    }
}
