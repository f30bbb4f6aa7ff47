//! Question bank
//!
//! The bank is a read-only mapping from category names to the questions
//! available in that category. The session only ever checks whether a
//! category has questions and draws one of them at random; loading and
//! validating the content happens once, before the session starts.

use std::collections::HashMap;

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::bank;

/// A multiple choice question
///
/// The correct answer is stored as text and must equal exactly one of the
/// options. Answers are compared by exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Question {
    /// The question text shown to participants
    #[serde(rename = "question")]
    #[garde(length(chars, min = 1, max = bank::MAX_QUESTION_LENGTH))]
    text: String,
    /// The options in display order
    #[garde(length(min = 1, max = bank::MAX_OPTION_COUNT), inner(length(chars, max = bank::MAX_OPTION_LENGTH)))]
    options: Vec<String>,
    /// The option that earns points
    #[serde(rename = "answer")]
    #[garde(skip)]
    correct_answer: String,
}

impl Question {
    /// Creates a new question
    ///
    /// No validation happens here; see [`QuestionBank::validate`].
    pub fn new<S: Into<String>>(text: S, options: Vec<String>, correct_answer: S) -> Self {
        Self {
            text: text.into(),
            options,
            correct_answer: correct_answer.into(),
        }
    }

    /// The question text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The options in display order
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// The correct option
    pub fn correct_answer(&self) -> &str {
        &self.correct_answer
    }

    /// Whether `answer` is exactly the correct option
    pub fn is_correct(&self, answer: &str) -> bool {
        self.correct_answer == answer
    }
}

/// Errors raised while loading or validating a question bank
#[derive(Error, Debug)]
pub enum Error {
    /// The bank could not be parsed
    #[error("malformed question bank: {0}")]
    Json(#[from] serde_json::Error),
    /// A question violates the length limits
    #[error("invalid question in category {category:?}: {report}")]
    Invalid {
        /// Category containing the offending question
        category: String,
        /// What was wrong with it
        report: garde::Report,
    },
    /// A question's answer is not one of its options
    #[error("answer of question {question:?} in category {category:?} is not one of its options")]
    AnswerNotAnOption {
        /// Category containing the offending question
        category: String,
        /// Text of the offending question
        question: String,
    },
    /// A category name is empty or too long
    #[error("category names must be between 1 and {} characters", bank::MAX_CATEGORY_LENGTH)]
    CategoryName,
}

/// Read-only collection of questions grouped by category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionBank {
    categories: HashMap<String, Vec<Question>>,
}

impl QuestionBank {
    /// Creates a bank from categories and their questions
    pub fn new<I: IntoIterator<Item = (String, Vec<Question>)>>(categories: I) -> Self {
        Self {
            categories: categories.into_iter().collect(),
        }
    }

    /// Parses and validates a bank from JSON
    ///
    /// The expected shape is an object mapping each category to an array of
    /// `{"question": ..., "options": [...], "answer": ...}` objects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not a bank, or any error of
    /// [`QuestionBank::validate`].
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let bank: Self = serde_json::from_str(json)?;
        bank.validate()?;
        Ok(bank)
    }

    /// Checks every category name and question
    ///
    /// # Errors
    ///
    /// Returns the first problem found, if any.
    pub fn validate(&self) -> Result<(), Error> {
        for (category, questions) in &self.categories {
            if category.is_empty() || category.chars().count() > bank::MAX_CATEGORY_LENGTH {
                return Err(Error::CategoryName);
            }

            for question in questions {
                question.validate().map_err(|report| Error::Invalid {
                    category: category.clone(),
                    report,
                })?;

                if question
                    .options
                    .iter()
                    .filter(|option| question.is_correct(option))
                    .count()
                    != 1
                {
                    return Err(Error::AnswerNotAnOption {
                        category: category.clone(),
                        question: question.text.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Whether the category exists and has at least one question
    pub fn has_questions(&self, category: &str) -> bool {
        self.categories
            .get(category)
            .is_some_and(|questions| !questions.is_empty())
    }

    /// Draws a question uniformly at random from a category
    ///
    /// Draws are independent, so the same question can come up more than
    /// once in a round. Returns `None` for unknown or empty categories.
    pub fn pick(&self, category: &str, rng: &mut fastrand::Rng) -> Option<&Question> {
        rng.choice(self.categories.get(category)?)
    }

    /// Names of all categories, sorted
    pub fn categories(&self) -> Vec<&str> {
        self.categories.keys().map(String::as_str).sorted().collect_vec()
    }
}
