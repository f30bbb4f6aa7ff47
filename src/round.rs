//! Question lifecycle
//!
//! This module implements a single question of a round: announcing it,
//! counting down, collecting answers, scoring them and revealing the
//! correct answer once time is up. Moving from one question to the next is
//! the job of [`crate::game::Game`].

use std::{collections::HashSet, time::Duration};

use serde::Serialize;

use crate::{
    AlarmMessage,
    bank::Question,
    constants::{round::TICK_INTERVAL, scoring},
    game::Error,
    leaderboard::Leaderboard,
    session::Tunnel,
    watcher::{Id, Watchers},
};

/// Phase of the current question
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QuestionPhase {
    /// The countdown is running and answers are accepted
    #[default]
    Answering,
    /// The question is over and the next one has been scheduled
    Settling,
}

/// Update messages sent to participants while a question is running
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// (BROADCAST) A new question; the correct answer is never included
    NewQuestion {
        /// The question text
        question: String,
        /// The options in display order
        options: Vec<String>,
    },
    /// (BROADCAST) Seconds left on the countdown
    TimeUpdate {
        /// Whole seconds remaining
        time_left: u64,
    },
    /// (BROADCAST) The countdown ran out
    TimeUp {
        /// The option that earned points
        correct_answer: String,
    },
    /// (PRIVATE) Outcome of the participant's own answer
    Feedback(String),
}

/// Runtime state of the question being asked
#[derive(Debug, Clone)]
pub struct QuestionState {
    question: Question,
    /// Full countdown length in seconds
    duration: u64,
    time_remaining: u64,
    /// Participants that answered or ran out of time
    answered: HashSet<Id>,
    phase: QuestionPhase,
}

impl QuestionState {
    /// Creates the state of a question about to be asked
    pub fn new(question: Question, duration: u64) -> Self {
        Self {
            question,
            duration,
            time_remaining: duration,
            answered: HashSet::new(),
            phase: QuestionPhase::Answering,
        }
    }

    /// Announces the question and starts the countdown
    ///
    /// # Arguments
    ///
    /// * `watchers` - Roster of connected participants
    /// * `schedule_message` - Function to schedule the first countdown tick
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    /// * `epoch` - Generation the countdown belongs to
    pub fn play<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &self,
        watchers: &Watchers,
        mut schedule_message: S,
        tunnel_finder: F,
        epoch: u64,
    ) {
        watchers.announce(
            &UpdateMessage::NewQuestion {
                question: self.question.text().to_owned(),
                options: self.question.options().to_vec(),
            }
            .into(),
            tunnel_finder,
        );

        schedule_message(
            AlarmMessage::Tick { epoch },
            Duration::from_millis(TICK_INTERVAL),
        );
    }

    /// Points for a correct answer given with `time_remaining` seconds left
    ///
    /// Full points when answering immediately, minus a fixed amount per
    /// second waited, never below zero.
    pub fn calculate_score(duration: u64, time_remaining: u64) -> u64 {
        let waited = duration.saturating_sub(time_remaining);

        scoring::MAX_POINTS.saturating_sub(waited.saturating_mul(scoring::POINTS_LOST_PER_SECOND))
    }

    /// Records and scores a participant's answer
    ///
    /// The participant gets private feedback: the points earned, or the
    /// correct answer on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveQuestion`] once the question is settling and
    /// [`Error::DuplicateAnswer`] if the participant already answered.
    pub fn receive_answer<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        answer: &str,
        leaderboard: &mut Leaderboard,
        watchers: &Watchers,
        tunnel_finder: F,
    ) -> Result<u64, Error> {
        if self.phase != QuestionPhase::Answering {
            return Err(Error::NoActiveQuestion);
        }

        if !self.answered.insert(watcher_id) {
            return Err(Error::DuplicateAnswer);
        }

        let (points, feedback) = if self.question.is_correct(answer) {
            let points = Self::calculate_score(self.duration, self.time_remaining);
            (
                points,
                format!(
                    "Correct! You earned {}.",
                    pluralizer::pluralize(
                        "point",
                        isize::try_from(points).unwrap_or(isize::MAX),
                        true
                    )
                ),
            )
        } else {
            (
                0,
                format!(
                    "Incorrect. The correct answer was: {}",
                    self.question.correct_answer()
                ),
            )
        };

        leaderboard.add_points(watcher_id, points);
        watchers.send_message(
            &UpdateMessage::Feedback(feedback).into(),
            watcher_id,
            tunnel_finder,
        );

        Ok(points)
    }

    /// Whether every connected participant has answered
    ///
    /// Participants that left are not waited for.
    pub fn everyone_answered(&self, watchers: &Watchers) -> bool {
        watchers
            .ids()
            .iter()
            .all(|id| self.answered.contains(id))
    }

    /// Advances the countdown by one second and broadcasts the time left
    ///
    /// Returns `true` when the countdown reached zero.
    pub fn tick<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watchers: &Watchers,
        tunnel_finder: F,
    ) -> bool {
        self.time_remaining = self.time_remaining.saturating_sub(1);

        watchers.announce(
            &UpdateMessage::TimeUpdate {
                time_left: self.time_remaining,
            }
            .into(),
            tunnel_finder,
        );

        self.time_remaining == 0
    }

    /// Closes the question after the countdown ran out
    ///
    /// Everyone who did not answer is told they earned nothing, then the
    /// correct answer is revealed to all.
    pub fn time_up<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watchers: &Watchers,
        tunnel_finder: F,
    ) {
        if !self.settle() {
            return;
        }

        for id in watchers.ids() {
            if self.answered.insert(id) {
                watchers.send_message(
                    &UpdateMessage::Feedback(
                        "You didn't answer in time. You earned 0 points.".to_owned(),
                    )
                    .into(),
                    id,
                    &tunnel_finder,
                );
            }
        }

        watchers.announce(
            &UpdateMessage::TimeUp {
                correct_answer: self.question.correct_answer().to_owned(),
            }
            .into(),
            &tunnel_finder,
        );
    }

    /// Stops accepting answers
    ///
    /// Returns `false` if the question was already settling.
    pub fn settle(&mut self) -> bool {
        if self.phase == QuestionPhase::Answering {
            self.phase = QuestionPhase::Settling;

            true
        } else {
            false
        }
    }

    /// The question being asked
    pub fn question(&self) -> &Question {
        &self.question
    }

    /// Whole seconds left on the countdown
    pub fn time_remaining(&self) -> u64 {
        self.time_remaining
    }

    /// Current phase of the question
    pub fn phase(&self) -> QuestionPhase {
        self.phase
    }

    /// Whether the participant answered (or ran out of time)
    pub fn has_answered(&self, id: Id) -> bool {
        self.answered.contains(&id)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    struct MockTunnel {
        messages: Arc<Mutex<Vec<crate::UpdateMessage>>>,
    }

    impl Tunnel for MockTunnel {
        fn send_message(&self, message: &crate::UpdateMessage) {
            self.messages.lock().unwrap().push(message.clone());
        }
    }

    fn create_test_question() -> Question {
        Question::new(
            "What is the capital of France?",
            vec!["Madrid".into(), "Paris".into(), "Rome".into()],
            "Paris",
        )
    }

    fn create_watchers(count: usize) -> (Watchers, Vec<Id>) {
        let mut watchers = Watchers::default();
        let ids = (0..count).map(|_| Id::new()).collect::<Vec<_>>();
        for id in &ids {
            watchers.add_participant(*id).unwrap();
        }
        (watchers, ids)
    }

    fn feedback(tunnel: &MockTunnel) -> Vec<String> {
        tunnel
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|message| match message {
                crate::UpdateMessage::Round(UpdateMessage::Feedback(text)) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_calculate_score() {
        assert_eq!(QuestionState::calculate_score(10, 10), 100);
        assert_eq!(QuestionState::calculate_score(10, 8), 80);
        assert_eq!(QuestionState::calculate_score(10, 1), 10);
        assert_eq!(QuestionState::calculate_score(10, 0), 0);
        assert_eq!(QuestionState::calculate_score(20, 5), 0);
    }

    #[test]
    fn test_calculate_score_decreases_with_waiting() {
        for remaining in 1..=10 {
            assert!(
                QuestionState::calculate_score(10, remaining)
                    > QuestionState::calculate_score(10, remaining - 1)
            );
        }
    }

    #[test]
    fn test_play_announces_question_without_answer() {
        let state = QuestionState::new(create_test_question(), 10);
        let (watchers, _) = create_watchers(1);
        let tunnel = MockTunnel::default();
        let mut scheduled = Vec::new();

        state.play(
            &watchers,
            |alarm, delay| scheduled.push((alarm, delay)),
            |_| Some(tunnel.clone()),
            3,
        );

        assert_eq!(
            scheduled,
            vec![(AlarmMessage::Tick { epoch: 3 }, Duration::from_secs(1))]
        );
        let message = tunnel.messages.lock().unwrap()[0].to_message();
        assert!(message.contains("NewQuestion"));
        assert!(message.contains("Madrid"));
        assert!(message.contains("capital of France"));
        assert!(!message.contains("answer"));
    }

    #[test]
    fn test_correct_answer_scores_by_time_remaining() {
        let mut state = QuestionState::new(create_test_question(), 10);
        let (watchers, ids) = create_watchers(1);
        let mut leaderboard = Leaderboard::default();
        let tunnel = MockTunnel::default();

        state.tick(&watchers, |_| Some(tunnel.clone()));
        state.tick(&watchers, |_| Some(tunnel.clone()));
        let points = state
            .receive_answer(ids[0], "Paris", &mut leaderboard, &watchers, |_| {
                Some(tunnel.clone())
            })
            .unwrap();

        assert_eq!(points, 80);
        assert_eq!(leaderboard.score(ids[0]), 80);
        assert_eq!(feedback(&tunnel), vec!["Correct! You earned 80 points."]);
    }

    #[test]
    fn test_incorrect_answer_reveals_correct_one() {
        let mut state = QuestionState::new(create_test_question(), 10);
        let (watchers, ids) = create_watchers(1);
        let mut leaderboard = Leaderboard::default();
        let tunnel = MockTunnel::default();

        let points = state
            .receive_answer(ids[0], "Rome", &mut leaderboard, &watchers, |_| {
                Some(tunnel.clone())
            })
            .unwrap();

        assert_eq!(points, 0);
        assert_eq!(leaderboard.score(ids[0]), 0);
        assert_eq!(
            feedback(&tunnel),
            vec!["Incorrect. The correct answer was: Paris"]
        );
    }

    #[test]
    fn test_answer_comparison_is_exact() {
        let mut state = QuestionState::new(create_test_question(), 10);
        let (watchers, ids) = create_watchers(1);
        let mut leaderboard = Leaderboard::default();

        let points = state
            .receive_answer(ids[0], "paris ", &mut leaderboard, &watchers, |_: Id| {
                None::<MockTunnel>
            })
            .unwrap();

        assert_eq!(points, 0);
    }

    #[test]
    fn test_duplicate_answer_is_rejected() {
        let mut state = QuestionState::new(create_test_question(), 10);
        let (watchers, ids) = create_watchers(1);
        let mut leaderboard = Leaderboard::default();
        let finder = |_: Id| None::<MockTunnel>;

        state
            .receive_answer(ids[0], "Rome", &mut leaderboard, &watchers, finder)
            .unwrap();
        let second = state.receive_answer(ids[0], "Paris", &mut leaderboard, &watchers, finder);

        assert_eq!(second, Err(Error::DuplicateAnswer));
        assert_eq!(leaderboard.score(ids[0]), 0);
    }

    #[test]
    fn test_answer_after_settling_is_rejected() {
        let mut state = QuestionState::new(create_test_question(), 10);
        let (watchers, ids) = create_watchers(1);
        let mut leaderboard = Leaderboard::default();

        assert!(state.settle());
        let result = state.receive_answer(ids[0], "Paris", &mut leaderboard, &watchers, |_: Id| {
            None::<MockTunnel>
        });

        assert_eq!(result, Err(Error::NoActiveQuestion));
        assert!(!state.has_answered(ids[0]));
    }

    #[test]
    fn test_everyone_answered() {
        let mut state = QuestionState::new(create_test_question(), 10);
        let (mut watchers, ids) = create_watchers(2);
        let mut leaderboard = Leaderboard::default();
        let finder = |_: Id| None::<MockTunnel>;

        assert!(!state.everyone_answered(&watchers));
        state
            .receive_answer(ids[0], "Paris", &mut leaderboard, &watchers, finder)
            .unwrap();
        assert!(!state.everyone_answered(&watchers));

        watchers.remove_participant(ids[1]);
        assert!(state.everyone_answered(&watchers));
    }

    #[test]
    fn test_tick_counts_down_to_zero() {
        let mut state = QuestionState::new(create_test_question(), 3);
        let (watchers, _) = create_watchers(1);
        let tunnel = MockTunnel::default();

        assert!(!state.tick(&watchers, |_| Some(tunnel.clone())));
        assert!(!state.tick(&watchers, |_| Some(tunnel.clone())));
        assert!(state.tick(&watchers, |_| Some(tunnel.clone())));
        assert_eq!(state.time_remaining(), 0);

        let messages = tunnel.messages.lock().unwrap();
        assert_eq!(messages.len(), 3);
        assert!(matches!(
            messages[2],
            crate::UpdateMessage::Round(UpdateMessage::TimeUpdate { time_left: 0 })
        ));
    }

    #[test]
    fn test_time_up_notifies_only_unanswered() {
        let mut state = QuestionState::new(create_test_question(), 10);
        let (watchers, ids) = create_watchers(2);
        let mut leaderboard = Leaderboard::default();
        let answered = MockTunnel::default();
        let silent = MockTunnel::default();
        let (first, second) = (ids[0], ids[1]);
        let finder = |id: Id| {
            if id == first {
                Some(answered.clone())
            } else if id == second {
                Some(silent.clone())
            } else {
                None
            }
        };

        state
            .receive_answer(first, "Paris", &mut leaderboard, &watchers, finder)
            .unwrap();
        state.time_up(&watchers, finder);

        assert_eq!(state.phase(), QuestionPhase::Settling);
        assert!(state.has_answered(second));
        assert_eq!(leaderboard.score(second), 0);
        assert_eq!(
            feedback(&silent),
            vec!["You didn't answer in time. You earned 0 points."]
        );
        assert_eq!(feedback(&answered).len(), 1);
        for tunnel in [&answered, &silent] {
            let messages = tunnel.messages.lock().unwrap();
            assert!(matches!(
                messages.last(),
                Some(crate::UpdateMessage::Round(UpdateMessage::TimeUp { correct_answer }))
                    if correct_answer == "Paris"
            ));
        }
    }

    #[test]
    fn test_time_up_only_once() {
        let mut state = QuestionState::new(create_test_question(), 10);
        let (watchers, _) = create_watchers(1);
        let tunnel = MockTunnel::default();

        state.time_up(&watchers, |_| Some(tunnel.clone()));
        state.time_up(&watchers, |_| Some(tunnel.clone()));

        assert_eq!(tunnel.messages.lock().unwrap().len(), 2);
        assert!(!state.settle());
    }
}
