//! Core session logic and state management
//!
//! This module contains the session state machine: who may start a round,
//! how a round walks through its questions, how the countdown, answers and
//! departures move a question along, and how the round ends.
//!
//! Every handler runs to completion without blocking. Deferred work is
//! requested through a `schedule_message` callback and comes back later
//! through [`Game::receive_alarm`].

use std::{fmt::Debug, time::Duration};

use garde::Validate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    AlarmMessage,
    bank::{Question, QuestionBank},
    config::Options,
    constants::round::TICK_INTERVAL,
    leaderboard::Leaderboard,
    round::{QuestionPhase, QuestionState},
    session::Tunnel,
    watcher::{self, Id, Role, Watchers},
};

/// Phase of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// No round in progress; the host may start one
    Idle,
    /// A round was just started and its first question is being drawn
    CategorySelected,
    /// A question is on screen and its countdown is running
    QuestionActive,
    /// A question is over and the next step is scheduled
    QuestionSettling,
    /// The last question is over and results are being sent
    RoundComplete,
}

/// Messages received from participants
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// (HOST ONLY) Start a round with questions from a category
    StartGame(String),
    /// Answer the current question with the text of an option
    Answer(String),
}

/// Session and round level messages sent to participants
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// (PRIVATE) Whether the recipient is the host
    IsHost(bool),
    /// (PRIVATE) A request of the recipient was refused
    Error(String),
    /// (PRIVATE) The recipient's cumulative score at the end of a round
    ShowResults {
        /// Total points
        score: u64,
    },
    /// (BROADCAST) The host chose the category of the round
    CategorySelected {
        /// Name of the category
        category: String,
    },
    /// (BROADCAST) A round is starting
    NewRound,
}

/// Reasons a request or alarm was not acted upon
///
/// None of these are fatal. Only [`Error::UnknownCategory`] is reported to
/// the participant; the rest are dropped silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Only the host can start a round
    #[error("only the host can start a round")]
    NotHost,
    /// A round is already being played
    #[error("a round is already in progress")]
    RoundInProgress,
    /// The category does not exist or has no questions
    #[error("category {0:?} not found")]
    UnknownCategory(String),
    /// No question is accepting answers
    #[error("no question is accepting answers")]
    NoActiveQuestion,
    /// The sender is not connected
    #[error("unknown participant")]
    UnknownParticipant,
    /// The participant already answered the current question
    #[error("already answered")]
    DuplicateAnswer,
    /// The alarm belongs to a question or round that is over
    #[error("stale alarm")]
    StaleAlarm,
}

/// Where the current round stands
#[derive(Debug, Clone)]
enum Stage {
    CategorySelected,
    Question(QuestionState),
    Complete,
}

/// Round-scoped state, dropped when the round ends
#[derive(Debug, Clone)]
struct Round {
    category: String,
    /// Questions issued so far
    issued: usize,
    stage: Stage,
}

/// The trivia session
///
/// One value holds all state of the session: the roster, the scores, and
/// the round in progress if any.
pub struct Game {
    /// Connected participants and the host
    pub watchers: Watchers,
    /// Cumulative scores
    pub leaderboard: Leaderboard,
    /// Source of questions
    bank: QuestionBank,
    /// Pace of rounds
    options: Options,
    /// The round in progress
    round: Option<Round>,
    /// Generation of pending alarms; alarms from older epochs are ignored
    epoch: u64,
    rng: fastrand::Rng,
}

impl Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("phase", &self.phase())
            .field("participants", &self.watchers.count())
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl Game {
    /// Creates an idle session with nobody connected
    ///
    /// # Errors
    ///
    /// Returns the validation report if `options` are out of bounds.
    pub fn new(bank: QuestionBank, options: Options) -> Result<Self, garde::Report> {
        Self::with_rng(bank, options, fastrand::Rng::new())
    }

    /// Creates an idle session drawing questions with the given generator
    ///
    /// # Errors
    ///
    /// Returns the validation report if `options` are out of bounds.
    pub fn with_rng(
        bank: QuestionBank,
        options: Options,
        rng: fastrand::Rng,
    ) -> Result<Self, garde::Report> {
        options.validate()?;

        Ok(Self {
            watchers: Watchers::default(),
            leaderboard: Leaderboard::default(),
            bank,
            options,
            round: None,
            epoch: 0,
            rng,
        })
    }

    /// Current phase of the session
    pub fn phase(&self) -> Phase {
        match &self.round {
            None => Phase::Idle,
            Some(round) => match &round.stage {
                Stage::CategorySelected => Phase::CategorySelected,
                Stage::Question(state) => match state.phase() {
                    QuestionPhase::Answering => Phase::QuestionActive,
                    QuestionPhase::Settling => Phase::QuestionSettling,
                },
                Stage::Complete => Phase::RoundComplete,
            },
        }
    }

    /// Whether a round is in progress
    pub fn game_started(&self) -> bool {
        self.round.is_some()
    }

    /// The host, if anyone is connected
    pub fn host(&self) -> Option<Id> {
        self.watchers.host()
    }

    /// Category of the round in progress
    pub fn category(&self) -> Option<&str> {
        self.round.as_ref().map(|round| round.category.as_str())
    }

    /// Number of questions issued in the round in progress
    pub fn question_index(&self) -> usize {
        self.round.as_ref().map_or(0, |round| round.issued)
    }

    /// State of the question on screen
    fn question_state(&self) -> Option<&QuestionState> {
        match &self.round {
            Some(Round {
                stage: Stage::Question(state),
                ..
            }) => Some(state),
            _ => None,
        }
    }

    /// The question on screen, while active or settling
    pub fn current_question(&self) -> Option<&Question> {
        self.question_state().map(QuestionState::question)
    }

    /// Seconds left on the countdown of the question on screen
    pub fn time_remaining(&self) -> u64 {
        self.question_state()
            .map_or(self.options.question_seconds(), QuestionState::time_remaining)
    }

    /// Whether the participant answered the question on screen
    pub fn has_answered(&self, watcher_id: Id) -> bool {
        self.question_state()
            .is_some_and(|state| state.has_answered(watcher_id))
    }

    /// Current alarm generation
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Pace of rounds
    pub fn options(&self) -> &Options {
        &self.options
    }

    // Roster

    /// Registers a newly connected participant
    ///
    /// The first participant of an empty session becomes host. Either way
    /// the participant is told whether it is the host. A round in progress
    /// is not affected.
    ///
    /// # Errors
    ///
    /// Returns a [`watcher::Error`] if the participant cannot be added.
    pub fn add_participant<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        tunnel_finder: F,
    ) -> Result<(), watcher::Error> {
        let role = self.watchers.add_participant(watcher_id)?;

        info!(
            "participant {watcher_id} joined as {role:?} ({} connected)",
            self.watchers.count()
        );

        self.watchers.send_message(
            &UpdateMessage::IsHost(role == Role::Host).into(),
            watcher_id,
            tunnel_finder,
        );

        Ok(())
    }

    /// Removes a disconnected participant
    ///
    /// If the host left, the participant that joined earliest among the
    /// remaining ones is promoted and told so. During a question, the
    /// departure can complete it early: only connected participants are
    /// waited for. A round keeps running on its timers when nobody is left,
    /// so whoever joins next lands in the round in progress.
    pub fn remove_participant<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        let Some(departure) = self.watchers.remove_participant(watcher_id) else {
            return;
        };
        self.leaderboard.remove(watcher_id);

        info!(
            "participant {watcher_id} left ({} connected)",
            self.watchers.count()
        );

        if let Some(host) = departure.promoted {
            info!("participant {host} promoted to host");
            self.watchers
                .send_message(&UpdateMessage::IsHost(true).into(), host, &tunnel_finder);
        }

        if self.round.is_some() {
            self.settle_if_everyone_answered(schedule_message);
        }
    }

    // Messages

    /// Handles a message from a participant
    ///
    /// Requests that cannot be honored are dropped; an unknown category is
    /// reported back to the host.
    pub fn receive_message<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        message: IncomingMessage,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        let result = match message {
            IncomingMessage::StartGame(category) => {
                self.start_game(watcher_id, &category, schedule_message, tunnel_finder)
            }
            IncomingMessage::Answer(answer) => self
                .submit_answer(watcher_id, &answer, schedule_message, tunnel_finder)
                .map(|_| ()),
        };

        if let Err(e) = result {
            debug!("ignoring message from {watcher_id}: {e}");
        }
    }

    /// Starts a round with questions from `category`
    ///
    /// Announces the category and the round to everyone, then issues the
    /// first question.
    ///
    /// # Errors
    ///
    /// * [`Error::NotHost`] if the sender is not the host
    /// * [`Error::RoundInProgress`] if a round is being played
    /// * [`Error::UnknownCategory`] if the bank has no questions for the
    ///   category; the sender is told so
    pub fn start_game<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watcher_id: Id,
        category: &str,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        if !self.watchers.is_host(watcher_id) {
            return Err(Error::NotHost);
        }

        if self.round.is_some() {
            return Err(Error::RoundInProgress);
        }

        if !self.bank.has_questions(category) {
            self.watchers.send_message(
                &UpdateMessage::Error("Category not found".to_owned()).into(),
                watcher_id,
                tunnel_finder,
            );
            return Err(Error::UnknownCategory(category.to_owned()));
        }

        info!("host {watcher_id} started a round of {category:?}");

        self.round = Some(Round {
            category: category.to_owned(),
            issued: 0,
            stage: Stage::CategorySelected,
        });

        self.watchers.announce(
            &UpdateMessage::CategorySelected {
                category: category.to_owned(),
            }
            .into(),
            &tunnel_finder,
        );
        self.watchers
            .announce(&UpdateMessage::NewRound.into(), &tunnel_finder);

        self.next_question(schedule_message, tunnel_finder);

        Ok(())
    }

    /// Records a participant's answer to the question on screen
    ///
    /// Returns the points earned. Once every connected participant has
    /// answered, the countdown is cancelled and the next question is
    /// scheduled after the settle delay.
    ///
    /// # Errors
    ///
    /// * [`Error::UnknownParticipant`] if the sender is not connected
    /// * [`Error::NoActiveQuestion`] if no question accepts answers
    /// * [`Error::DuplicateAnswer`] if the sender already answered
    pub fn submit_answer<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        answer: &str,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<u64, Error> {
        if !self.watchers.has_participant(watcher_id) {
            return Err(Error::UnknownParticipant);
        }

        let Some(Round {
            stage: Stage::Question(state),
            ..
        }) = &mut self.round
        else {
            return Err(Error::NoActiveQuestion);
        };

        let points = state.receive_answer(
            watcher_id,
            answer,
            &mut self.leaderboard,
            &self.watchers,
            tunnel_finder,
        )?;

        self.settle_if_everyone_answered(schedule_message);

        Ok(points)
    }

    // Alarms

    /// Handles an alarm scheduled by an earlier handler
    ///
    /// Alarms from an older epoch belong to a question or round that is
    /// over and are ignored.
    pub fn receive_alarm<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        message: AlarmMessage,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        let result = if message.epoch() == self.epoch {
            match message {
                AlarmMessage::Tick { .. } => self.tick(schedule_message, tunnel_finder),
                AlarmMessage::Advance { .. } if self.phase() == Phase::QuestionSettling => {
                    self.next_question(schedule_message, tunnel_finder);
                    Ok(())
                }
                AlarmMessage::Advance { .. } => Err(Error::StaleAlarm),
            }
        } else {
            Err(Error::StaleAlarm)
        };

        if let Err(e) = result {
            debug!("ignoring {message:?} at epoch {}: {e}", self.epoch);
        }
    }

    /// Runs one second of the countdown
    fn tick<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        mut schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        let Some(Round {
            stage: Stage::Question(state),
            ..
        }) = &mut self.round
        else {
            return Err(Error::StaleAlarm);
        };

        if state.phase() != QuestionPhase::Answering {
            return Err(Error::StaleAlarm);
        }

        if state.tick(&self.watchers, &tunnel_finder) {
            self.epoch += 1;
            state.time_up(&self.watchers, &tunnel_finder);
            schedule_message(
                AlarmMessage::Advance { epoch: self.epoch },
                self.options.settle_delay,
            );
        } else {
            schedule_message(
                AlarmMessage::Tick { epoch: self.epoch },
                Duration::from_millis(TICK_INTERVAL),
            );
        }

        Ok(())
    }

    // Round flow

    /// Cancels the countdown once nobody is left to answer
    ///
    /// An empty roster never settles early; the countdown runs out instead.
    fn settle_if_everyone_answered<S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        mut schedule_message: S,
    ) {
        let Some(Round {
            stage: Stage::Question(state),
            ..
        }) = &mut self.round
        else {
            return;
        };

        if state.phase() != QuestionPhase::Answering
            || self.watchers.is_empty()
            || !state.everyone_answered(&self.watchers)
        {
            return;
        }

        state.settle();
        self.epoch += 1;

        debug!("everyone answered with {}s left", state.time_remaining());

        schedule_message(
            AlarmMessage::Advance { epoch: self.epoch },
            self.options.settle_delay,
        );
    }

    /// Issues the next question, or ends the round
    ///
    /// Anything scheduled for the previous question is invalidated.
    fn next_question<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        self.epoch += 1;

        let Some(round) = &mut self.round else {
            return;
        };

        if round.issued >= self.options.questions_per_round {
            self.end_round(tunnel_finder);
            return;
        }

        let Some(question) = self.bank.pick(&round.category, &mut self.rng).cloned() else {
            warn!(
                "category {:?} has no questions left, ending the round early",
                round.category
            );
            self.end_round(tunnel_finder);
            return;
        };

        round.issued += 1;

        debug!(
            "issuing question {}/{} of {:?}",
            round.issued, self.options.questions_per_round, round.category
        );

        let state = QuestionState::new(question, self.options.question_seconds());
        state.play(&self.watchers, schedule_message, tunnel_finder, self.epoch);
        round.stage = Stage::Question(state);
    }

    /// Sends everyone its own score and returns to idle
    ///
    /// Scores are kept for the next round.
    fn end_round<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: F) {
        self.epoch += 1;

        let Some(round) = &mut self.round else {
            return;
        };
        round.stage = Stage::Complete;

        self.watchers.announce_with(
            |id, _| {
                Some(
                    UpdateMessage::ShowResults {
                        score: self.leaderboard.score(id),
                    }
                    .into(),
                )
            },
            tunnel_finder,
        );

        info!(
            "round of {:?} finished after {} questions, leader: {:?}",
            round.category,
            round.issued,
            self.leaderboard.standings().first()
        );

        self.round = None;
    }
}
