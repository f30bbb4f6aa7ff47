//! Shared session driver
//!
//! [`Game`] is a plain state machine: it never sleeps and never spawns.
//! [`Coordinator`] puts it behind an async lock so any number of connection
//! tasks can feed it, keeps the tunnel of every connected participant, and
//! turns scheduled [`AlarmMessage`]s into tokio timers.
//!
//! Timers that belong to an older epoch are aborted as soon as the game
//! moves on, so at most one countdown is ever running.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use derive_where::derive_where;
use log::{debug, warn};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};

use crate::{
    AlarmMessage,
    game::{Game, IncomingMessage},
    session::Tunnel,
    watcher::{self, Id},
};

/// A pending alarm
struct Timer {
    epoch: u64,
    handle: JoinHandle<()>,
}

struct Inner<T> {
    game: Game,
    tunnels: HashMap<Id, T>,
    timers: Vec<Timer>,
    alarm_sender: mpsc::UnboundedSender<AlarmMessage>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        for timer in &self.timers {
            timer.handle.abort();
        }
    }
}

impl<T: Tunnel + Clone + Send + 'static> Inner<T> {
    /// Runs a game handler with this session's tunnels, then arms whatever
    /// it scheduled
    fn dispatch<R>(
        &mut self,
        handler: impl FnOnce(
            &mut Game,
            &mut dyn FnMut(AlarmMessage, Duration),
            &dyn Fn(Id) -> Option<T>,
        ) -> R,
    ) -> R {
        let mut alarms = Vec::new();
        let tunnels = &self.tunnels;

        let mut schedule_message =
            |alarm: AlarmMessage, delay: Duration| alarms.push((alarm, delay));
        let tunnel_finder = |id: Id| tunnels.get(&id).cloned();

        let result = handler(&mut self.game, &mut schedule_message, &tunnel_finder);

        self.arm(alarms);

        result
    }

    /// Drops timers of past epochs and starts the new ones
    fn arm(&mut self, alarms: Vec<(AlarmMessage, Duration)>) {
        let epoch = self.game.epoch();

        self.timers.retain(|timer| {
            if timer.epoch == epoch && !timer.handle.is_finished() {
                true
            } else {
                timer.handle.abort();
                false
            }
        });

        for (alarm, delay) in alarms {
            if alarm.epoch() != epoch {
                debug!("not arming {alarm:?}, epoch is already {epoch}");
                continue;
            }

            let sender = self.alarm_sender.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // the receiver is gone once the session is dropped
                let _ = sender.send(alarm);
            });

            self.timers.push(Timer { epoch, handle });
        }
    }
}

/// A running trivia session shared between connection tasks
///
/// Cloning is cheap; all clones drive the same session.
#[derive_where(Clone)]
pub struct Coordinator<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: Tunnel + Clone + Send + 'static> Coordinator<T> {
    /// Starts driving `game`
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(game: Game) -> Self {
        let (alarm_sender, alarm_receiver) = mpsc::unbounded_channel();

        let inner = Arc::new(Mutex::new(Inner {
            game,
            tunnels: HashMap::new(),
            timers: Vec::new(),
            alarm_sender,
        }));

        tokio::spawn(Self::deliver_alarms(Arc::downgrade(&inner), alarm_receiver));

        Self { inner }
    }

    /// Feeds fired timers back into the game until the session is dropped
    async fn deliver_alarms(
        inner: Weak<Mutex<Inner<T>>>,
        mut alarm_receiver: mpsc::UnboundedReceiver<AlarmMessage>,
    ) {
        while let Some(alarm) = alarm_receiver.recv().await {
            let Some(session) = inner.upgrade() else {
                break;
            };

            session.lock().await.dispatch(|game, schedule_message, tunnel_finder| {
                game.receive_alarm(alarm, schedule_message, tunnel_finder);
            });
        }
    }

    /// Registers a new connection and its tunnel
    ///
    /// # Errors
    ///
    /// Returns a [`watcher::Error`] if the connection is already registered
    /// or the session is full; the tunnel is dropped in that case.
    pub async fn connect(&self, watcher_id: Id, tunnel: T) -> Result<(), watcher::Error> {
        let mut inner = self.inner.lock().await;

        if inner.tunnels.contains_key(&watcher_id) {
            return Err(watcher::Error::AlreadyConnected);
        }

        inner.tunnels.insert(watcher_id, tunnel);

        let result =
            inner.dispatch(|game, _, tunnel_finder| game.add_participant(watcher_id, tunnel_finder));

        if result.is_err() {
            inner.tunnels.remove(&watcher_id);
        }

        result
    }

    /// Unregisters a connection
    pub async fn disconnect(&self, watcher_id: Id) {
        let mut inner = self.inner.lock().await;

        inner.dispatch(|game, schedule_message, tunnel_finder| {
            game.remove_participant(watcher_id, schedule_message, tunnel_finder);
        });

        inner.tunnels.remove(&watcher_id);
    }

    /// Handles a message from a connection
    pub async fn receive_message(&self, watcher_id: Id, message: IncomingMessage) {
        self.inner
            .lock()
            .await
            .dispatch(|game, schedule_message, tunnel_finder| {
                game.receive_message(watcher_id, message, schedule_message, tunnel_finder);
            });
    }

    /// Handles a raw JSON message from a connection
    ///
    /// Malformed messages are logged and dropped.
    pub async fn receive_text(&self, watcher_id: Id, text: &str) {
        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(message) => self.receive_message(watcher_id, message).await,
            Err(e) => warn!("dropping malformed message from {watcher_id}: {e}"),
        }
    }

    /// Reads the session state
    pub async fn inspect<R>(&self, f: impl FnOnce(&Game) -> R) -> R {
        f(&self.inner.lock().await.game)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{
        bank::{Question, QuestionBank},
        config::Options,
        game::Phase,
    };
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    type TestCoordinator = Coordinator<UnboundedSender<String>>;

    fn create_test_coordinator() -> TestCoordinator {
        let _ = env_logger::builder().is_test(true).try_init();

        let bank = QuestionBank::new([(
            "Geography".to_string(),
            vec![Question::new(
                "What is the capital of France?",
                vec!["Madrid".into(), "Paris".into(), "Rome".into()],
                "Paris",
            )],
        )]);

        Coordinator::new(Game::new(bank, Options::default()).unwrap())
    }

    async fn join(coordinator: &TestCoordinator) -> (Id, UnboundedReceiver<String>) {
        let (sender, receiver) = unbounded_channel();
        let id = Id::new();
        coordinator.connect(id, sender).await.unwrap();
        (id, receiver)
    }

    fn drain(receiver: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn count(messages: &[String], needle: &str) -> usize {
        messages
            .iter()
            .filter(|message| message.contains(needle))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_runs_on_timers() {
        let coordinator = create_test_coordinator();
        let (host, mut host_receiver) = join(&coordinator).await;

        coordinator
            .receive_text(host, r#"{"StartGame":"Geography"}"#)
            .await;
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(coordinator.inspect(Game::time_remaining).await, 8);

        coordinator.receive_text(host, r#"{"Answer":"Paris"}"#).await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        let messages = drain(&mut host_receiver);
        assert_eq!(count(&messages, "NewQuestion"), 6);
        assert_eq!(count(&messages, r#"{"ShowResults":{"score":80}}"#), 1);
        assert_eq!(coordinator.inspect(Game::phase).await, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_everyone_answering_cancels_countdown() {
        let coordinator = create_test_coordinator();
        let (host, mut host_receiver) = join(&coordinator).await;
        let (player, _player_receiver) = join(&coordinator).await;

        coordinator
            .receive_message(host, IncomingMessage::StartGame("Geography".to_string()))
            .await;
        coordinator
            .receive_message(host, IncomingMessage::Answer("Paris".to_string()))
            .await;
        coordinator
            .receive_message(player, IncomingMessage::Answer("Rome".to_string()))
            .await;
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(coordinator.inspect(Game::question_index).await, 2);
        assert_eq!(coordinator.inspect(Game::time_remaining).await, 10);

        let messages = drain(&mut host_receiver);
        assert_eq!(count(&messages, "TimeUpdate"), 0);
        assert_eq!(count(&messages, "TimeUp"), 0);
        assert_eq!(count(&messages, "NewQuestion"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_text_is_dropped() {
        let coordinator = create_test_coordinator();
        let (host, mut host_receiver) = join(&coordinator).await;
        drain(&mut host_receiver);

        coordinator.receive_text(host, "not json").await;
        coordinator.receive_text(host, r#"{"Shout":"hi"}"#).await;

        assert_eq!(coordinator.inspect(Game::phase).await, Phase::Idle);
        assert!(drain(&mut host_receiver).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_connection_keeps_first_tunnel() {
        let coordinator = create_test_coordinator();
        let (host, mut host_receiver) = join(&coordinator).await;
        let (sender, mut receiver) = unbounded_channel();

        assert_eq!(
            coordinator.connect(host, sender).await,
            Err(watcher::Error::AlreadyConnected)
        );

        coordinator
            .receive_text(host, r#"{"StartGame":"History"}"#)
            .await;

        let messages = drain(&mut host_receiver);
        assert_eq!(count(&messages, "Category not found"), 1);
        assert!(drain(&mut receiver).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_promotes_next_host() {
        let coordinator = create_test_coordinator();
        let (host, _host_receiver) = join(&coordinator).await;
        let (player, mut player_receiver) = join(&coordinator).await;
        assert_eq!(
            drain(&mut player_receiver),
            vec![r#"{"Game":{"IsHost":false}}"#.to_string()]
        );

        coordinator.disconnect(host).await;

        assert_eq!(
            drain(&mut player_receiver),
            vec![r#"{"Game":{"IsHost":true}}"#.to_string()]
        );
        assert_eq!(coordinator.inspect(Game::host).await, Some(player));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_continues_after_everyone_leaves() {
        let coordinator = create_test_coordinator();
        let (host, _host_receiver) = join(&coordinator).await;

        coordinator
            .receive_text(host, r#"{"StartGame":"Geography"}"#)
            .await;
        coordinator.disconnect(host).await;
        tokio::time::sleep(Duration::from_millis(5500)).await;

        assert_eq!(coordinator.inspect(Game::phase).await, Phase::QuestionActive);
        assert_eq!(coordinator.inspect(Game::question_index).await, 1);

        let (_newcomer, mut newcomer_receiver) = join(&coordinator).await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        let messages = drain(&mut newcomer_receiver);
        assert_eq!(messages[0], r#"{"Game":{"IsHost":true}}"#);
        assert_eq!(count(&messages, "NewQuestion"), 5);
        assert_eq!(count(&messages, r#"{"ShowResults":{"score":0}}"#), 1);
        assert_eq!(coordinator.inspect(Game::phase).await, Phase::Idle);
    }
}
