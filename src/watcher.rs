//! Participant roster management
//!
//! This module tracks every participant connected to the session, decides
//! which of them is the host, and provides the primitives used to send a
//! message to one participant or to everyone.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

use super::{UpdateMessage, session::Tunnel};

/// A unique identifier for a participant's connection
///
/// Each connection gets a fresh ID; a participant that reconnects is a new
/// participant.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random participant ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The role of a participant in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum Role {
    /// The single participant allowed to start rounds
    Host,
    /// Any other participant
    Player,
}

/// Per-participant roster entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Participant {
    role: Role,
    /// Join order, used to pick a successor when the host leaves
    seat: u64,
}

/// Outcome of removing a participant from the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    /// Role the participant held when it left
    pub role: Role,
    /// Participant promoted to host because the host left
    pub promoted: Option<Id>,
}

/// Errors that can occur when managing the roster
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The session has reached the maximum number of participants
    #[error("maximum number of participants reached")]
    MaximumParticipants,
    /// The connection is already registered
    #[error("participant is already connected")]
    AlreadyConnected,
}

/// All participants currently connected to the session
///
/// Invariant: whenever the roster is non-empty exactly one participant holds
/// [`Role::Host`]; when it is empty there is no host.
#[derive(Debug, Default)]
pub struct Watchers {
    /// Primary mapping from participant ID to its roster entry
    mapping: HashMap<Id, Participant>,
    /// Reverse mapping organized by role
    reverse_mapping: EnumMap<Role, HashSet<Id>>,
    /// Seat handed to the next participant that joins
    next_seat: u64,
}

impl Watchers {
    /// Registers a newly connected participant
    ///
    /// The participant becomes host if nobody else is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] for a known ID and
    /// [`Error::MaximumParticipants`] if the session is full.
    pub fn add_participant(&mut self, id: Id) -> Result<Role, Error> {
        if self.mapping.contains_key(&id) {
            return Err(Error::AlreadyConnected);
        }

        if self.mapping.len() >= crate::constants::session::MAX_PARTICIPANT_COUNT {
            return Err(Error::MaximumParticipants);
        }

        let role = if self.host().is_none() {
            Role::Host
        } else {
            Role::Player
        };

        self.mapping.insert(
            id,
            Participant {
                role,
                seat: self.next_seat,
            },
        );
        self.reverse_mapping[role].insert(id);
        self.next_seat += 1;

        Ok(role)
    }

    /// Removes a participant, promoting a new host if needed
    ///
    /// The successor is the remaining participant that joined earliest.
    /// Returns `None` if the participant was not connected.
    pub fn remove_participant(&mut self, id: Id) -> Option<Departure> {
        let participant = self.mapping.remove(&id)?;
        self.reverse_mapping[participant.role].remove(&id);

        let promoted = if participant.role == Role::Host {
            let successor = self.reverse_mapping[Role::Player]
                .iter()
                .filter_map(|id| Some((*id, self.mapping.get(id)?.seat)))
                .min_by_key(|(_, seat)| *seat)
                .map(|(id, _)| id);

            if let Some(successor) = successor {
                self.set_role(successor, Role::Host);
            }

            successor
        } else {
            None
        };

        Some(Departure {
            role: participant.role,
            promoted,
        })
    }

    /// Moves a participant between roles
    fn set_role(&mut self, id: Id, role: Role) {
        let Some(participant) = self.mapping.get_mut(&id) else {
            return;
        };
        self.reverse_mapping[participant.role].remove(&id);
        self.reverse_mapping[role].insert(id);
        participant.role = role;
    }

    /// The current host, if anyone is connected
    pub fn host(&self) -> Option<Id> {
        self.reverse_mapping[Role::Host].iter().next().copied()
    }

    /// Whether the participant is the current host
    pub fn is_host(&self, id: Id) -> bool {
        self.reverse_mapping[Role::Host].contains(&id)
    }

    /// The role of a participant, if connected
    pub fn role(&self, id: Id) -> Option<Role> {
        self.mapping.get(&id).map(|participant| participant.role)
    }

    /// Whether the participant is connected
    pub fn has_participant(&self, id: Id) -> bool {
        self.mapping.contains_key(&id)
    }

    /// Number of connected participants
    pub fn count(&self) -> usize {
        self.mapping.len()
    }

    /// Whether nobody is connected
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// IDs of all connected participants in join order
    pub fn ids(&self) -> Vec<Id> {
        self.mapping
            .iter()
            .sorted_by_key(|(_, participant)| participant.seat)
            .map(|(id, _)| *id)
            .collect_vec()
    }

    /// Sends an update message to a specific participant
    ///
    /// # Arguments
    ///
    /// * `message` - The update message to send
    /// * `watcher_id` - The ID of the participant to send to
    /// * `tunnel_finder` - Function to retrieve the tunnel for the participant
    pub fn send_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(watcher_id) else {
            return;
        };

        session.send_message(message);
    }

    /// Sends personalized messages to all participants
    ///
    /// The sender function is called for each participant and can return
    /// a different message per participant, or `None` to skip it.
    pub fn announce_with<S, T: Tunnel, F: Fn(Id) -> Option<T>>(&self, sender: S, tunnel_finder: F)
    where
        S: Fn(Id, Role) -> Option<UpdateMessage>,
    {
        for (id, participant) in &self.mapping {
            let Some(message) = sender(*id, participant.role) else {
                continue;
            };
            let Some(session) = tunnel_finder(*id) else {
                continue;
            };

            session.send_message(&message);
        }
    }

    /// Broadcasts an update message to every participant
    pub fn announce<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        self.announce_with(|_, _| Some(message.to_owned()), tunnel_finder);
    }
}
