//! Presence Tracker: derives online/offline transitions from connection lifecycle.
//!
//! Two modes are supported:
//!
//! | Mode       | Online while                     | Offline emitted when              |
//! |------------|----------------------------------|-----------------------------------|
//! | `RefCount` | ≥ 1 identified live connection   | the last connection goes away     |
//! | `Anchor`   | the single anchor is live        | the anchor disconnects (flickers) |
//!
//! In both modes the anchor (target of direct notifications) is the most
//! recently identified connection still attached to the user.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::events::{PresenceStatus, PresenceUpdate};
use super::ids::{ConnectionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceMode {
    #[default]
    RefCount,
    Anchor,
}

impl std::fmt::Display for PresenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceMode::RefCount => write!(f, "ref_count"),
            PresenceMode::Anchor => write!(f, "anchor"),
        }
    }
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    mode: PresenceMode,
    /// Attached connections per user, oldest first. Last entry is the anchor.
    users: HashMap<UserId, Vec<ConnectionId>>,
}

impl PresenceTracker {
    pub fn new(mode: PresenceMode) -> Self {
        Self {
            mode,
            users: HashMap::new(),
        }
    }

    pub fn mode(&self) -> PresenceMode {
        self.mode
    }

    /// Make `connection` the user's anchor. Returns `Online` on the user's first anchor.
    pub fn attach(&mut self, user: &UserId, connection: ConnectionId) -> Option<PresenceUpdate> {
        let connections = self.users.entry(user.clone()).or_default();
        let was_offline = connections.is_empty();
        match self.mode {
            PresenceMode::RefCount => {
                connections.retain(|c| *c != connection);
                connections.push(connection);
            }
            PresenceMode::Anchor => {
                connections.clear();
                connections.push(connection);
            }
        }
        was_offline.then(|| PresenceUpdate {
            user_id: user.clone(),
            status: PresenceStatus::Online,
        })
    }

    /// Release `connection` from the user. Returns `Offline` when the user drops off.
    pub fn detach(&mut self, user: &UserId, connection: ConnectionId) -> Option<PresenceUpdate> {
        let connections = self.users.get_mut(user)?;
        let went_offline = match self.mode {
            PresenceMode::RefCount => {
                let before = connections.len();
                connections.retain(|c| *c != connection);
                before != connections.len() && connections.is_empty()
            }
            PresenceMode::Anchor => connections.last() == Some(&connection),
        };
        if !went_offline {
            return None;
        }
        self.users.remove(user);
        Some(PresenceUpdate {
            user_id: user.clone(),
            status: PresenceStatus::Offline,
        })
    }

    pub fn anchor_of(&self, user: &UserId) -> Option<ConnectionId> {
        self.users.get(user).and_then(|c| c.last().copied())
    }

    pub fn connections_of(&self, user: &UserId) -> Vec<ConnectionId> {
        self.users.get(user).cloned().unwrap_or_default()
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.users.contains_key(user)
    }

    /// Online users, sorted.
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.keys().cloned().collect();
        users.sort();
        users
    }
}
