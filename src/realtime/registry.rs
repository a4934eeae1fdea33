//! Connection Registry: lifecycle bookkeeping for live connections.

use std::collections::HashMap;

use super::broadcast::Outbox;
use super::ids::{ConnectionId, UserId};

/// One live transport session.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Absent until the client sends `identify`.
    pub user_id: Option<UserId>,
    pub outbox: Outbox,
}

/// Result of binding a user to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// The connection is not registered; nothing changed.
    UnknownConnection,
    /// The connection was already bound to this user.
    Unchanged,
    /// The binding changed; carries the user it replaced, if any.
    Rebound { previous: Option<UserId> },
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh connection record with no bound user.
    pub fn register(&mut self, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            Connection {
                id,
                user_id: None,
                outbox,
            },
        );
        id
    }

    /// Bind `user_id` to the connection, overwriting any earlier binding.
    pub fn bind_user(&mut self, id: ConnectionId, user_id: UserId) -> Binding {
        let Some(connection) = self.connections.get_mut(&id) else {
            return Binding::UnknownConnection;
        };
        if connection.user_id.as_ref() == Some(&user_id) {
            return Binding::Unchanged;
        }
        let previous = connection.user_id.replace(user_id);
        Binding::Rebound { previous }
    }

    /// Remove the connection. Returns `None` if it was already gone.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn user_of(&self, id: ConnectionId) -> Option<&UserId> {
        self.connections.get(&id).and_then(|c| c.user_id.as_ref())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }
}
