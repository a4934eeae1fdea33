//! `RealtimeHub`: the process-wide routing state.
//!
//! Registry, rooms and presence live behind one mutex so every operation
//! (connect, identify, join, leave, disconnect, broadcast) runs to completion
//! before the next one starts. No `.await` happens while the lock is held;
//! outbound frames are queued with `try_send`, so per-scope delivery order
//! equals call order.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::broadcast::{Broadcaster, Delivery, Outbox};
use super::events::DomainEvent;
use super::ids::{ConnectionId, ScopeId, UserId};
use super::presence::{PresenceMode, PresenceTracker};
use super::registry::{Binding, ConnectionRegistry};
use super::rooms::RoomMembership;

/// Default capacity of a connection's outbox.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct HubOptions {
    pub presence_mode: PresenceMode,
    pub outbox_capacity: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            presence_mode: PresenceMode::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct HubState {
    registry: ConnectionRegistry,
    rooms: RoomMembership,
    presence: PresenceTracker,
}

impl HubState {
    fn broadcaster(&self) -> Broadcaster<'_> {
        Broadcaster {
            registry: &self.registry,
            rooms: &self.rooms,
            presence: &self.presence,
        }
    }
}

#[derive(Debug)]
pub struct RealtimeHub {
    state: Mutex<HubState>,
    outbox_capacity: usize,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(HubOptions::default())
    }
}

impl RealtimeHub {
    pub fn new(options: HubOptions) -> Self {
        Self {
            state: Mutex::new(HubState {
                registry: ConnectionRegistry::new(),
                rooms: RoomMembership::new(),
                presence: PresenceTracker::new(options.presence_mode),
            }),
            outbox_capacity: options.outbox_capacity,
        }
    }

    // Every mutation completes under the guard, so a poisoned lock still
    // holds consistent routing state.
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection. The receiver yields the serialized frames
    /// queued for it and ends once the connection is removed.
    pub fn on_connect(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::channel(self.outbox_capacity);
        let id = self.lock().registry.register(outbox);
        tracing::debug!(connection_id = %id, "Connection registered");
        (id, rx)
    }

    /// Bind `user_id` to the connection and make it the user's presence anchor.
    pub fn identify(&self, connection_id: ConnectionId, user_id: UserId) {
        let mut guard = self.lock();
        let state = &mut *guard;

        let previous = match state.registry.bind_user(connection_id, user_id.clone()) {
            Binding::UnknownConnection => return,
            Binding::Unchanged => None,
            Binding::Rebound { previous } => previous,
        };

        let mut transitions = Vec::new();
        if let Some(previous) = previous {
            transitions.extend(state.presence.detach(&previous, connection_id));
        }
        transitions.extend(state.presence.attach(&user_id, connection_id));

        tracing::info!(connection_id = %connection_id, user_id = %user_id, "Connection identified");
        let broadcaster = state.broadcaster();
        for update in &transitions {
            broadcaster.announce(update);
        }
    }

    pub fn join(&self, connection_id: ConnectionId, scope_id: ScopeId) {
        let mut state = self.lock();
        if !state.registry.contains(connection_id) {
            return;
        }
        if state.rooms.join(connection_id, scope_id.clone()) {
            tracing::debug!(connection_id = %connection_id, scope_id = %scope_id, "Joined scope");
        }
    }

    pub fn leave(&self, connection_id: ConnectionId, scope_id: &ScopeId) {
        if self.lock().rooms.leave(connection_id, scope_id) {
            tracing::debug!(connection_id = %connection_id, scope_id = %scope_id, "Left scope");
        }
    }

    /// Remove the connection and all its memberships. Idempotent; returns
    /// `false` if the connection was already gone.
    pub fn on_disconnect(&self, connection_id: ConnectionId) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(connection) = state.registry.remove(connection_id) else {
            return false;
        };
        let scopes = state.rooms.remove_connection(connection_id);
        let transition = connection
            .user_id
            .as_ref()
            .and_then(|user| state.presence.detach(user, connection_id));

        tracing::debug!(
            connection_id = %connection_id,
            scopes = scopes.len(),
            "Connection unregistered"
        );
        if let Some(update) = transition {
            state.broadcaster().announce(&update);
        }
        true
    }

    /// Deliver the event to its scope (and the assignee, for assignments).
    pub fn broadcast(&self, event: &DomainEvent) -> Delivery {
        self.lock().broadcaster().publish(event)
    }

    pub fn subscribers_of(&self, scope_id: &ScopeId) -> HashSet<ConnectionId> {
        self.lock().rooms.subscribers_of(scope_id)
    }

    pub fn scopes_of(&self, connection_id: ConnectionId) -> HashSet<ScopeId> {
        self.lock().rooms.scopes_of(connection_id)
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.lock().registry.user_of(connection_id).cloned()
    }

    pub fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.lock().presence.connections_of(user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.lock().presence.online_users()
    }

    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.lock().registry.contains(connection_id)
    }

    pub fn presence_mode(&self) -> PresenceMode {
        self.lock().presence.mode()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().registry.len()
    }
}
