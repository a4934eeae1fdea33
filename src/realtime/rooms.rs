//! Room Membership Manager: the connection ↔ scope relation.
//!
//! Both directions are indexed so that fan-out (`subscribers_of`) and
//! disconnect cleanup (`remove_connection`) are lookups rather than scans.
//! No authorization happens here; callers hand over already-vetted scope ids.

use std::collections::{HashMap, HashSet};

use super::ids::{ConnectionId, ScopeId};

#[derive(Debug, Default)]
pub struct RoomMembership {
    by_scope: HashMap<ScopeId, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, HashSet<ScopeId>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the membership is new.
    pub fn join(&mut self, connection: ConnectionId, scope: ScopeId) -> bool {
        let added = self
            .by_connection
            .entry(connection)
            .or_default()
            .insert(scope.clone());
        self.by_scope.entry(scope).or_default().insert(connection);
        added
    }

    /// Returns `true` if a membership was removed.
    pub fn leave(&mut self, connection: ConnectionId, scope: &ScopeId) -> bool {
        let removed = match self.by_connection.get_mut(&connection) {
            Some(scopes) => {
                let removed = scopes.remove(scope);
                if scopes.is_empty() {
                    self.by_connection.remove(&connection);
                }
                removed
            }
            None => false,
        };
        if let Some(members) = self.by_scope.get_mut(scope) {
            members.remove(&connection);
            if members.is_empty() {
                self.by_scope.remove(scope);
            }
        }
        removed
    }

    /// Drop every membership of the connection. Returns the scopes it left.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<ScopeId> {
        let Some(scopes) = self.by_connection.remove(&connection) else {
            return Vec::new();
        };
        for scope in &scopes {
            if let Some(members) = self.by_scope.get_mut(scope) {
                members.remove(&connection);
                if members.is_empty() {
                    self.by_scope.remove(scope);
                }
            }
        }
        scopes.into_iter().collect()
    }

    /// Empty for unknown or empty scopes.
    pub fn subscribers_of(&self, scope: &ScopeId) -> HashSet<ConnectionId> {
        self.by_scope.get(scope).cloned().unwrap_or_default()
    }

    pub fn scopes_of(&self, connection: ConnectionId) -> HashSet<ScopeId> {
        self.by_connection
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn scope_count(&self) -> usize {
        self.by_scope.len()
    }
}
