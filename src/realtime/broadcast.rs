//! Event Broadcaster: scope fan-out plus the direct "assigned-to-me" path.
//!
//! Delivery is fire-and-forget. Each connection owns a bounded [`Outbox`];
//! a full or closed outbox drops the frame and the client is expected to
//! resync over REST after it reconnects.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::{DomainEvent, PresenceUpdate, ServerMessage};
use super::ids::ConnectionId;
use super::presence::PresenceTracker;
use super::registry::ConnectionRegistry;
use super::rooms::RoomMembership;

/// Sending half of a connection's outbound queue of serialized frames.
#[derive(Debug)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a frame. Returns `false` when the frame was dropped.
    pub fn deliver(&self, connection_id: ConnectionId, frame: &str) -> bool {
        match self.tx.try_send(frame.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %connection_id, "Outbox full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %connection_id, "Outbox closed, dropping frame");
                false
            }
        }
    }
}

/// What a single `publish` reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub scope_recipients: usize,
    pub direct_recipient: Option<ConnectionId>,
}

/// Borrowed view over hub state used to route one event.
pub struct Broadcaster<'a> {
    pub registry: &'a ConnectionRegistry,
    pub rooms: &'a RoomMembership,
    pub presence: &'a PresenceTracker,
}

impl Broadcaster<'_> {
    /// Fan the event out to every subscriber of its scope, then, for
    /// assignments, notify the assignee's anchor connection directly.
    pub fn publish(&self, event: &DomainEvent) -> Delivery {
        let mut delivery = Delivery::default();
        let scope = event.scope_id();

        if let Some(frame) = ServerMessage::from(event.clone()).to_json() {
            for connection_id in self.rooms.subscribers_of(scope) {
                if self.send_to(connection_id, &frame) {
                    delivery.scope_recipients += 1;
                }
            }
        }

        if let DomainEvent::TaskAssigned(assignment) = event {
            let anchor = self.presence.anchor_of(&assignment.assigned_user_id);
            let frame = ServerMessage::TaskAssignedToMe(assignment.clone()).to_json();
            if let (Some(connection_id), Some(frame)) = (anchor, frame)
                && self.send_to(connection_id, &frame)
            {
                delivery.direct_recipient = Some(connection_id);
            }
        }

        tracing::debug!(
            event = event.name(),
            scope_id = %scope,
            recipients = delivery.scope_recipients,
            direct = delivery.direct_recipient.is_some(),
            "Published domain event"
        );
        delivery
    }

    /// Send a presence transition to every live connection.
    pub fn announce(&self, update: &PresenceUpdate) -> usize {
        let Some(frame) = ServerMessage::UserPresence(update.clone()).to_json() else {
            return 0;
        };
        let delivered = self
            .registry
            .iter()
            .filter(|connection| connection.outbox.deliver(connection.id, &frame))
            .count();
        tracing::info!(
            user_id = %update.user_id,
            status = ?update.status,
            recipients = delivered,
            "Presence changed"
        );
        delivered
    }

    fn send_to(&self, connection_id: ConnectionId, frame: &str) -> bool {
        match self.registry.get(connection_id) {
            Some(connection) => connection.outbox.deliver(connection_id, frame),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::events::{Assignment, PresenceStatus, TaskRef};
    use crate::realtime::ids::{ScopeId, UserId};
    use crate::realtime::presence::PresenceMode;
    use serde_json::Map;

    #[test]
    fn test_full_outbox_drops_without_error() {
        let (outbox, mut rx) = Outbox::channel(1);
        let id = ConnectionId::new();
        assert!(outbox.deliver(id, "first"));
        assert!(!outbox.deliver(id, "second"));
        assert_eq!(rx.try_recv().unwrap(), "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_outbox_drops_without_error() {
        let (outbox, rx) = Outbox::channel(4);
        drop(rx);
        assert!(!outbox.deliver(ConnectionId::new(), "frame"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (outbox, mut rx) = Outbox::channel(0);
        assert!(outbox.deliver(ConnectionId::new(), "frame"));
        assert_eq!(rx.try_recv().unwrap(), "frame");
    }

    #[test]
    fn test_publish_reaches_scope_and_assignee() {
        let mut registry = ConnectionRegistry::new();
        let mut rooms = RoomMembership::new();
        let mut presence = PresenceTracker::new(PresenceMode::RefCount);

        let (outbox, mut rx) = Outbox::channel(8);
        let c = registry.register(outbox);
        rooms.join(c, ScopeId::from("team-7"));
        presence.attach(&UserId::from("bob"), c);

        let broadcaster = Broadcaster {
            registry: &registry,
            rooms: &rooms,
            presence: &presence,
        };
        let delivery = broadcaster.publish(&DomainEvent::TaskAssigned(Assignment {
            task_id: "t1".into(),
            team_id: ScopeId::from("team-7"),
            assigned_user_id: UserId::from("bob"),
            fields: Map::new(),
        }));

        assert_eq!(delivery.scope_recipients, 1);
        assert_eq!(delivery.direct_recipient, Some(c));
        assert!(rx.try_recv().unwrap().contains("\"task-assigned\""));
        assert!(rx.try_recv().unwrap().contains("\"task-assigned-to-me\""));
    }

    #[test]
    fn test_announce_reaches_everyone() {
        let mut registry = ConnectionRegistry::new();
        let rooms = RoomMembership::new();
        let presence = PresenceTracker::default();
        let (a, mut rx_a) = Outbox::channel(4);
        let (b, mut rx_b) = Outbox::channel(4);
        registry.register(a);
        registry.register(b);

        let broadcaster = Broadcaster {
            registry: &registry,
            rooms: &rooms,
            presence: &presence,
        };
        let sent = broadcaster.announce(&PresenceUpdate {
            user_id: UserId::from("alice"),
            status: PresenceStatus::Online,
        });
        assert_eq!(sent, 2);
        assert!(rx_a.try_recv().unwrap().contains("user-presence"));
        assert!(rx_b.try_recv().unwrap().contains("user-presence"));
    }

    #[test]
    fn test_publish_to_empty_scope_reaches_nobody() {
        let registry = ConnectionRegistry::new();
        let rooms = RoomMembership::new();
        let presence = PresenceTracker::default();
        let broadcaster = Broadcaster {
            registry: &registry,
            rooms: &rooms,
            presence: &presence,
        };
        let delivery = broadcaster.publish(&DomainEvent::TaskDeleted(TaskRef {
            id: "t1".into(),
            team_id: ScopeId::from("team-9"),
        }));
        assert_eq!(delivery, Delivery::default());
    }
}
