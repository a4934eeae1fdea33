//! Wire-level message shapes.
//!
//! Every WebSocket text frame is a JSON envelope `{"event": "<name>", "data": {...}}`.
//! Payload fields are camelCase. Task payloads carry `id` + `teamId` and keep
//! any further task fields verbatim, so the realtime layer never needs to know
//! the task schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::{ScopeId, UserId};

/// Event names as they appear in the `event` field of the envelope.
pub mod names {
    pub const IDENTIFY: &str = "identify";
    pub const JOIN_TEAM: &str = "join-team";
    pub const LEAVE_TEAM: &str = "leave-team";
    pub const TASK_CREATED: &str = "task-created";
    pub const TASK_UPDATED: &str = "task-updated";
    pub const TASK_DELETED: &str = "task-deleted";
    pub const TASK_ASSIGNED: &str = "task-assigned";
    pub const TASK_ASSIGNED_TO_ME: &str = "task-assigned-to-me";
    pub const COMMENT_ADDED: &str = "comment-added";
    pub const USER_PRESENCE: &str = "user-presence";
}

// ── Payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub id: String,
    pub team_id: ScopeId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub id: String,
    pub team_id: ScopeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub task_id: String,
    pub team_id: ScopeId,
    pub assigned_user_id: UserId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPayload {
    pub task_id: String,
    pub team_id: ScopeId,
    pub comment: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

// ── Domain events ────────────────────────────────────────────────────

/// A committed mutation worth telling a scope about. Transient: forwarded, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum DomainEvent {
    TaskCreated(TaskPayload),
    TaskUpdated(TaskPayload),
    TaskDeleted(TaskRef),
    TaskAssigned(Assignment),
    CommentAdded(CommentPayload),
}

impl DomainEvent {
    pub fn scope_id(&self) -> &ScopeId {
        match self {
            Self::TaskCreated(task) | Self::TaskUpdated(task) => &task.team_id,
            Self::TaskDeleted(task) => &task.team_id,
            Self::TaskAssigned(assignment) => &assignment.team_id,
            Self::CommentAdded(comment) => &comment.team_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskCreated(_) => names::TASK_CREATED,
            Self::TaskUpdated(_) => names::TASK_UPDATED,
            Self::TaskDeleted(_) => names::TASK_DELETED,
            Self::TaskAssigned(_) => names::TASK_ASSIGNED,
            Self::CommentAdded(_) => names::COMMENT_ADDED,
        }
    }
}

// ── Inbound (client → server) ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Identify {
        user_id: UserId,
    },
    JoinTeam {
        #[serde(alias = "teamId")]
        scope_id: ScopeId,
    },
    LeaveTeam {
        #[serde(alias = "teamId")]
        scope_id: ScopeId,
    },
    TaskCreated(TaskPayload),
    TaskUpdated(TaskPayload),
    TaskDeleted(TaskRef),
    TaskAssigned(Assignment),
    CommentAdded(CommentPayload),
}

impl ClientMessage {
    /// Parse one inbound text frame. Anything that is not a well-formed,
    /// known envelope yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed client frame");
                None
            }
        }
    }

    /// The domain event carried by a peer-relayed message, if any.
    pub fn into_domain_event(self) -> Option<DomainEvent> {
        match self {
            Self::TaskCreated(task) => Some(DomainEvent::TaskCreated(task)),
            Self::TaskUpdated(task) => Some(DomainEvent::TaskUpdated(task)),
            Self::TaskDeleted(task) => Some(DomainEvent::TaskDeleted(task)),
            Self::TaskAssigned(assignment) => Some(DomainEvent::TaskAssigned(assignment)),
            Self::CommentAdded(comment) => Some(DomainEvent::CommentAdded(comment)),
            Self::Identify { .. } | Self::JoinTeam { .. } | Self::LeaveTeam { .. } => None,
        }
    }
}

// ── Outbound (server → client) ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    TaskCreated(TaskPayload),
    TaskUpdated(TaskPayload),
    TaskDeleted(TaskRef),
    TaskAssigned(Assignment),
    TaskAssignedToMe(Assignment),
    CommentAdded(CommentPayload),
    UserPresence(PresenceUpdate),
}

impl From<DomainEvent> for ServerMessage {
    fn from(event: DomainEvent) -> Self {
        match event {
            DomainEvent::TaskCreated(task) => Self::TaskCreated(task),
            DomainEvent::TaskUpdated(task) => Self::TaskUpdated(task),
            DomainEvent::TaskDeleted(task) => Self::TaskDeleted(task),
            DomainEvent::TaskAssigned(assignment) => Self::TaskAssigned(assignment),
            DomainEvent::CommentAdded(comment) => Self::CommentAdded(comment),
        }
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server message");
                None
            }
        }
    }
}

/// Untyped view of an envelope, used by clients that dispatch on event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}
