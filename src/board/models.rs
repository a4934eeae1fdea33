use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::realtime::events::{TaskPayload, TaskRef};
use crate::realtime::ids::ScopeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
        }
    }
}

impl FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "member" => Ok(Self::Member),
            _ => Err(format!("Invalid member role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub role: MemberRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDetail {
    #[serde(flatten)]
    pub team: Team,
    pub members: Vec<TeamMember>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub team_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    /// Realtime payload: `id` and `teamId` plus every other task field.
    pub fn to_payload(&self) -> TaskPayload {
        let mut fields = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        fields.remove("id");
        fields.remove("teamId");
        TaskPayload {
            id: self.id.clone(),
            team_id: self.scope_id(),
            fields,
        }
    }

    pub fn to_ref(&self) -> TaskRef {
        TaskRef {
            id: self.id.clone(),
            team_id: self.scope_id(),
        }
    }

    /// The realtime scope a task's events are published to: its team.
    pub fn scope_id(&self) -> ScopeId {
        ScopeId::from(self.team_id.as_str())
    }
}

/// Raw task row before enum columns are parsed.
#[derive(Debug)]
pub struct TaskRow {
    pub id: String,
    pub team_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    pub fn into_task(self) -> anyhow::Result<Task> {
        Ok(Task {
            status: TaskStatus::from_str(&self.status).map_err(anyhow::Error::msg)?,
            priority: Priority::from_str(&self.priority).map_err(anyhow::Error::msg)?,
            id: self.id,
            team_id: self.team_id,
            title: self.title,
            description: self.description,
            assigned_to: self.assigned_to,
            due_date: self.due_date,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: String,
}

/// Fields for a new task. Enum fields are already validated.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<String>,
}

/// Partial task update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    /// `Some(None)` clears the due date.
    pub due_date: Option<Option<String>>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            id: "t1".into(),
            team_id: "team-a".into(),
            title: "Write docs".into(),
            description: String::new(),
            status: TaskStatus::InProgress,
            priority: Priority::High,
            assigned_to: None,
            due_date: Some("2026-11-01".into()),
            created_by: "u1".into(),
            created_at: "2026-10-01 10:00:00".into(),
            updated_at: "2026-10-01 10:00:00".into(),
        }
    }

    #[test]
    fn test_enums_parse_their_own_strings() {
        for status in [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Ok(status));
        }
        for priority in [Priority::Low, Priority::Medium, Priority::High] {
            assert_eq!(Priority::from_str(priority.as_str()), Ok(priority));
        }
        assert!(TaskStatus::from_str("blocked").is_err());
        assert!(Priority::from_str("critical").is_err());
        assert_eq!(MemberRole::from_str("owner"), Ok(MemberRole::Owner));
    }

    #[test]
    fn test_task_serializes_camel_case() {
        let json = serde_json::to_value(sample_task()).unwrap();
        assert_eq!(json["teamId"], "team-a");
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["dueDate"], "2026-11-01");
        assert!(json["assignedTo"].is_null());
    }

    #[test]
    fn test_task_payload_keeps_fields_outside_id_and_team() {
        let payload = sample_task().to_payload();
        assert_eq!(payload.id, "t1");
        assert_eq!(payload.team_id, ScopeId::from("team-a"));
        assert!(!payload.fields.contains_key("id"));
        assert!(!payload.fields.contains_key("teamId"));
        assert_eq!(payload.fields["title"], "Write docs");
        assert_eq!(payload.fields["priority"], "high");

        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire["id"], "t1");
        assert_eq!(wire["teamId"], "team-a");
        assert_eq!(wire["title"], "Write docs");
    }

    #[test]
    fn test_task_row_rejects_unknown_status() {
        let row = TaskRow {
            id: "t1".into(),
            team_id: "team-a".into(),
            title: "x".into(),
            description: String::new(),
            status: "archived".into(),
            priority: "low".into(),
            assigned_to: None,
            due_date: None,
            created_by: "u1".into(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(row.into_task().is_err());
    }

    #[test]
    fn test_task_update_is_empty() {
        assert!(TaskUpdate::default().is_empty());
        let update = TaskUpdate {
            status: Some(TaskStatus::Done),
            ..Default::default()
        };
        assert!(!update.is_empty());
        let clear_due = TaskUpdate {
            due_date: Some(None),
            ..Default::default()
        };
        assert!(!clear_due.is_empty());
    }
}
