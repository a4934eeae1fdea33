use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::{self, AuthUser, SessionStore};
use super::db::{BoardDb, DbHandle};
use super::models::*;
use crate::errors::BoardError;
use crate::realtime::events::{Assignment, CommentPayload};
use crate::realtime::{DomainEvent, RealtimeHub, RealtimeState, SocketSettings, UserId};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub realtime: RealtimeState,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the database and hub together. WebSocket session tokens are
    /// resolved against the same database.
    pub fn new(db: BoardDb, hub: Arc<RealtimeHub>, settings: SocketSettings) -> SharedState {
        let db = DbHandle::new(db);
        let sessions = Arc::new(SessionStore::new(db.clone()));
        Arc::new(Self {
            db,
            realtime: RealtimeState {
                hub,
                settings,
                sessions: Some(sessions),
            },
        })
    }

    /// Hand a committed mutation to the realtime hub.
    fn publish(&self, event: DomainEvent) {
        self.realtime.hub.broadcast(&event);
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

#[derive(Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    /// Absent leaves the due date alone; `null` clears it.
    #[serde(default, deserialize_with = "present_or_null")]
    pub due_date: Option<Option<String>>,
}

/// Distinguish an explicit `null` (`Some(None)`) from an absent field (`None`).
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTaskRequest {
    /// `null` or absent unassigns.
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub body: String,
}

#[derive(Serialize)]
pub struct PresenceResponse {
    pub online: Vec<UserId>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let message = err.to_string();
        match err {
            BoardError::NotFound { .. } => ApiError::NotFound(message),
            BoardError::NotTeamMember { .. } | BoardError::OwnerOnly { .. } => {
                ApiError::Forbidden(message)
            }
            BoardError::UsernameTaken { .. } => ApiError::Conflict(message),
            BoardError::InvalidCredentials | BoardError::Unauthorized => {
                ApiError::Unauthorized(message)
            }
            BoardError::BadRequest(_) => ApiError::BadRequest(message),
            BoardError::Database(e) => {
                tracing::error!(error = ?e, "Database error");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/teams", get(list_teams).post(create_team))
        .route("/api/teams/{id}", get(get_team))
        .route("/api/teams/{id}/members", post(add_member))
        .route("/api/teams/{id}/members/{user_id}", delete(remove_member))
        .route("/api/users/search/{query}", get(search_users))
        .route("/api/tasks", get(list_my_tasks))
        .route("/api/teams/{id}/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/assign", post(assign_task))
        .route(
            "/api/tasks/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route("/api/presence", get(presence))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn non_empty(value: &str, field: &str) -> Result<String, BoardError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn parse_field<T: FromStr<Err = String>>(value: Option<&str>) -> Result<Option<T>, BoardError> {
    value
        .map(|v| T::from_str(v).map_err(BoardError::BadRequest))
        .transpose()
}

/// The team and the caller's role in it.
fn require_member(
    db: &BoardDb,
    team_id: &str,
    user_id: &str,
) -> Result<(Team, MemberRole), BoardError> {
    let team = db
        .get_team(team_id)?
        .ok_or_else(|| BoardError::not_found("Team", team_id))?;
    let role = db
        .membership(team_id, user_id)?
        .ok_or_else(|| BoardError::NotTeamMember {
            team_id: team_id.to_string(),
        })?;
    Ok((team, role))
}

/// Load a task the caller may see.
fn member_task(db: &BoardDb, task_id: &str, user_id: &str) -> Result<Task, BoardError> {
    let task = db
        .get_task(task_id)?
        .ok_or_else(|| BoardError::not_found("Task", task_id))?;
    require_member(db, &task.team_id, user_id)?;
    Ok(task)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = non_empty(&req.username, "username")?;
    if req.password.is_empty() {
        return Err(BoardError::BadRequest("password must not be empty".into()).into());
    }
    let display_name = match req.display_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => username.clone(),
    };
    let password = req.password;

    let response = state
        .db
        .call(move |db| {
            if db.get_user_by_username(&username)?.is_some() {
                return Err(BoardError::UsernameTaken { username });
            }
            let salt = auth::new_salt();
            let hash = auth::hash_password(&password, &salt);
            let user = db.create_user(&username, &display_name, &hash, &salt)?;
            let token = db.create_session(&user.id)?;
            Ok(AuthResponse { user, token })
        })
        .await?;
    tracing::info!(user_id = %response.user.id, username = %response.user.username, "User registered");
    Ok((StatusCode::CREATED, Json(response)))
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .db
        .call(move |db| {
            let creds = db
                .credentials(req.username.trim())?
                .ok_or(BoardError::InvalidCredentials)?;
            if !auth::verify_password(&req.password, &creds.password_salt, &creds.password_hash) {
                return Err(BoardError::InvalidCredentials);
            }
            let token = db.create_session(&creds.user.id)?;
            Ok(AuthResponse {
                user: creds.user,
                token,
            })
        })
        .await?;
    Ok(Json(response))
}

async fn logout(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let token = auth.token;
    state
        .db
        .call(move |db| Ok(db.delete_session(&token)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(auth: AuthUser) -> Json<User> {
    Json(auth.user)
}

async fn list_teams(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth.user.id;
    let teams = state
        .db
        .call(move |db| Ok(db.list_teams_for_user(&user_id)?))
        .await?;
    Ok(Json(teams))
}

async fn create_team(
    State(state): State<SharedState>,
    auth: AuthUser,
    Json(req): Json<CreateTeamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = non_empty(&req.name, "name")?;
    let owner_id = auth.user.id;
    let team = state
        .db
        .call(move |db| Ok(db.create_team(&name, &owner_id)?))
        .await?;
    Ok((StatusCode::CREATED, Json(team)))
}

async fn get_team(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .db
        .call(move |db| {
            let (team, _) = require_member(db, &id, &auth.user.id)?;
            let members = db.team_members(&id)?;
            Ok(TeamDetail { team, members })
        })
        .await?;
    Ok(Json(detail))
}

async fn add_member(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = non_empty(&req.username, "username")?;
    let detail = state
        .db
        .call(move |db| {
            let (team, role) = require_member(db, &id, &auth.user.id)?;
            if role != MemberRole::Owner {
                return Err(BoardError::OwnerOnly {
                    action: "add members",
                });
            }
            let user = db
                .get_user_by_username(&username)?
                .ok_or_else(|| BoardError::not_found("User", username.as_str()))?;
            db.add_member(&id, &user.id, MemberRole::Member)?;
            let members = db.team_members(&id)?;
            Ok(TeamDetail { team, members })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn remove_member(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let removed_by = auth.user.id.clone();
    state
        .db
        .call(move |db| {
            let (team, role) = require_member(db, &id, &auth.user.id)?;
            if user_id != auth.user.id && role != MemberRole::Owner {
                return Err(BoardError::OwnerOnly {
                    action: "remove other members",
                });
            }
            if user_id == team.owner_id {
                return Err(BoardError::BadRequest(
                    "The team owner cannot be removed".into(),
                ));
            }
            if !db.remove_member(&id, &user_id)? {
                return Err(BoardError::not_found("Member", user_id.as_str()));
            }
            tracing::info!(team_id = %id, user_id = %user_id, removed_by = %removed_by, "Member removed");
            Ok(())
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// At most this many users per search.
const USER_SEARCH_LIMIT: usize = 10;

async fn search_users(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(query): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let query = non_empty(&query, "query")?;
    let users = state
        .db
        .call(move |db| Ok(db.search_users(&query, USER_SEARCH_LIMIT)?))
        .await?;
    Ok(Json(users))
}

/// Tasks assigned to the caller in any team.
async fn list_my_tasks(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth.user.id;
    let tasks = state
        .db
        .call(move |db| Ok(db.list_assigned_tasks(&user_id)?))
        .await?;
    Ok(Json(tasks))
}

async fn list_tasks(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .db
        .call(move |db| {
            require_member(db, &team_id, &auth.user.id)?;
            Ok(db.list_tasks(&team_id)?)
        })
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new_task = NewTask {
        title: non_empty(&req.title, "title")?,
        description: req.description.unwrap_or_default(),
        status: parse_field(req.status.as_deref())?.unwrap_or(TaskStatus::Todo),
        priority: parse_field(req.priority.as_deref())?.unwrap_or(Priority::Medium),
        due_date: req.due_date,
    };
    let task = state
        .db
        .call(move |db| {
            require_member(db, &team_id, &auth.user.id)?;
            Ok(db.create_task(&team_id, &auth.user.id, &new_task)?)
        })
        .await?;
    state.publish(DomainEvent::TaskCreated(task.to_payload()));
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .db
        .call(move |db| {
            let task = member_task(db, &id, &auth.user.id)?;
            let comments = db.list_comments(&id)?;
            Ok(TaskDetail { task, comments })
        })
        .await?;
    Ok(Json(detail))
}

async fn update_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = TaskUpdate {
        title: req
            .title
            .as_deref()
            .map(|t| non_empty(t, "title"))
            .transpose()?,
        description: req.description,
        status: parse_field(req.status.as_deref())?,
        priority: parse_field(req.priority.as_deref())?,
        due_date: req.due_date,
    };
    if update.is_empty() {
        return Err(ApiError::BadRequest("No fields to update".into()));
    }
    let task = state
        .db
        .call(move |db| {
            member_task(db, &id, &auth.user.id)?;
            Ok(db.update_task(&id, &update)?)
        })
        .await?;
    state.publish(DomainEvent::TaskUpdated(task.to_payload()));
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| {
            let task = member_task(db, &id, &auth.user.id)?;
            db.delete_task(&id)?;
            Ok(task)
        })
        .await?;
    state.publish(DomainEvent::TaskDeleted(task.to_ref()));
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<AssignTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let assigned_by = auth.user.id.clone();
    let assignee = req.user_id;
    let task = state
        .db
        .call(move |db| {
            let task = member_task(db, &id, &auth.user.id)?;
            if let Some(user_id) = &assignee
                && db.membership(&task.team_id, user_id)?.is_none()
            {
                return Err(BoardError::BadRequest(format!(
                    "User {} is not a member of this team",
                    user_id
                )));
            }
            Ok(db.assign_task(&id, assignee.as_deref())?)
        })
        .await?;

    let payload = task.to_payload();
    if let Some(user_id) = &task.assigned_to {
        let mut fields = payload.fields.clone();
        fields.insert("assignedBy".to_string(), json!(assigned_by));
        state.publish(DomainEvent::TaskAssigned(Assignment {
            task_id: task.id.clone(),
            team_id: task.scope_id(),
            assigned_user_id: UserId::from(user_id.as_str()),
            fields,
        }));
    }
    state.publish(DomainEvent::TaskUpdated(payload));
    Ok(Json(task))
}

async fn list_comments(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let comments = state
        .db
        .call(move |db| {
            member_task(db, &id, &auth.user.id)?;
            Ok(db.list_comments(&id)?)
        })
        .await?;
    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let body = non_empty(&req.body, "body")?;
    let (task, comment) = state
        .db
        .call(move |db| {
            let task = member_task(db, &id, &auth.user.id)?;
            let comment = db.add_comment(&id, &auth.user.id, &body)?;
            Ok((task, comment))
        })
        .await?;
    let comment_json =
        serde_json::to_value(&comment).map_err(|e| ApiError::Internal(e.to_string()))?;
    state.publish(DomainEvent::CommentAdded(CommentPayload {
        task_id: task.id.clone(),
        team_id: task.scope_id(),
        comment: comment_json,
    }));
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn presence(State(state): State<SharedState>, _auth: AuthUser) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        online: state.realtime.hub.online_users(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────
