use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::models::*;
use crate::errors::BoardError;

/// Session lifetime.
pub const SESSION_TTL_DAYS: i64 = 30;

/// Async-safe handle to the board database.
///
/// Runs every access on tokio's blocking pool so synchronous SQLite I/O
/// never stalls async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, BoardError>
    where
        F: FnOnce(&BoardDb) -> Result<R, BoardError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct BoardDb {
    conn: Connection,
}

const USER_COLUMNS: &str = "id, username, display_name, created_at";
const TASK_COLUMNS: &str = "id, team_id, title, description, status, priority, assigned_to, due_date, created_by, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn team_from_row(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        team_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        assigned_to: row.get(6)?,
        due_date: row.get(7)?,
        created_by: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        task_id: row.get(1)?,
        author_id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Escape LIKE wildcards so `query` matches literally.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Stored password material for a user.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: User,
    pub password_hash: String,
    pub password_salt: String,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    username TEXT NOT NULL UNIQUE,
                    display_name TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    password_salt TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    expires_at INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS teams (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    owner_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS team_members (
                    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL DEFAULT 'member',
                    joined_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (team_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'todo',
                    priority TEXT NOT NULL DEFAULT 'medium',
                    assigned_to TEXT REFERENCES users(id) ON DELETE SET NULL,
                    due_date TEXT,
                    created_by TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id TEXT PRIMARY KEY,
                    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    author_id TEXT NOT NULL REFERENCES users(id),
                    body TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_members_user ON team_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_team ON tasks(team_id);
                CREATE INDEX IF NOT EXISTS idx_comments_task ON comments(task_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users & sessions ──────────────────────────────────────────────

    pub fn create_user(
        &self,
        username: &str,
        display_name: &str,
        password_hash: &str,
        password_salt: &str,
    ) -> Result<User> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO users (id, username, display_name, password_hash, password_salt)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, username, display_name, password_hash, password_salt],
            )
            .context("Failed to insert user")?;
        self.get_user(&id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()
            .context("Failed to query user by username")
    }

    /// Users whose username or display name contains `query`, case-insensitively.
    pub fn search_users(&self, query: &str, limit: usize) -> Result<Vec<User>> {
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE username LIKE ?1 ESCAPE '\\' OR display_name LIKE ?1 ESCAPE '\\'
                 ORDER BY username LIMIT ?2"
            ))
            .context("Failed to prepare search_users")?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], user_from_row)
            .context("Failed to search users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?);
        }
        Ok(users)
    }

    pub fn credentials(&self, username: &str) -> Result<Option<Credentials>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS}, password_hash, password_salt FROM users WHERE username = ?1"
                ),
                params![username],
                |row| {
                    Ok(Credentials {
                        user: user_from_row(row)?,
                        password_hash: row.get(4)?,
                        password_salt: row.get(5)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credentials")
    }

    /// Create a session for `user_id` and return its token.
    pub fn create_session(&self, user_id: &str) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let expires_at = (chrono::Utc::now() + chrono::Duration::days(SESSION_TTL_DAYS)).timestamp();
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token, user_id, expires_at],
            )
            .context("Failed to insert session")?;
        Ok(token)
    }

    /// The user behind an unexpired session token.
    pub fn session_user(&self, token: &str) -> Result<Option<User>> {
        let now = chrono::Utc::now().timestamp();
        self.conn
            .query_row(
                "SELECT u.id, u.username, u.display_name, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1 AND s.expires_at > ?2",
                params![token, now],
                user_from_row,
            )
            .optional()
            .context("Failed to query session")
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    /// Remove expired sessions. Returns how many were deleted.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        self.conn
            .execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])
            .context("Failed to purge sessions")
    }

    // ── Teams ─────────────────────────────────────────────────────────

    /// Create a team with `owner_id` as its owner member.
    pub fn create_team(&self, name: &str, owner_id: &str) -> Result<Team> {
        let id = Uuid::new_v4().to_string();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO teams (id, name, owner_id) VALUES (?1, ?2, ?3)",
            params![id, name, owner_id],
        )
        .context("Failed to insert team")?;
        tx.execute(
            "INSERT INTO team_members (team_id, user_id, role) VALUES (?1, ?2, ?3)",
            params![id, owner_id, MemberRole::Owner.as_str()],
        )
        .context("Failed to insert owner membership")?;
        tx.commit().context("Failed to commit team creation")?;
        self.get_team(&id)?.context("Team not found after insert")
    }

    pub fn get_team(&self, id: &str) -> Result<Option<Team>> {
        self.conn
            .query_row(
                "SELECT id, name, owner_id, created_at FROM teams WHERE id = ?1",
                params![id],
                team_from_row,
            )
            .optional()
            .context("Failed to query team")
    }

    pub fn list_teams_for_user(&self, user_id: &str) -> Result<Vec<Team>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.id, t.name, t.owner_id, t.created_at
                 FROM teams t JOIN team_members m ON m.team_id = t.id
                 WHERE m.user_id = ?1 ORDER BY t.created_at, t.name",
            )
            .context("Failed to prepare list_teams_for_user")?;
        let rows = stmt
            .query_map(params![user_id], team_from_row)
            .context("Failed to query teams")?;
        let mut teams = Vec::new();
        for row in rows {
            teams.push(row.context("Failed to read team row")?);
        }
        Ok(teams)
    }

    pub fn team_members(&self, team_id: &str) -> Result<Vec<TeamMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.username, u.display_name, m.role
                 FROM team_members m JOIN users u ON u.id = m.user_id
                 WHERE m.team_id = ?1 ORDER BY m.joined_at, u.username",
            )
            .context("Failed to prepare team_members")?;
        let rows = stmt
            .query_map(params![team_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("Failed to query team members")?;
        let mut members = Vec::new();
        for row in rows {
            let (user_id, username, display_name, role) =
                row.context("Failed to read member row")?;
            members.push(TeamMember {
                user_id,
                username,
                display_name,
                role: role.parse().map_err(anyhow::Error::msg)?,
            });
        }
        Ok(members)
    }

    pub fn membership(&self, team_id: &str, user_id: &str) -> Result<Option<MemberRole>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM team_members WHERE team_id = ?1 AND user_id = ?2",
                params![team_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query membership")?;
        role.map(|r| r.parse::<MemberRole>().map_err(anyhow::Error::msg))
            .transpose()
    }

    /// Add a member. Returns false if they already belong to the team.
    pub fn add_member(&self, team_id: &str, user_id: &str, role: MemberRole) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO team_members (team_id, user_id, role) VALUES (?1, ?2, ?3)",
                params![team_id, user_id, role.as_str()],
            )
            .context("Failed to insert member")?;
        Ok(count > 0)
    }

    /// Remove a member and unassign their tasks in the team. Returns false
    /// if they were not a member.
    pub fn remove_member(&self, team_id: &str, user_id: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let count = tx
            .execute(
                "DELETE FROM team_members WHERE team_id = ?1 AND user_id = ?2",
                params![team_id, user_id],
            )
            .context("Failed to delete member")?;
        if count > 0 {
            tx.execute(
                "UPDATE tasks SET assigned_to = NULL, updated_at = datetime('now')
                 WHERE team_id = ?1 AND assigned_to = ?2",
                params![team_id, user_id],
            )
            .context("Failed to unassign member's tasks")?;
        }
        tx.commit().context("Failed to commit member removal")?;
        Ok(count > 0)
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn create_task(&self, team_id: &str, created_by: &str, task: &NewTask) -> Result<Task> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO tasks (id, team_id, title, description, status, priority, due_date, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    team_id,
                    task.title,
                    task.description,
                    task.status.as_str(),
                    task.priority.as_str(),
                    task.due_date,
                    created_by
                ],
            )
            .context("Failed to insert task")?;
        self.get_task(&id)?.context("Task not found after insert")
    }

    pub fn list_tasks(&self, team_id: &str) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE team_id = ?1 ORDER BY created_at, id"
            ))
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![team_id], task_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.context("Failed to read task row")?.into_task()?);
        }
        Ok(tasks)
    }

    /// Tasks assigned to `user_id` across all teams, newest first.
    pub fn list_assigned_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE assigned_to = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ))
            .context("Failed to prepare list_assigned_tasks")?;
        let rows = stmt
            .query_map(params![user_id], task_row)
            .context("Failed to query assigned tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.context("Failed to read task row")?.into_task()?);
        }
        Ok(tasks)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                task_row,
            )
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    pub fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Task> {
        // Single-connection access is guaranteed by DbHandle's mutex.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if let Some(title) = &update.title {
            tx.execute(
                "UPDATE tasks SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![title, id],
            )
            .context("Failed to update task title")?;
        }
        if let Some(description) = &update.description {
            tx.execute(
                "UPDATE tasks SET description = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![description, id],
            )
            .context("Failed to update task description")?;
        }
        if let Some(status) = update.status {
            tx.execute(
                "UPDATE tasks SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), id],
            )
            .context("Failed to update task status")?;
        }
        if let Some(priority) = update.priority {
            tx.execute(
                "UPDATE tasks SET priority = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![priority.as_str(), id],
            )
            .context("Failed to update task priority")?;
        }
        if let Some(due_date) = &update.due_date {
            tx.execute(
                "UPDATE tasks SET due_date = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![due_date, id],
            )
            .context("Failed to update task due date")?;
        }

        tx.commit().context("Failed to commit task update")?;
        self.get_task(id)?.context("Task not found after update")
    }

    /// Set or clear the assignee.
    pub fn assign_task(&self, id: &str, assignee: Option<&str>) -> Result<Task> {
        self.conn
            .execute(
                "UPDATE tasks SET assigned_to = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![assignee, id],
            )
            .context("Failed to assign task")?;
        self.get_task(id)?.context("Task not found after assign")
    }

    pub fn delete_task(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(count > 0)
    }

    // ── Comments ──────────────────────────────────────────────────────

    pub fn add_comment(&self, task_id: &str, author_id: &str, body: &str) -> Result<Comment> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO comments (id, task_id, author_id, body) VALUES (?1, ?2, ?3, ?4)",
                params![id, task_id, author_id, body],
            )
            .context("Failed to insert comment")?;
        self.conn
            .query_row(
                "SELECT id, task_id, author_id, body, created_at FROM comments WHERE id = ?1",
                params![id],
                comment_from_row,
            )
            .context("Comment not found after insert")
    }

    pub fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, task_id, author_id, body, created_at
                 FROM comments WHERE task_id = ?1 ORDER BY created_at, rowid",
            )
            .context("Failed to prepare list_comments")?;
        let rows = stmt
            .query_map(params![task_id], comment_from_row)
            .context("Failed to query comments")?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row.context("Failed to read comment row")?);
        }
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_user(username: &str) -> (BoardDb, User) {
        let db = BoardDb::new_in_memory().unwrap();
        let user = db.create_user(username, username, "hash", "salt").unwrap();
        (db, user)
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            due_date: None,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = BoardDb::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        db.run_migrations().unwrap();
    }

    #[test]
    fn test_new_creates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("board.db");
        BoardDb::new(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_user_lookup_and_duplicate_username() {
        let (db, alice) = db_with_user("alice");
        assert_eq!(db.get_user(&alice.id).unwrap(), Some(alice.clone()));
        assert_eq!(db.get_user_by_username("alice").unwrap(), Some(alice.clone()));
        assert_eq!(db.get_user_by_username("bob").unwrap(), None);

        let creds = db.credentials("alice").unwrap().unwrap();
        assert_eq!(creds.password_hash, "hash");
        assert_eq!(creds.password_salt, "salt");

        assert!(db.create_user("alice", "Alice Again", "h", "s").is_err());
    }

    #[test]
    fn test_sessions_round_trip_and_delete() {
        let (db, alice) = db_with_user("alice");
        let token = db.create_session(&alice.id).unwrap();
        assert_eq!(db.session_user(&token).unwrap(), Some(alice));
        assert!(db.delete_session(&token).unwrap());
        assert!(!db.delete_session(&token).unwrap());
        assert_eq!(db.session_user(&token).unwrap(), None);
    }

    #[test]
    fn test_expired_sessions_are_ignored_and_purged() {
        let (db, alice) = db_with_user("alice");
        db.conn
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at) VALUES ('old', ?1, 0)",
                params![alice.id],
            )
            .unwrap();
        assert_eq!(db.session_user("old").unwrap(), None);
        assert_eq!(db.purge_expired_sessions().unwrap(), 1);
    }

    #[test]
    fn test_team_creation_makes_owner_member() {
        let (db, alice) = db_with_user("alice");
        let team = db.create_team("Platform", &alice.id).unwrap();
        assert_eq!(team.owner_id, alice.id);
        assert_eq!(
            db.membership(&team.id, &alice.id).unwrap(),
            Some(MemberRole::Owner)
        );
        assert_eq!(db.list_teams_for_user(&alice.id).unwrap(), vec![team.clone()]);

        let bob = db.create_user("bob", "Bob", "h", "s").unwrap();
        assert_eq!(db.membership(&team.id, &bob.id).unwrap(), None);
        assert!(db.add_member(&team.id, &bob.id, MemberRole::Member).unwrap());
        assert!(!db.add_member(&team.id, &bob.id, MemberRole::Member).unwrap());

        let members = db.team_members(&team.id).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().any(|m| m.username == "bob" && m.role == MemberRole::Member));
    }

    #[test]
    fn test_search_users_matches_name_fragments() {
        let (db, _) = db_with_user("alice");
        db.create_user("bob", "Bob Alison", "h", "s").unwrap();
        db.create_user("carol", "Carol", "h", "s").unwrap();
        db.create_user("under_score", "Under Score", "h", "s").unwrap();

        let found: Vec<String> = db
            .search_users("ALI", 10)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(found, vec!["alice", "bob"]);

        let found = db.search_users("_", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "under_score");
        assert!(db.search_users("%", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_users_respects_limit() {
        let db = BoardDb::new_in_memory().unwrap();
        for i in 0..12 {
            db.create_user(&format!("user{:02}", i), "User", "h", "s").unwrap();
        }
        assert_eq!(db.search_users("user", 10).unwrap().len(), 10);
    }

    #[test]
    fn test_remove_member_unassigns_their_tasks() {
        let (db, alice) = db_with_user("alice");
        let bob = db.create_user("bob", "Bob", "h", "s").unwrap();
        let team = db.create_team("Platform", &alice.id).unwrap();
        db.add_member(&team.id, &bob.id, MemberRole::Member).unwrap();
        let task = db.create_task(&team.id, &alice.id, &new_task("Review")).unwrap();
        db.assign_task(&task.id, Some(&bob.id)).unwrap();

        assert!(db.remove_member(&team.id, &bob.id).unwrap());
        assert!(!db.remove_member(&team.id, &bob.id).unwrap());
        assert_eq!(db.membership(&team.id, &bob.id).unwrap(), None);
        assert_eq!(db.get_task(&task.id).unwrap().unwrap().assigned_to, None);
        assert!(db.list_teams_for_user(&bob.id).unwrap().is_empty());
    }

    #[test]
    fn test_list_assigned_tasks_spans_teams() {
        let (db, alice) = db_with_user("alice");
        let bob = db.create_user("bob", "Bob", "h", "s").unwrap();
        let first = db.create_team("Platform", &alice.id).unwrap();
        let second = db.create_team("Infra", &alice.id).unwrap();

        let a = db.create_task(&first.id, &alice.id, &new_task("A")).unwrap();
        let b = db.create_task(&second.id, &alice.id, &new_task("B")).unwrap();
        let c = db.create_task(&second.id, &alice.id, &new_task("C")).unwrap();
        db.assign_task(&a.id, Some(&alice.id)).unwrap();
        db.assign_task(&b.id, Some(&alice.id)).unwrap();
        db.assign_task(&c.id, Some(&bob.id)).unwrap();

        let titles: Vec<String> = db
            .list_assigned_tasks(&alice.id)
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["B", "A"]);
        assert_eq!(db.list_assigned_tasks(&bob.id).unwrap().len(), 1);
    }

    #[test]
    fn test_update_can_clear_due_date() {
        let (db, alice) = db_with_user("alice");
        let team = db.create_team("Platform", &alice.id).unwrap();
        let task = db
            .create_task(
                &team.id,
                &alice.id,
                &NewTask {
                    due_date: Some("2026-11-01".into()),
                    ..new_task("Release")
                },
            )
            .unwrap();
        assert_eq!(task.due_date.as_deref(), Some("2026-11-01"));

        let cleared = db
            .update_task(
                &task.id,
                &TaskUpdate {
                    due_date: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.due_date, None);
    }

    #[test]
    fn test_task_crud() {
        let (db, alice) = db_with_user("alice");
        let team = db.create_team("Platform", &alice.id).unwrap();

        let task = db.create_task(&team.id, &alice.id, &new_task("Ship it")).unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.created_by, alice.id);
        assert_eq!(db.list_tasks(&team.id).unwrap().len(), 1);

        let updated = db
            .update_task(
                &task.id,
                &TaskUpdate {
                    title: Some("Ship it today".into()),
                    status: Some(TaskStatus::Done),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "Ship it today");
        assert_eq!(updated.status, TaskStatus::Done);
        assert_eq!(updated.priority, Priority::Medium);

        let assigned = db.assign_task(&task.id, Some(&alice.id)).unwrap();
        assert_eq!(assigned.assigned_to.as_deref(), Some(alice.id.as_str()));
        let unassigned = db.assign_task(&task.id, None).unwrap();
        assert_eq!(unassigned.assigned_to, None);

        assert!(db.delete_task(&task.id).unwrap());
        assert!(!db.delete_task(&task.id).unwrap());
        assert_eq!(db.get_task(&task.id).unwrap(), None);
    }

    #[test]
    fn test_comments_follow_task_lifetime() {
        let (db, alice) = db_with_user("alice");
        let team = db.create_team("Platform", &alice.id).unwrap();
        let task = db.create_task(&team.id, &alice.id, &new_task("Review")).unwrap();

        let first = db.add_comment(&task.id, &alice.id, "first").unwrap();
        db.add_comment(&task.id, &alice.id, "second").unwrap();
        let comments = db.list_comments(&task.id).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0], first);
        assert_eq!(comments[1].body, "second");

        db.delete_task(&task.id).unwrap();
        assert!(db.list_comments(&task.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_db_handle_maps_errors() {
        let handle = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let result: Result<(), BoardError> = handle
            .call(|_| Err(BoardError::not_found("Task", "missing")))
            .await;
        assert!(matches!(result, Err(BoardError::NotFound { .. })));

        let user = handle
            .call(|db| Ok(db.create_user("carol", "Carol", "h", "s")?))
            .await
            .unwrap();
        assert_eq!(user.username, "carol");
    }
}
