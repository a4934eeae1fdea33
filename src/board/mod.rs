//! Task board: persistence and REST API around the realtime core.
//!
//! ```text
//! REST request ─> api.rs ─> db.rs (SQLite, committed write)
//!                    │
//!                    └─> RealtimeHub::broadcast(DomainEvent) ─> team scope
//! ```
//!
//! The realtime core never reads or writes the database. Handlers publish
//! only after a write has committed.

pub mod api;
pub mod auth;
pub mod db;
pub mod models;
pub mod server;

pub use api::{AppState, SharedState};
pub use db::{BoardDb, DbHandle};
pub use server::{ServerConfig, build_router, start_server};
