//! Realtime core: room-scoped event distribution over WebSocket.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐ WebSocket ┌──────────────────────────────────────────────┐
//! │  Client  │ ────────> │  ws.rs  (socket loop, inbound dispatch)      │
//! │  (Sync   │ <──────── │     │                                        │
//! │  Agent)  │           │     v                                        │
//! └──────────┘           │  hub.rs  RealtimeHub (one mutex)             │
//!                        │     ├─ registry.rs   connections + user bind │
//!                        │     ├─ rooms.rs      connection ↔ scope      │
//!                        │     ├─ presence.rs   online/offline          │
//!                        │     └─ broadcast.rs  fan-out + outboxes      │
//!                        └──────────────────────────────────────────────┘
//!        REST handlers ──── hub.broadcast(DomainEvent) after a committed write
//! ```
//!
//! The hub holds routing metadata only. It is rebuilt empty on restart and
//! clients re-identify and re-join when they reconnect.

pub mod broadcast;
pub mod events;
pub mod hub;
pub mod ids;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod ws;

pub use events::{ClientMessage, DomainEvent, ServerMessage};
pub use hub::{HubOptions, RealtimeHub};
pub use ids::{ConnectionId, ScopeId, UserId};
pub use presence::PresenceMode;
pub use ws::{IdentityPolicy, RealtimeState, SessionResolver, SocketSettings};
