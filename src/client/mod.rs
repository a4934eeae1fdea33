//! Client side of the realtime channel.
//!
//! | Module      | Purpose                                                  |
//! |-------------|----------------------------------------------------------|
//! | `agent`     | `SyncAgent`: connect, identify, re-join, reconnect       |
//! | `backoff`   | Bounded exponential retry schedule                       |
//! | `handlers`  | Local `on`/`off` handler table keyed by event name       |

pub mod agent;
pub mod backoff;
pub mod handlers;

pub use agent::{AgentConfig, AgentState, SyncAgent};
pub use backoff::{BackoffPolicy, BackoffState};
pub use handlers::HandlerId;
