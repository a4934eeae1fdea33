//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `init`    | `Init`           |
//! | `listen`  | `Listen`         |
//! | `config`  | `Config`         |

pub mod config;
pub mod init;
pub mod listen;
pub mod serve;

pub use config::cmd_config;
pub use init::cmd_init;
pub use listen::cmd_listen;
pub use serve::cmd_serve;
