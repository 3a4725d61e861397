//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `config`  | `Config`         |
//! | `history` | `History`        |

pub mod config;
pub mod history;

pub use config::cmd_config;
pub use history::cmd_history;
