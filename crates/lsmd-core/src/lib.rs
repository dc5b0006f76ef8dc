//! Core logic of the plugin supervisor daemon: discovery, socket lifecycle,
//! privilege de-escalation, the select-based multiplexer, and child
//! spawning. The `lsmd` binary crate wires these together with a CLI.

pub mod config;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod multiplexer;
pub mod peercred;
pub mod privilege;
pub mod registry;
pub mod socket_manager;
pub mod spawner;

pub use error::{ConfigError, DaemonError, Result};
