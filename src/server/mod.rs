//! Chat server module.
//!
//! This module provides the TCP listener, per-connection handling and the
//! session state each connection carries.

mod connection;
mod listener;
mod session;

pub use connection::{handle_connection, ConnectionLimits};
pub use listener::{ChatServer, ConnectionPermit};
pub use session::{Session, SessionState};
