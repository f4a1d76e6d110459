//! parley - a multi-user line-protocol chat server.
//!
//! Clients connect over TCP, authenticate, see who else is online and
//! exchange broadcast and private messages.

pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;

pub use auth::{PasswordError, PasswordHasher, ValidationError};
pub use chat::{MessageRouter, SessionHandle, SessionId, UserDirectory};
pub use client::{MessageProcessor, NetworkService};
pub use config::Config;
pub use error::{ParleyError, Result};
pub use protocol::{ClientMessage, CommandError, ProtocolDispatcher, ServerMessage};
pub use server::{ChatServer, Session, SessionState};
