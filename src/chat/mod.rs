//! Chat core for parley.
//!
//! - [`UserDirectory`]: credentials and the online registry
//! - [`MessageRouter`]: broadcast, private and roster delivery

mod directory;
mod router;

pub use directory::{AuthError, NameTaken, UserDirectory};
pub use router::{DeliveryError, MessageRouter, SessionHandle, SessionId, UserNotFound};
