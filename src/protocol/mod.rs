//! Line protocol for parley.
//!
//! Every message is one line: a command code followed by
//! comma-separated fields. The last field of a message carrying free
//! text takes the rest of the line, commas included.

mod dispatcher;
mod message;

pub use dispatcher::{CommandError, ProtocolDispatcher};
pub use message::{ClientMessage, CommandCode, DecodeError, ServerMessage, SEPARATOR};
