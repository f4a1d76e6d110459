//! Message delivery to online sessions.
//!
//! Fan-out never awaits a recipient: each delivery is a `try_send` into
//! the recipient's bounded outbound queue. A recipient whose queue is
//! full or gone is told to close and cleans itself up; the fan-out loop
//! carries on with the others.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use super::directory::UserDirectory;
use crate::protocol::ServerMessage;

/// Session identifier.
pub type SessionId = Uuid;

/// Why a delivery did not reach a recipient's queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The recipient is not draining its queue fast enough.
    #[error("recipient queue is full")]
    Full,
    /// The recipient's connection is gone.
    #[error("recipient is disconnected")]
    Closed,
}

/// Private message recipient is not online.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("user not found: {0}")]
pub struct UserNotFound(pub String);

/// Reference to an online session, as held by the directory.
///
/// Holds only a weak sender: the session task owns its queue, and the
/// queue closes as soon as that task lets go of it.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    outbox: mpsc::WeakSender<ServerMessage>,
    closer: Arc<Notify>,
}

impl SessionHandle {
    /// Create a handle for the session owning `outbox`.
    pub fn new(id: SessionId, outbox: &mpsc::Sender<ServerMessage>, closer: Arc<Notify>) -> Self {
        Self {
            id,
            outbox: outbox.downgrade(),
            closer,
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue one message without waiting.
    pub fn deliver(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        let outbox = self.outbox.upgrade().ok_or(DeliveryError::Closed)?;
        outbox.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the owning session to close.
    pub fn close(&self) {
        self.closer.notify_one();
    }

    /// Deliver, closing the recipient on failure.
    pub(crate) fn deliver_or_close(&self, nickname: &str, message: ServerMessage) -> bool {
        match self.deliver(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %self.id, nickname, error = %e, "delivery failed, dropping recipient");
                self.close();
                false
            }
        }
    }
}

/// Routes broadcast, private and roster messages.
#[derive(Clone)]
pub struct MessageRouter {
    directory: Arc<UserDirectory>,
}

impl MessageRouter {
    /// Create a router over the given directory.
    pub fn new(directory: Arc<UserDirectory>) -> Self {
        Self { directory }
    }

    /// Get the underlying directory.
    pub fn directory(&self) -> &Arc<UserDirectory> {
        &self.directory
    }

    /// Deliver `text` to every online session except `from`.
    ///
    /// Returns the number of recipients the message was queued for.
    pub async fn broadcast(&self, from: &str, text: &str) -> usize {
        let message = ServerMessage::Broadcast {
            from: from.to_string(),
            text: text.to_string(),
        };
        let delivered = self
            .directory
            .with_online(|online| {
                online
                    .iter()
                    .filter(|(nickname, _)| nickname.as_str() != from)
                    .filter(|(nickname, handle)| handle.deliver_or_close(nickname, message.clone()))
                    .count()
            })
            .await;
        debug!(from, delivered, "broadcast");
        delivered
    }

    /// Deliver `text` to the session currently named `to`.
    ///
    /// A recipient whose queue is full or closed counts as gone: it is
    /// asked to close and the sender gets [`UserNotFound`], the same as
    /// for a nickname that is not online.
    pub async fn send_private(&self, from: &str, to: &str, text: &str) -> Result<(), UserNotFound> {
        let message = ServerMessage::Private {
            from: from.to_string(),
            text: text.to_string(),
        };
        let delivered = self
            .directory
            .with_online(|online| {
                online
                    .get(to)
                    .map(|handle| handle.deliver_or_close(to, message))
            })
            .await;
        match delivered {
            Some(true) => {
                debug!(from, to, "private message delivered");
                Ok(())
            }
            _ => Err(UserNotFound(to.to_string())),
        }
    }

    /// Push the current `LIST_USERS` snapshot to every online session.
    ///
    /// The snapshot is taken and delivered under one read lock, so no
    /// directory mutation can land between the two.
    pub async fn announce_roster(&self) -> usize {
        self.directory
            .with_online(|online| {
                let mut nicknames: Vec<String> = online.keys().cloned().collect();
                nicknames.sort();
                let message = ServerMessage::ListUsers { nicknames };
                online
                    .iter()
                    .filter(|(nickname, handle)| handle.deliver_or_close(nickname, message.clone()))
                    .count()
            })
            .await
    }
}
