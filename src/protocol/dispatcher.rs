//! Command dispatch: one inbound line in, replies and side effects out.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::OwnedPermit;
use tracing::{debug, info};

use super::message::{ClientMessage, DecodeError, ServerMessage};
use crate::auth::validate_nickname;
use crate::chat::{AuthError, MessageRouter, UserDirectory};
use crate::server::Session;

/// Recoverable command failures. Each one becomes exactly one
/// `ERROR_MESSAGE` reply to the originator; the display text is the reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unparseable line, unknown code or wrong arity.
    #[error("malformed command")]
    Malformed(DecodeError),

    /// Command needs an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// AUTH on a session that is already authenticated.
    #[error("already authenticated")]
    AlreadyAuthenticated,

    /// Bad login/password or bad old password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Nickname held by another online session.
    #[error("name taken")]
    NameTaken,

    /// Private message recipient is offline.
    #[error("user not found")]
    UserNotFound,

    /// Requested nickname fails validation.
    #[error("invalid nickname")]
    InvalidNickname,

    /// Requested new password fails validation.
    #[error("invalid password")]
    InvalidPassword,
}

/// The slot reserved in the originator's queue for its one reply.
struct Reply(Option<OwnedPermit<ServerMessage>>);

impl Reply {
    fn send(&mut self, message: ServerMessage) {
        if let Some(permit) = self.0.take() {
            permit.send(message);
        }
    }
}

/// Maps protocol lines to directory and router operations.
pub struct ProtocolDispatcher {
    directory: Arc<UserDirectory>,
    router: MessageRouter,
}

impl ProtocolDispatcher {
    /// Create a dispatcher over the given directory.
    pub fn new(directory: Arc<UserDirectory>) -> Self {
        let router = MessageRouter::new(Arc::clone(&directory));
        Self { directory, router }
    }

    /// Get the user directory.
    pub fn directory(&self) -> &Arc<UserDirectory> {
        &self.directory
    }

    /// Get the message router.
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Handle one inbound line.
    ///
    /// Command failures are answered with `ERROR_MESSAGE` and are not
    /// errors here. An error means this session's own queue could not take
    /// the reply, either because its writer is gone or because the session
    /// was asked to close while its queue was full.
    pub async fn dispatch(&self, session: &mut Session, line: &str) -> std::io::Result<()> {
        let mut reply = Reply(Some(session.reserve_reply().await?));

        let result = match ClientMessage::decode(line) {
            Ok(message) => self.execute(session, message, &mut reply).await,
            Err(e) => Err(CommandError::Malformed(e)),
        };

        match result {
            Ok(true) => {
                self.router.announce_roster().await;
            }
            Ok(false) => {}
            Err(e) => {
                if let CommandError::Malformed(cause) = &e {
                    debug!(session = %session.id(), error = %cause, "malformed line");
                } else {
                    debug!(session = %session.id(), error = %e, "command rejected");
                }
                reply.send(ServerMessage::error(e.to_string()));
            }
        }
        Ok(())
    }

    /// Run one command. `Ok(true)` means the online set changed.
    async fn execute(
        &self,
        session: &mut Session,
        message: ClientMessage,
        reply: &mut Reply,
    ) -> Result<bool, CommandError> {
        match message {
            ClientMessage::Auth { login, password } => {
                self.auth(session, &login, &password, reply).await
            }
            ClientMessage::ChangeNick { nickname: new } => {
                let (login, old) = identity(session)?;
                self.change_nick(session, &login, &old, new, reply).await
            }
            ClientMessage::ChangePassword {
                old_password,
                new_password,
            } => {
                let (login, _) = identity(session)?;
                self.directory
                    .change_password(&login, &old_password, &new_password)
                    .await
                    .map_err(|e| match e {
                        AuthError::InvalidCredentials => CommandError::InvalidCredentials,
                        AuthError::InvalidPassword => CommandError::InvalidPassword,
                    })?;
                reply.send(ServerMessage::ChangePasswordOk);
                Ok(false)
            }
            ClientMessage::Broadcast { text } => {
                let (_, nickname) = identity(session)?;
                self.router.broadcast(&nickname, &text).await;
                Ok(false)
            }
            ClientMessage::Private { recipient, text } => {
                let (_, nickname) = identity(session)?;
                self.router
                    .send_private(&nickname, &recipient, &text)
                    .await
                    .map_err(|_| CommandError::UserNotFound)?;
                Ok(false)
            }
        }
    }

    async fn auth(
        &self,
        session: &mut Session,
        login: &str,
        password: &str,
        reply: &mut Reply,
    ) -> Result<bool, CommandError> {
        if session.is_authenticated() {
            return Err(CommandError::AlreadyAuthenticated);
        }

        let nickname = self
            .directory
            .authenticate(login, password)
            .await
            .map_err(|_| CommandError::InvalidCredentials)?;
        // AUTH_OK is queued while the registry is still locked, ahead of
        // anything addressed to the new name.
        self.directory
            .register_then(&nickname, session.handle(), || {
                reply.send(ServerMessage::AuthOk {
                    nickname: nickname.clone(),
                })
            })
            .await
            .map_err(|_| CommandError::NameTaken)?;
        session.authenticate(login, &nickname);

        Ok(true)
    }

    async fn change_nick(
        &self,
        session: &mut Session,
        login: &str,
        old: &str,
        new: String,
        reply: &mut Reply,
    ) -> Result<bool, CommandError> {
        validate_nickname(&new).map_err(|_| CommandError::InvalidNickname)?;
        self.directory
            .rename_online(old, &new, session.handle())
            .await
            .map_err(|_| CommandError::NameTaken)?;
        self.directory.remember_nickname(login, &new).await;
        session.set_nickname(new.clone());
        info!(session = %session.id(), old, new = %new, "nickname changed");

        let changed = old != new;
        reply.send(ServerMessage::ChangeNickOk { nickname: new });
        Ok(changed)
    }

    /// Drive a session to `Closed`, taking it offline and notifying the
    /// remaining sessions if it was online.
    pub async fn close_session(&self, session: &mut Session) {
        if let Some((login, nickname)) = session.close() {
            if self.directory.unregister(&nickname, session.id()).await {
                self.router.announce_roster().await;
            }
            info!(session = %session.id(), %login, %nickname, "session went offline");
        }
    }
}

fn identity(session: &Session) -> Result<(String, String), CommandError> {
    session
        .identity()
        .map(|(login, nickname)| (login.to_string(), nickname.to_string()))
        .ok_or(CommandError::NotAuthenticated)
}
