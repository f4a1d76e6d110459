//! Per-connection session state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};
use uuid::Uuid;

use crate::chat::{SessionHandle, SessionId};
use crate::protocol::ServerMessage;

/// Session state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Connected, not yet authenticated.
    #[default]
    Connected,
    /// Authenticated and online.
    Authenticated { login: String, nickname: String },
    /// Terminal state.
    Closed,
}

/// One connected client.
///
/// Owned by the task serving the connection. Other sessions reach it only
/// through its [`SessionHandle`].
pub struct Session {
    /// Unique session identifier.
    id: SessionId,
    /// Remote peer address, if known.
    peer_addr: Option<SocketAddr>,
    /// When the connection was accepted.
    created_at: DateTime<Utc>,
    /// Current state.
    state: SessionState,
    /// Timestamp of last inbound line.
    last_activity: Instant,
    /// Outbound queue drained by the writer task.
    outbox: mpsc::Sender<ServerMessage>,
    /// Signalled when someone else wants this session closed.
    closer: Arc<Notify>,
}

impl Session {
    /// Create a session around an outbound queue.
    pub fn new(
        peer_addr: Option<SocketAddr>,
        outbox: mpsc::Sender<ServerMessage>,
        closer: Arc<Notify>,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, peer = ?peer_addr, "session created");
        Self {
            id,
            peer_addr,
            created_at: Utc::now(),
            state: SessionState::Connected,
            last_activity: Instant::now(),
            outbox,
            closer,
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Get the creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Check if the session is authenticated.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated { .. })
    }

    /// Check if the session is closed.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Get the bound login and nickname, if authenticated.
    pub fn identity(&self) -> Option<(&str, &str)> {
        match &self.state {
            SessionState::Authenticated { login, nickname } => {
                Some((login.as_str(), nickname.as_str()))
            }
            _ => None,
        }
    }

    /// Get the nickname, if authenticated.
    pub fn nickname(&self) -> Option<&str> {
        self.identity().map(|(_, nickname)| nickname)
    }

    /// Transition to `Authenticated`.
    pub fn authenticate(&mut self, login: impl Into<String>, nickname: impl Into<String>) {
        let login = login.into();
        let nickname = nickname.into();
        info!(session = %self.id, %login, %nickname, "session authenticated");
        self.state = SessionState::Authenticated { login, nickname };
    }

    /// Update the bound nickname. No-op unless authenticated.
    pub fn set_nickname(&mut self, new_nickname: impl Into<String>) {
        if let SessionState::Authenticated { nickname, .. } = &mut self.state {
            *nickname = new_nickname.into();
        }
    }

    /// Transition to `Closed`, returning the identity it held, if any.
    pub fn close(&mut self) -> Option<(String, String)> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Authenticated { login, nickname } => Some((login, nickname)),
            _ => None,
        }
    }

    /// Handle for the directory and router.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.id, &self.outbox, Arc::clone(&self.closer))
    }

    /// Reserve one slot in this session's own queue for a reply.
    ///
    /// Waits while the queue is full, but gives up as soon as the session
    /// is asked to close or its writer is gone.
    pub async fn reserve_reply(&self) -> std::io::Result<mpsc::OwnedPermit<ServerMessage>> {
        tokio::select! {
            permit = self.outbox.clone().reserve_owned() => permit.map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer closed")
            }),
            _ = self.closer.notified() => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "close requested",
            )),
        }
    }

    /// Get the time of the last inbound line.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Update the last activity timestamp to now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Check if the session has been idle for longer than the given duration.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Wait until another party asks this session to close.
    pub async fn close_requested(&self) {
        self.closer.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Session, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (Session::new(None, tx, Arc::new(Notify::new())), rx)
    }

    #[test]
    fn test_session_state_default() {
        assert_eq!(SessionState::default(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (mut s, _rx) = session();
        assert!(!s.is_authenticated());
        assert!(s.identity().is_none());

        s.authenticate("login1", "nick1");
        assert!(s.is_authenticated());
        assert_eq!(s.identity(), Some(("login1", "nick1")));

        s.set_nickname("Neo");
        assert_eq!(s.nickname(), Some("Neo"));

        assert_eq!(s.close(), Some(("login1".to_string(), "Neo".to_string())));
        assert!(s.is_closed());
        assert_eq!(s.close(), None);
    }

    #[tokio::test]
    async fn test_set_nickname_requires_authentication() {
        let (mut s, _rx) = session();
        s.set_nickname("Neo");
        assert!(s.nickname().is_none());
    }

    #[tokio::test]
    async fn test_reply_and_handle_share_queue() {
        let (s, mut rx) = session();
        s.reserve_reply()
            .await
            .unwrap()
            .send(ServerMessage::ChangePasswordOk);
        s.handle().deliver(ServerMessage::error("x")).unwrap();

        assert_eq!(rx.recv().await.unwrap(), ServerMessage::ChangePasswordOk);
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::error("x"));
        assert_eq!(s.handle().id(), s.id());
    }

    #[tokio::test]
    async fn test_reserve_after_writer_gone() {
        let (s, rx) = session();
        drop(rx);
        let err = s.reserve_reply().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_reserve_on_full_queue_gives_up_on_close() {
        let (s, _rx) = session();
        for _ in 0..8 {
            s.handle().deliver(ServerMessage::ChangePasswordOk).unwrap();
        }

        let handle = s.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.close();
        });
        let err = tokio::time::timeout(Duration::from_secs(1), s.reserve_reply())
            .await
            .expect("reserve should stop waiting once closed")
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionAborted);
    }

    #[tokio::test]
    async fn test_close_requested_via_handle() {
        let (s, _rx) = session();
        s.handle().close();
        tokio::time::timeout(Duration::from_secs(1), s.close_requested())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_detection() {
        let (mut s, _rx) = session();
        assert!(!s.is_idle(Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(s.is_idle(Duration::from_millis(10)));
        s.touch();
        assert!(!s.is_idle(Duration::from_millis(100)));
    }
}
