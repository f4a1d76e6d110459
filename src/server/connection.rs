//! Driving one connection: a reader loop feeding the dispatcher and a
//! writer task draining the session's outbound queue.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::session::Session;
use crate::chat::SessionId;
use crate::config::ServerConfig;
use crate::protocol::{ProtocolDispatcher, ServerMessage};

/// How long a closing session may spend flushing queued replies.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection limits taken from [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionLimits {
    /// Idle limit for authenticated sessions.
    pub idle_timeout: Option<Duration>,
    /// Limit for an unauthenticated session to say anything.
    pub read_timeout: Option<Duration>,
    /// Capacity of the outbound queue.
    pub outbound_queue_capacity: usize,
    /// Longest accepted line in bytes, terminator excluded.
    pub max_line_length: usize,
}

impl ConnectionLimits {
    /// Build limits from the server configuration. Zero disables a timer.
    pub fn from_config(config: &ServerConfig) -> Self {
        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        Self {
            idle_timeout: secs(config.idle_timeout_secs),
            read_timeout: secs(config.read_timeout_secs),
            outbound_queue_capacity: config.outbound_queue_capacity.max(1),
            max_line_length: config.max_line_length,
        }
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// Why the reader loop stopped.
#[derive(Debug)]
enum Disconnect {
    /// Peer closed its side.
    Eof,
    /// Peer stayed silent for too long.
    TimedOut,
    /// Another party asked the session to close.
    Requested,
    /// A line exceeded the length limit.
    LineTooLong,
    /// The stream failed or sent invalid UTF-8.
    Failed(std::io::Error),
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::Eof => write!(f, "peer closed connection"),
            Disconnect::TimedOut => write!(f, "timed out"),
            Disconnect::Requested => write!(f, "close requested"),
            Disconnect::LineTooLong => write!(f, "line too long"),
            Disconnect::Failed(e) => write!(f, "connection failure: {e}"),
        }
    }
}

/// Serve one connection until it ends, then take its session offline.
pub async fn handle_connection<S>(
    stream: S,
    peer_addr: Option<SocketAddr>,
    dispatcher: Arc<ProtocolDispatcher>,
    limits: ConnectionLimits,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (outbox, inbox) = mpsc::channel(limits.outbound_queue_capacity);
    let closer = Arc::new(Notify::new());

    let mut session = Session::new(peer_addr, outbox, Arc::clone(&closer));
    let session_id = session.id();
    info!(session = %session_id, peer = ?peer_addr, "connection opened");

    let mut writer_task = tokio::spawn(write_loop(
        BufWriter::new(writer),
        inbox,
        closer,
        session_id,
    ));

    let mut reader = BufReader::new(reader);
    let reason = read_loop(&mut reader, &mut session, &dispatcher, &limits).await;
    match &reason {
        Disconnect::Eof | Disconnect::Requested => {
            debug!(session = %session_id, %reason, "closing session")
        }
        _ => warn!(session = %session_id, %reason, "closing session"),
    }

    dispatcher.close_session(&mut session).await;
    // Dropping the session drops the last strong sender, so the writer
    // finishes once it has flushed what is already queued.
    drop(session);

    if tokio::time::timeout(DRAIN_TIMEOUT, &mut writer_task)
        .await
        .is_err()
    {
        debug!(session = %session_id, "writer did not drain in time");
        writer_task.abort();
    }
    info!(session = %session_id, peer = ?peer_addr, "connection closed");
}

async fn read_loop<R>(
    reader: &mut BufReader<R>,
    session: &mut Session,
    dispatcher: &ProtocolDispatcher,
    limits: &ConnectionLimits,
) -> Disconnect
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    loop {
        let limit = if session.is_authenticated() {
            limits.idle_timeout
        } else {
            limits.read_timeout
        };
        let deadline_at =
            limit.map(|limit| tokio::time::Instant::from_std(session.last_activity() + limit));
        let deadline = async move {
            match deadline_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let line = tokio::select! {
            result = read_line(reader, &mut buf, limits.max_line_length) => result,
            _ = session.close_requested() => return Disconnect::Requested,
            _ = deadline => return Disconnect::TimedOut,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return Disconnect::Eof,
            Err(LineError::TooLong) => return Disconnect::LineTooLong,
            Err(LineError::Io(e)) => return Disconnect::Failed(e),
        };

        session.touch();
        if line.trim().is_empty() {
            continue;
        }
        match dispatcher.dispatch(session, &line).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionAborted => {
                return Disconnect::Requested
            }
            Err(e) => return Disconnect::Failed(e),
        }
    }
}

#[derive(Debug)]
enum LineError {
    TooLong,
    Io(std::io::Error),
}

/// Read one line, without its terminator. `None` at end of stream.
async fn read_line<R>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> Result<Option<String>, LineError>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    // Room for the longest line plus "\r\n".
    let cap = max_len.saturating_add(2) as u64;
    let n = (&mut *reader)
        .take(cap)
        .read_until(b'\n', buf)
        .await
        .map_err(LineError::Io)?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n as u64 == cap {
        return Err(LineError::TooLong);
    }
    if buf.len() > max_len {
        return Err(LineError::TooLong);
    }

    String::from_utf8(std::mem::take(buf))
        .map(Some)
        .map_err(|e| LineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

async fn write_loop<W>(
    mut writer: BufWriter<W>,
    mut inbox: mpsc::Receiver<ServerMessage>,
    closer: Arc<Notify>,
    session: SessionId,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        let mut result = write_message(&mut writer, &message).await;
        while result.is_ok() {
            match inbox.try_recv() {
                Ok(message) => result = write_message(&mut writer, &message).await,
                Err(_) => break,
            }
        }
        if result.is_ok() {
            result = writer.flush().await;
        }
        if let Err(e) = result {
            debug!(%session, error = %e, "write failed");
            closer.notify_one();
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_message<W>(writer: &mut BufWriter<W>, message: &ServerMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = message.encode();
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}
