//! Test helpers for E2E tests.
//!
//! Provides TestClient, TestServer, and helper functions for E2E testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use parley::config::{AccountConfig, Config, ServerConfig};
use parley::{ChatServer, PasswordHasher, ProtocolDispatcher, ServerMessage, UserDirectory};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait before concluding nothing more is coming.
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Test client speaking the line protocol.
pub struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect to the server at the given address.
    pub async fn connect(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(addr).await?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            writer,
        })
    }

    /// Send raw bytes to the server.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        self.writer.write_all(data).await?;
        self.writer.flush().await
    }

    /// Send a line (with LF) to the server.
    pub async fn send_line(&mut self, line: &str) -> Result<(), std::io::Error> {
        self.send_raw(format!("{line}\n").as_bytes()).await
    }

    /// Receive the next raw line. `None` if the server closed the connection.
    pub async fn recv_line(&mut self) -> Result<Option<String>, std::io::Error> {
        self.recv_line_timeout(DEFAULT_TIMEOUT).await
    }

    /// Receive the next raw line with a custom timeout.
    pub async fn recv_line_timeout(
        &mut self,
        duration: Duration,
    ) -> Result<Option<String>, std::io::Error> {
        match timeout(duration, self.lines.next_line()).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timeout waiting for a line",
            )),
        }
    }

    /// Receive and decode the next message.
    pub async fn recv(&mut self) -> parley::Result<ServerMessage> {
        let line = self.recv_line().await?.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed")
        })?;
        ServerMessage::decode(&line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }

    /// Receive messages until one matches, returning it.
    pub async fn recv_until<F>(&mut self, mut pred: F) -> parley::Result<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let message = self.recv().await?;
            if pred(&message) {
                return Ok(message);
            }
        }
    }

    /// Receive the next non-roster message.
    pub async fn recv_skip_roster(&mut self) -> parley::Result<ServerMessage> {
        self.recv_until(|m| !matches!(m, ServerMessage::ListUsers { .. }))
            .await
    }

    /// Wait for a roster containing exactly `expected`.
    pub async fn expect_roster(&mut self, expected: &[&str]) -> parley::Result<()> {
        self.recv_until(|m| match m {
            ServerMessage::ListUsers { nicknames } => nicknames == expected,
            _ => false,
        })
        .await
        .map(|_| ())
    }

    /// Collect everything that arrives until the line goes quiet.
    pub async fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(Some(line)) = self.recv_line_timeout(QUIET_PERIOD).await {
            if let Ok(message) = ServerMessage::decode(&line) {
                out.push(message);
            }
        }
        out
    }

    /// Check that the server has closed the connection.
    pub async fn expect_closed(&mut self) -> bool {
        loop {
            match self.recv_line().await {
                Ok(None) | Err(_) => return true,
                Ok(Some(_)) => continue,
            }
        }
    }

    /// Authenticate and wait for the reply.
    pub async fn auth(&mut self, login: &str, password: &str) -> parley::Result<ServerMessage> {
        self.send_line(&format!("AUTH,{login},{password}")).await?;
        self.recv_skip_roster().await
    }

    /// Close the write side.
    pub async fn quit(&mut self) -> Result<(), std::io::Error> {
        self.writer.shutdown().await
    }
}

/// In-process server on an OS-assigned port.
pub struct TestServer {
    addr: SocketAddr,
    dispatcher: Arc<ProtocolDispatcher>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a server with the demo accounts.
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_config(test_config()).await
    }

    /// Start a server with custom configuration.
    pub async fn with_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let directory = UserDirectory::new(
            PasswordHasher::insecure_fast(),
            config.directory.auto_register,
        );
        for account in config.seed_accounts() {
            directory.provision(&account).await?;
        }
        let dispatcher = Arc::new(ProtocolDispatcher::new(Arc::new(directory)));

        let server = ChatServer::bind(&config.server).await?;
        let addr = server.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_dispatcher = Arc::clone(&dispatcher);
        let handle = tokio::spawn(async move {
            let _ = server
                .run_until(server_dispatcher, async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            addr,
            dispatcher,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the local address of the server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the dispatcher (for inspecting the directory).
    pub fn dispatcher(&self) -> &Arc<ProtocolDispatcher> {
        &self.dispatcher
    }

    /// Connect a new client.
    pub async fn client(&self) -> TestClient {
        TestClient::connect(self.addr).await.unwrap()
    }

    /// Connect a client and authenticate it, discarding the replies.
    pub async fn login(&self, login: &str, password: &str) -> TestClient {
        let mut client = self.client().await;
        let reply = client.auth(login, password).await.unwrap();
        assert!(
            matches!(reply, ServerMessage::AuthOk { .. }),
            "login failed: {reply:?}"
        );
        client
    }

    /// Wait until the directory holds exactly `expected` online.
    pub async fn wait_online(&self, expected: &[&str]) {
        let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
        loop {
            let online = self.dispatcher.directory().list_online_nicknames().await;
            if online == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected online {expected:?}, got {online:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stop the server and wait for the accept loop to end.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Create a test configuration.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_connections: 10,
            ..ServerConfig::default()
        },
        accounts: vec![
            AccountConfig::new("login1", "pass1").with_nickname("nick1"),
            AccountConfig::new("login2", "pass2").with_nickname("nick2"),
            AccountConfig::new("login3", "pass3").with_nickname("nick3"),
        ],
        ..Config::default()
    }
}
