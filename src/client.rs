//! Client side of the line protocol.
//!
//! [`NetworkService`] owns one TCP connection to a chat server. Inbound
//! lines are decoded on a background task and handed to a
//! [`MessageProcessor`]; outbound commands are written directly.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::Result;

/// Receives what the server sends.
pub trait MessageProcessor: Send + 'static {
    /// Called once per decoded inbound message, in arrival order.
    fn process_message(&mut self, message: ServerMessage);

    /// Called once when the connection ends.
    fn on_disconnect(&mut self) {}
}

impl MessageProcessor for mpsc::UnboundedSender<ServerMessage> {
    fn process_message(&mut self, message: ServerMessage) {
        let _ = self.send(message);
    }
}

/// A connection to a chat server.
pub struct NetworkService {
    writer: OwnedWriteHalf,
    local_addr: SocketAddr,
    reader: JoinHandle<()>,
}

impl NetworkService {
    /// Connect and start delivering inbound messages to `processor`.
    pub async fn connect<A, P>(addr: A, mut processor: P) -> Result<Self>
    where
        A: ToSocketAddrs,
        P: MessageProcessor,
    {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let (read, writer) = stream.into_split();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match ServerMessage::decode(&line) {
                        Ok(message) => processor.process_message(message),
                        Err(e) => warn!(%line, error = %e, "ignoring undecodable line"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "read failed");
                        break;
                    }
                }
            }
            processor.on_disconnect();
        });

        Ok(Self {
            writer,
            local_addr,
            reader,
        })
    }

    /// Get the local address of the connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one command.
    pub async fn send_command(&mut self, command: &ClientMessage) -> Result<()> {
        self.send_line(&command.encode()).await
    }

    /// Send one raw line. The terminator is added here.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        self.writer.write_all(buf.as_bytes()).await?;
        Ok(())
    }

    /// Shut down the write side. The server then closes the session and
    /// the processor sees `on_disconnect`.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Wait until the inbound side has ended.
    pub async fn closed(self) {
        let _ = self.reader.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Recorder {
        messages: Arc<Mutex<Vec<ServerMessage>>>,
        disconnects: Arc<Mutex<usize>>,
    }

    impl MessageProcessor for Recorder {
        fn process_message(&mut self, message: ServerMessage) {
            self.messages.lock().unwrap().push(message);
        }

        fn on_disconnect(&mut self) {
            *self.disconnects.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let recorder = Recorder::default();
        let mut service = NetworkService::connect(addr, recorder.clone()).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        service
            .send_command(&ClientMessage::Auth {
                login: "login1".into(),
                password: "pass1".into(),
            })
            .await
            .unwrap();
        service.close().await.unwrap();

        let mut received = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut received)
            .await
            .unwrap();
        assert_eq!(received, "AUTH,login1,pass1\n");

        server
            .write_all(b"AUTH_OK,nick1\nnonsense\nLIST_USERS,nick1\n")
            .await
            .unwrap();
        drop(server);

        service.closed().await;
        assert_eq!(
            *recorder.messages.lock().unwrap(),
            vec![
                ServerMessage::AuthOk {
                    nickname: "nick1".into()
                },
                ServerMessage::ListUsers {
                    nicknames: vec!["nick1".into()]
                },
            ]
        );
        assert_eq!(*recorder.disconnects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_channel_processor() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _service = NetworkService::connect(addr, tx).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        server.write_all(b"ERROR_MESSAGE,name taken\n").await.unwrap();
        drop(server);

        assert_eq!(rx.recv().await, Some(ServerMessage::error("name taken")));
        assert_eq!(rx.recv().await, None);
    }
}
