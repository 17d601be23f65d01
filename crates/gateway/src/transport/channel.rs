//! Tokio channel-based transport for single-process mode
//!
//! The dialer hands the server half of every connection to a
//! [`ChannelAcceptor`], so a test (or an embedded peer) can play the remote
//! gateway without any sockets.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Connection, Dialer, Frame, FrameSink, FrameStream};
use crate::error::TransportError;

/// One recorded call to [`ChannelDialer::dial`]
#[derive(Debug, Clone)]
pub struct DialAttempt {
    pub url: String,
    pub at: Instant,
    pub accepted: bool,
}

/// Channel-based dialer
#[derive(Clone)]
pub struct ChannelDialer {
    accept_tx: mpsc::UnboundedSender<ServerConnection>,
    capacity: usize,
    refusing: Arc<AtomicBool>,
    attempts: Arc<Mutex<Vec<DialAttempt>>>,
}

impl ChannelDialer {
    /// Create a dialer/acceptor pair; each connection buffers `capacity`
    /// frames per direction.
    pub fn pair(capacity: usize) -> (Self, ChannelAcceptor) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            ChannelDialer {
                accept_tx,
                capacity,
                refusing: Arc::new(AtomicBool::new(false)),
                attempts: Arc::new(Mutex::new(Vec::new())),
            },
            ChannelAcceptor { rx: accept_rx },
        )
    }

    /// Make subsequent dials fail (or succeed again)
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Every dial so far, in order
    pub fn attempts(&self) -> Vec<DialAttempt> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Dialer for ChannelDialer {
    async fn dial(&self, url: &str) -> Result<Connection, TransportError> {
        let refused = self.refusing.load(Ordering::SeqCst);
        self.attempts.lock().push(DialAttempt {
            url: url.to_string(),
            at: Instant::now(),
            accepted: !refused,
        });
        if refused {
            return Err(TransportError::Connection(format!(
                "connection to {} refused",
                url
            )));
        }

        let (client_tx, server_rx) = mpsc::channel(self.capacity);
        let (server_tx, client_rx) = mpsc::channel(self.capacity);

        self.accept_tx
            .send(ServerConnection {
                url: url.to_string(),
                tx: server_tx,
                rx: server_rx,
            })
            .map_err(|_| TransportError::Connection("acceptor dropped".to_string()))?;

        Ok(Connection {
            sink: Box::new(ChannelSink { tx: Some(client_tx) }),
            stream: Box::new(ChannelStream { rx: client_rx }),
        })
    }
}

/// Receives the server half of each dialed connection
pub struct ChannelAcceptor {
    rx: mpsc::UnboundedReceiver<ServerConnection>,
}

impl ChannelAcceptor {
    /// Wait for the next connection
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.rx.recv().await
    }
}

/// Server side of one channel connection
///
/// Dropping it closes the connection from the client's point of view.
pub struct ServerConnection {
    /// URL the client dialed
    pub url: String,
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

impl ServerConnection {
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Send a JSON value as a text frame
    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(value).map_err(|e| TransportError::Send(e.to_string()))?;
        self.send(Frame::Text(text)).await
    }

    /// Next frame from the client; `None` once the client hung up
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next text frame from the client, parsed as JSON. Non-text frames are
    /// skipped; `None` once the client hung up.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await? {
                Frame::Text(text) => return serde_json::from_str(&text).ok(),
                Frame::Close(_) => return None,
                Frame::Binary(_) => continue,
            }
        }
    }

    /// Send a close frame to the client
    pub async fn close(self, reason: &str) {
        let _ = self.tx.send(Frame::Close(Some(reason.to_string()))).await;
    }
}

struct ChannelSink {
    tx: Option<mpsc::Sender<Frame>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ChannelClosed)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct ChannelStream {
    rx: mpsc::Receiver<Frame>,
}

#[async_trait]
impl FrameStream for ChannelStream {
    async fn next(&mut self) -> Result<Frame, TransportError> {
        self.rx.recv().await.ok_or(TransportError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let (dialer, mut acceptor) = ChannelDialer::pair(10);

        let mut conn = dialer.dial("mem://gateway").await.unwrap();
        let mut server = acceptor.accept().await.unwrap();
        assert_eq!(server.url, "mem://gateway");

        conn.sink
            .send(Frame::Text("{\"op\":1}".to_string()))
            .await
            .unwrap();
        let value = server.recv_json().await.unwrap();
        assert_eq!(value["op"], 1);

        server
            .send_json(&serde_json::json!({"op": 11}))
            .await
            .unwrap();
        assert_eq!(
            conn.stream.next().await.unwrap(),
            Frame::Text("{\"op\":11}".to_string())
        );
    }

    #[tokio::test]
    async fn test_server_drop_ends_stream() {
        let (dialer, mut acceptor) = ChannelDialer::pair(10);

        let mut conn = dialer.dial("mem://gateway").await.unwrap();
        drop(acceptor.accept().await.unwrap());

        assert!(matches!(
            conn.stream.next().await,
            Err(TransportError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_refusing_dialer_records_attempts() {
        let (dialer, _acceptor) = ChannelDialer::pair(10);
        dialer.set_refusing(true);

        assert!(dialer.dial("mem://a").await.is_err());
        dialer.set_refusing(false);
        assert!(dialer.dial("mem://b").await.is_ok());

        let attempts = dialer.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].accepted);
        assert!(attempts[1].accepted);
        assert_eq!(attempts[1].url, "mem://b");
    }
}
