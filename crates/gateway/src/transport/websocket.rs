//! WebSocket transport over tokio-tungstenite

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Connection, Dialer, Frame, FrameSink, FrameStream};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` and `wss://` URLs
#[derive(Debug, Clone, Default)]
pub struct WebSocketDialer;

impl WebSocketDialer {
    pub fn new() -> Self {
        WebSocketDialer
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let (write, read) = ws_stream.split();

        Ok(Connection {
            sink: Box::new(WebSocketSink { write }),
            stream: Box::new(WebSocketFrames { read }),
        })
    }
}

struct WebSocketSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Close(_) => Message::Close(None),
        };

        self.write
            .send(msg)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.write
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct WebSocketFrames {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn next(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text.to_string())),
                Some(Ok(Message::Binary(data))) => return Ok(Frame::Binary(data.to_vec())),
                Some(Ok(Message::Close(close))) => {
                    let reason =
                        close.map(|f| format!("{}: {}", u16::from(f.code), f.reason.as_str()));
                    return Ok(Frame::Close(reason));
                }
                Some(Ok(Message::Ping(data))) => {
                    // Pong is queued by tungstenite itself
                    log::trace!("Received ping: {:?}", data);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
                None => return Err(TransportError::ChannelClosed),
            }
        }
    }
}
