//! Transport abstraction layer
//!
//! A bidirectional, message-framed connection to the gateway. The
//! `Dialer`/`FrameSink`/`FrameStream` traits let the engine run over
//! WebSocket in production and over in-process channels in tests.

pub mod channel;
pub mod websocket;

use crate::error::TransportError;
use async_trait::async_trait;

/// One transport message
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Close with an optional human-readable reason
    Close(Option<String>),
}

/// Write half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection; further sends fail
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection
#[async_trait]
pub trait FrameStream: Send {
    /// Wait for the next frame. A finished stream yields `ChannelClosed`.
    async fn next(&mut self) -> Result<Frame, TransportError>;
}

/// An open connection, split into its two halves
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens connections to a URL
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Connection, TransportError>;
}
