//! Events delivered to gateway subscribers

pub mod envelope;
pub mod registry;

pub use envelope::{DispatchRef, EventPool};
pub use registry::{Listener, ListenerCancel, ListenerRegistry};

use std::fmt;
use std::time::Duration;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Round trip of one heartbeat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatTiming {
    /// Sequence number the heartbeat carried
    pub sequence: u64,
    /// Time from sending the heartbeat to receiving its ack
    pub latency: Duration,
}

/// One value on a subscriber's feed
///
/// `Dispatch` holds a reference to a pooled envelope; it is released when the
/// `DispatchRef` is released or dropped.
#[derive(Debug)]
pub enum GatewayEvent {
    StateChanged(ConnectionState),
    Dispatch(DispatchRef),
    ConnectionClosed,
    MaxReconnectReached,
    Heartbeat(HeartbeatTiming),
}
