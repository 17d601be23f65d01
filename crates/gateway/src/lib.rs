//! Herald Gateway
//!
//! Client for a real-time gateway. Provides:
//! - A connection that identifies, resumes, heartbeats and reconnects
//! - Fan-out of every inbound frame to any number of subscribers
//! - Guild member requests correlated across chunked responses
//!
//! ## Architecture
//!
//! ```text
//!          Dialer (WebSocket / channel)
//!               │
//!    ┌──────────▼──────────┐
//!    │       Gateway       │  handshake, heartbeat, reconnect
//!    │  read loop / writer │
//!    └──────────┬──────────┘
//!               │ pooled, ref-counted envelopes
//!    ┌──────────▼──────────┐
//!    │  ListenerRegistry   │  one bounded queue per subscriber
//!    └──┬───────┬───────┬──┘
//!       ▼       ▼       ▼
//!    cache   fetch_members   application
//! ```
//!
//! ## Transport
//!
//! Production connections use [`WebSocketDialer`]. [`ChannelDialer`] runs the
//! same engine over tokio channels, with the server half handed to the
//! caller, for single-process use and tests.

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
mod handshake;
mod heartbeat;
pub mod members;
pub mod messages;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use connection::{Gateway, MAX_RECONNECTION_ATTEMPTS, RECONNECT_COOLDOWN};
pub use error::{ConfigError, GatewayError, MemberFetchError, TransportError};
pub use event::{
    ConnectionState, DispatchRef, EventPool, GatewayEvent, HeartbeatTiming, Listener,
    ListenerCancel, ListenerRegistry,
};
pub use members::{FetchMembers, GuildMembers, MEMBER_CHUNK_TIMEOUT};
pub use messages::Snowflake;
pub use session::SessionContext;
pub use transport::{
    Connection, Dialer, Frame, FrameSink, FrameStream,
    channel::{ChannelAcceptor, ChannelDialer, DialAttempt, ServerConnection},
    websocket::WebSocketDialer,
};

pub use herald_ratelimit::IdentifyLimiter;
