//! Error types for the gateway crate

use thiserror::Error;

use crate::members::GuildMembers;

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(&'static str),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Gateway-level errors (connection and handshake operations)
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Not connected")]
    NotConnected,

    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] herald_ratelimit::RateLimitError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors from a member fetch
///
/// Timeout, cancellation and unresolved ids still carry whatever was
/// accumulated before the call ended.
#[derive(Error, Debug)]
pub enum MemberFetchError {
    #[error("Not connected")]
    NotConnected,

    #[error("Timed out waiting for member chunks ({} members received)", partial.members.len())]
    Timeout { partial: GuildMembers },

    #[error("Member fetch cancelled ({} members received)", partial.members.len())]
    Cancelled { partial: GuildMembers },

    #[error("{} requested ids were not found", members.not_found.len())]
    Unresolved { members: GuildMembers },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl MemberFetchError {
    /// Members gathered before the error, if the fetch got that far
    pub fn partial(&self) -> Option<&GuildMembers> {
        match self {
            MemberFetchError::Timeout { partial } | MemberFetchError::Cancelled { partial } => {
                Some(partial)
            }
            MemberFetchError::Unresolved { members } => Some(members),
            MemberFetchError::NotConnected | MemberFetchError::Gateway(_) => None,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
