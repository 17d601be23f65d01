//! Typed payloads for the control-plane frames

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::snowflake::Snowflake;

/// `op 10`: first frame on every connection
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Hello {
    /// Milliseconds between heartbeats
    pub heartbeat_interval: u64,
}

/// Client metadata sent with identify
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        ConnectionProperties {
            os: std::env::consts::OS.to_string(),
            browser: "herald".to_string(),
            device: "herald".to_string(),
        }
    }
}

/// `op 2`: start a fresh session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identify {
    pub token: String,
    pub properties: ConnectionProperties,
    pub compress: bool,
    /// `[shard_index, shard_count]`
    pub shard: [u32; 2],
    pub intents: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub large_threshold: Option<u32>,
}

/// `op 6`: reattach to an existing session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// `READY` dispatch payload; only the session fields are read
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: String,
}

/// `op 8`: ask for guild members, answered by member chunk dispatches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGuildMembers {
    pub guild_id: Snowflake,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,
    pub limit: u32,
    #[serde(default)]
    pub presences: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_ids: Option<Vec<Snowflake>>,
    pub nonce: String,
}

/// `GUILD_MEMBERS_CHUNK` dispatch payload
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMembersChunk {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub members: Vec<Value>,
    pub chunk_index: u32,
    pub chunk_count: u32,
    #[serde(default)]
    pub not_found: Vec<Snowflake>,
    #[serde(default)]
    pub presences: Vec<Value>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl GuildMembersChunk {
    pub fn is_last(&self) -> bool {
        self.chunk_index.checked_add(1) == Some(self.chunk_count)
    }
}
