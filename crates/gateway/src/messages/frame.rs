//! Control frame envelope: `{op, d, s, t}`

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RESUME: u8 = 6;
pub const OP_RESUMED: u8 = 7;
pub const OP_REQUEST_GUILD_MEMBERS: u8 = 8;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

pub const EVENT_READY: &str = "READY";
pub const EVENT_GUILD_MEMBERS_CHUNK: &str = "GUILD_MEMBERS_CHUNK";

/// Inbound frame with its payload left undecoded
#[derive(Debug, Deserialize)]
pub struct RawFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Box<RawValue>>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

impl RawFrame {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Raw JSON text of `d` (`null` when absent)
    pub fn payload_json(&self) -> &str {
        self.d.as_deref().map(RawValue::get).unwrap_or("null")
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.payload_json())
    }

    pub fn is_event(&self, name: &str) -> bool {
        self.op == OP_DISPATCH && self.t.as_deref() == Some(name)
    }
}

#[derive(Serialize)]
struct OutboundFrame<'a, T: Serialize> {
    op: u8,
    d: &'a T,
}

/// Encode an outbound frame. Outbound frames never carry `s` or `t`.
pub fn encode<T: Serialize>(op: u8, d: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutboundFrame { op, d })
}
