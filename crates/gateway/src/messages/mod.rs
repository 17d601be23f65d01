//! Wire message types

pub mod frame;
pub mod payloads;
pub mod snowflake;

pub use frame::{RawFrame, encode};
pub use payloads::{
    ConnectionProperties, GuildMembersChunk, Hello, Identify, Ready, RequestGuildMembers, Resume,
};
pub use snowflake::Snowflake;
