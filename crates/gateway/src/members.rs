//! Guild member requests
//!
//! A request goes out as one `op 8` frame tagged with a fresh nonce; the
//! answer arrives as `GUILD_MEMBERS_CHUNK` dispatches on the shared event
//! feed. Chunks are matched on the nonce, so concurrent fetches never see
//! each other's members.

use log::{debug, warn};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::Gateway;
use crate::error::{GatewayError, MemberFetchError};
use crate::event::{ConnectionState, GatewayEvent};
use crate::messages::frame::{EVENT_GUILD_MEMBERS_CHUNK, OP_REQUEST_GUILD_MEMBERS};
use crate::messages::{GuildMembersChunk, RequestGuildMembers, Snowflake};

/// Silence tolerated before a fetch gives up, counted from the request and
/// restarted by every matching chunk
pub const MEMBER_CHUNK_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on the members reserved up front from a first chunk
const MAX_RESERVE_HINT: usize = 100_000;

/// What to fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchMembers {
    pub guild_id: Snowflake,
    /// Username prefix; `Some("")` with `limit == 0` asks for everyone
    pub query: Option<String>,
    /// Maximum members to return, 0 for no limit
    pub limit: u32,
    pub presences: bool,
    pub user_ids: Option<Vec<Snowflake>>,
}

impl FetchMembers {
    /// Every member of the guild
    pub fn all(guild_id: impl Into<Snowflake>) -> Self {
        FetchMembers {
            guild_id: guild_id.into(),
            query: Some(String::new()),
            limit: 0,
            presences: false,
            user_ids: None,
        }
    }

    /// Members whose username starts with `query`
    pub fn search(guild_id: impl Into<Snowflake>, query: impl Into<String>, limit: u32) -> Self {
        FetchMembers {
            guild_id: guild_id.into(),
            query: Some(query.into()),
            limit,
            presences: false,
            user_ids: None,
        }
    }

    /// Specific members; unknown ids come back in `not_found`
    pub fn by_ids(guild_id: impl Into<Snowflake>, user_ids: Vec<Snowflake>) -> Self {
        FetchMembers {
            guild_id: guild_id.into(),
            query: None,
            limit: 0,
            presences: false,
            user_ids: Some(user_ids),
        }
    }

    pub fn with_presences(mut self, presences: bool) -> Self {
        self.presences = presences;
        self
    }

    fn into_request(self, nonce: String) -> RequestGuildMembers {
        RequestGuildMembers {
            guild_id: self.guild_id,
            query: self.query,
            limit: self.limit,
            presences: self.presences,
            user_ids: self.user_ids,
            nonce,
        }
    }
}

/// Members accumulated across the chunks of one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildMembers {
    pub guild_id: Snowflake,
    pub members: Vec<Value>,
    pub presences: Vec<Value>,
    /// Requested ids the server could not resolve
    pub not_found: Vec<Snowflake>,
    pub chunks_received: u32,
}

impl GuildMembers {
    fn new(guild_id: Snowflake) -> Self {
        GuildMembers {
            guild_id,
            ..Default::default()
        }
    }

    /// Append one chunk; true once it was the last.
    fn absorb(&mut self, chunk: GuildMembersChunk) -> bool {
        if chunk.chunk_index == 0 && chunk.chunk_count > 1 {
            let count = chunk.chunk_count as usize;
            let hint = |per_chunk: usize| per_chunk.saturating_mul(count).min(MAX_RESERVE_HINT);
            self.members.reserve(hint(chunk.members.len()));
            self.presences.reserve(hint(chunk.presences.len()));
        }

        let last = chunk.is_last();
        self.members.extend(chunk.members);
        self.presences.extend(chunk.presences);
        self.not_found.extend(chunk.not_found);
        self.chunks_received += 1;
        last
    }
}

impl Gateway {
    /// Request guild members and collect every chunk of the answer.
    ///
    /// Unresolved ids still return the members that were found, inside
    /// [`MemberFetchError::Unresolved`]. Timeout and cancellation carry
    /// whatever arrived before they fired.
    pub async fn fetch_members(
        &self,
        cancel: &CancellationToken,
        request: FetchMembers,
    ) -> Result<GuildMembers, MemberFetchError> {
        if self.status() != ConnectionState::Connected {
            return Err(MemberFetchError::NotConnected);
        }

        let nonce = Uuid::new_v4().simple().to_string();
        let mut accumulated = GuildMembers::new(request.guild_id);

        // Listen before sending so the first chunk cannot be missed
        let mut listener = self.subscribe();
        self.inner()
            .send_frame(OP_REQUEST_GUILD_MEMBERS, &request.into_request(nonce.clone()))
            .await
            .map_err(|e| match e {
                GatewayError::NotConnected => MemberFetchError::NotConnected,
                other => MemberFetchError::Gateway(other),
            })?;
        debug!("Requested members of guild {} (nonce {})", accumulated.guild_id, nonce);

        let deadline = tokio::time::sleep(MEMBER_CHUNK_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(MemberFetchError::Cancelled { partial: accumulated });
                }
                _ = &mut deadline => {
                    warn!(
                        "Member fetch {} timed out after {} chunk(s)",
                        nonce, accumulated.chunks_received
                    );
                    return Err(MemberFetchError::Timeout { partial: accumulated });
                }
                event = listener.recv() => event,
            };

            let Some(event) = event else {
                return Err(MemberFetchError::NotConnected);
            };
            let GatewayEvent::Dispatch(dispatch) = event else {
                continue;
            };
            if dispatch.event_name() != Some(EVENT_GUILD_MEMBERS_CHUNK) {
                continue;
            }

            let decoded = dispatch.decode::<GuildMembersChunk>();
            dispatch.release();
            let chunk = match decoded {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Undecodable member chunk: {}", e);
                    continue;
                }
            };
            if chunk.nonce.as_deref() != Some(nonce.as_str()) {
                continue;
            }

            deadline.as_mut().reset(Instant::now() + MEMBER_CHUNK_TIMEOUT);
            if accumulated.absorb(chunk) {
                break;
            }
        }

        debug!(
            "Member fetch {} complete: {} member(s) in {} chunk(s)",
            nonce,
            accumulated.members.len(),
            accumulated.chunks_received
        );

        if accumulated.not_found.is_empty() {
            Ok(accumulated)
        } else {
            Err(MemberFetchError::Unresolved {
                members: accumulated,
            })
        }
    }
}
