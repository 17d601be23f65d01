//! Integration test: guild member requests
//!
//! The scripted server answers `op 8` with member chunk dispatches; the
//! client must pick out its own chunks by nonce and stop on the last one.

mod common;

use common::*;
use herald_gateway::{FetchMembers, MEMBER_CHUNK_TIMEOUT, MemberFetchError, ServerConnection, Snowflake};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Read the next member request, returning its nonce
async fn recv_request(conn: &mut ServerConnection) -> (String, Value) {
    let request = recv_non_heartbeat(conn).await;
    assert_eq!(request["op"], 8, "expected member request, got {}", request);
    let nonce = request["d"]["nonce"]
        .as_str()
        .expect("request without nonce")
        .to_string();
    (nonce, request["d"].clone())
}

async fn send_chunk(
    conn: &ServerConnection,
    seq: u64,
    nonce: &str,
    index: u32,
    count: u32,
    member_ids: &[u64],
    not_found: &[u64],
) {
    let members: Vec<Value> = member_ids
        .iter()
        .map(|id| json!({ "user": { "id": id.to_string() } }))
        .collect();
    let not_found: Vec<String> = not_found.iter().map(u64::to_string).collect();
    send_dispatch(
        conn,
        seq,
        "GUILD_MEMBERS_CHUNK",
        json!({
            "guild_id": "100",
            "members": members,
            "chunk_index": index,
            "chunk_count": count,
            "not_found": not_found,
            "nonce": nonce,
        }),
    )
    .await;
}

#[tokio::test]
async fn test_fetch_requires_connection() {
    let (gateway, _dialer, _acceptor) = setup();
    let cancel = CancellationToken::new();

    let result = gateway.fetch_members(&cancel, FetchMembers::all(100u64)).await;
    assert!(matches!(result, Err(MemberFetchError::NotConnected)));
}

/// Chunks for other nonces are ignored; the fetch ends on the last chunk
#[tokio::test]
async fn test_multi_chunk_fetch() {
    let _ = env_logger::try_init();
    let (gateway, _dialer, mut acceptor) = setup();
    let mut conn = connect_fresh(&gateway, &mut acceptor, QUIET_HEARTBEAT_MS).await;
    let cancel = CancellationToken::new();

    let server = async {
        let (nonce, request) = recv_request(&mut conn).await;
        assert_eq!(request["guild_id"], "100");
        assert_eq!(request["query"], "");
        assert_eq!(request["limit"], 0);

        send_chunk(&conn, 2, "someone-else", 0, 1, &[99], &[]).await;
        send_chunk(&conn, 3, &nonce, 0, 2, &[1, 2], &[]).await;
        send_chunk(&conn, 4, &nonce, 1, 2, &[3], &[]).await;
    };
    let (result, ()) = tokio::join!(
        gateway.fetch_members(&cancel, FetchMembers::all(100u64)),
        server
    );

    let members = result.expect("fetch failed");
    assert_eq!(members.guild_id, Snowflake(100));
    assert_eq!(members.chunks_received, 2);
    let ids: Vec<&str> = members
        .members
        .iter()
        .filter_map(|m| m["user"]["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);

    // Only the heartbeat task is still listening
    assert_eq!(gateway.registry().active(), 1);
}

#[tokio::test]
async fn test_unresolved_ids_return_found_members() {
    let _ = env_logger::try_init();
    let (gateway, _dialer, mut acceptor) = setup();
    let mut conn = connect_fresh(&gateway, &mut acceptor, QUIET_HEARTBEAT_MS).await;
    let cancel = CancellationToken::new();

    let request = FetchMembers::by_ids(100u64, vec![Snowflake(1), Snowflake(9)]);
    let server = async {
        let (nonce, request) = recv_request(&mut conn).await;
        assert_eq!(request["user_ids"], json!(["1", "9"]));
        send_chunk(&conn, 2, &nonce, 0, 1, &[1], &[9]).await;
    };
    let (result, ()) = tokio::join!(gateway.fetch_members(&cancel, request), server);

    match result {
        Err(MemberFetchError::Unresolved { members }) => {
            assert_eq!(members.members.len(), 1);
            assert_eq!(members.not_found, vec![Snowflake(9)]);
        }
        other => panic!("expected unresolved ids, got {:?}", other),
    }
}

/// Silence after a partial answer times out with what arrived so far
#[tokio::test(start_paused = true)]
async fn test_timeout_returns_partial_members() {
    let _ = env_logger::try_init();
    let (gateway, _dialer, mut acceptor) = setup();
    let mut conn = connect_fresh(&gateway, &mut acceptor, QUIET_HEARTBEAT_MS).await;
    let cancel = CancellationToken::new();

    let last_chunk = async {
        let (nonce, _) = recv_request(&mut conn).await;
        send_chunk(&conn, 2, &nonce, 0, 3, &[1, 2], &[]).await;
        Instant::now()
    };
    let (result, sent_at) = tokio::join!(
        gateway.fetch_members(&cancel, FetchMembers::all(100u64)),
        last_chunk
    );

    assert!(sent_at.elapsed() >= MEMBER_CHUNK_TIMEOUT);
    match result {
        Err(MemberFetchError::Timeout { partial }) => {
            assert_eq!(partial.members.len(), 2);
            assert_eq!(partial.chunks_received, 1);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

/// Each matching chunk restarts the deadline
#[tokio::test(start_paused = true)]
async fn test_deadline_resets_per_chunk() {
    let _ = env_logger::try_init();
    let (gateway, _dialer, mut acceptor) = setup();
    let mut conn = connect_fresh(&gateway, &mut acceptor, QUIET_HEARTBEAT_MS).await;
    let cancel = CancellationToken::new();
    let gap = MEMBER_CHUNK_TIMEOUT - Duration::from_secs(5);

    let server = async {
        let (nonce, _) = recv_request(&mut conn).await;
        tokio::time::sleep(gap).await;
        send_chunk(&conn, 2, &nonce, 0, 2, &[1], &[]).await;
        tokio::time::sleep(gap).await;
        send_chunk(&conn, 3, &nonce, 1, 2, &[2], &[]).await;
    };
    let started = Instant::now();
    let (result, ()) = tokio::join!(
        gateway.fetch_members(&cancel, FetchMembers::all(100u64)),
        server
    );

    assert!(started.elapsed() > MEMBER_CHUNK_TIMEOUT);
    assert_eq!(result.expect("fetch failed").members.len(), 2);
}

#[tokio::test]
async fn test_cancel_returns_partial_members() {
    let _ = env_logger::try_init();
    let (gateway, _dialer, mut acceptor) = setup();
    let mut conn = connect_fresh(&gateway, &mut acceptor, QUIET_HEARTBEAT_MS).await;
    let cancel = CancellationToken::new();

    let server = async {
        let (nonce, _) = recv_request(&mut conn).await;
        send_chunk(&conn, 2, &nonce, 0, 2, &[1], &[]).await;
        // Give the client time to take the chunk before cancelling
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    };
    let (result, ()) = tokio::join!(
        gateway.fetch_members(&cancel, FetchMembers::all(100u64)),
        server
    );

    match result {
        Err(MemberFetchError::Cancelled { partial }) => assert_eq!(partial.members.len(), 1),
        other => panic!("expected cancellation, got {:?}", other),
    }
}

/// Two fetches in flight each collect only their own chunks
#[tokio::test]
async fn test_concurrent_fetches_stay_separate() {
    let _ = env_logger::try_init();
    let (gateway, _dialer, mut acceptor) = setup();
    let mut conn = connect_fresh(&gateway, &mut acceptor, QUIET_HEARTBEAT_MS).await;
    let cancel = CancellationToken::new();

    let server = async {
        let (first, _) = recv_request(&mut conn).await;
        let (second, _) = recv_request(&mut conn).await;
        send_chunk(&conn, 2, &second, 0, 2, &[20], &[]).await;
        send_chunk(&conn, 3, &first, 0, 1, &[10, 11], &[]).await;
        send_chunk(&conn, 4, &second, 1, 2, &[21], &[]).await;
    };
    let (a, b, ()) = tokio::join!(
        gateway.fetch_members(&cancel, FetchMembers::search(100u64, "a", 10)),
        gateway.fetch_members(&cancel, FetchMembers::search(100u64, "b", 10)),
        server
    );

    let a = a.expect("first fetch failed");
    let b = b.expect("second fetch failed");
    let total = a.members.len() + b.members.len();
    assert_eq!(total, 4);
    assert!(a.members.len() == 2 || b.members.len() == 2);
    assert_eq!(a.chunks_received + b.chunks_received, 3);
}
