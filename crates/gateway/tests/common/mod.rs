//! Scripted gateway server over the channel transport

#![allow(dead_code)]

use herald_gateway::{
    ChannelAcceptor, ChannelDialer, Gateway, GatewayConfig, GatewayEvent, Listener,
    ServerConnection,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const BASE_URL: &str = "mem://gateway";
pub const RESUME_URL: &str = "mem://resume";
pub const SESSION_ID: &str = "session-1";

/// Heartbeat interval long enough to stay out of the way
pub const QUIET_HEARTBEAT_MS: u64 = 45_000;

pub fn setup() -> (Gateway, ChannelDialer, ChannelAcceptor) {
    setup_with(GatewayConfig::new(BASE_URL, "Bot secret").with_shard(0, 2))
}

pub fn setup_with(config: GatewayConfig) -> (Gateway, ChannelDialer, ChannelAcceptor) {
    let (dialer, acceptor) = ChannelDialer::pair(64);
    let gateway =
        Gateway::new(config, Arc::new(dialer.clone())).expect("Failed to create gateway");
    (gateway, dialer, acceptor)
}

pub async fn send_hello(conn: &ServerConnection, interval_ms: u64) {
    conn.send_json(&json!({ "op": 10, "d": { "heartbeat_interval": interval_ms } }))
        .await
        .expect("hello");
}

pub async fn send_dispatch(conn: &ServerConnection, seq: u64, event: &str, d: Value) {
    conn.send_json(&json!({ "op": 0, "s": seq, "t": event, "d": d }))
        .await
        .expect("dispatch");
}

/// Accept one connection and play a fresh identify; returns the connection
/// and the identify frame the client sent.
pub async fn serve_identify(
    acceptor: &mut ChannelAcceptor,
    heartbeat_ms: u64,
) -> (ServerConnection, Value) {
    let mut conn = acceptor.accept().await.expect("client never dialed");
    send_hello(&conn, heartbeat_ms).await;

    let identify = conn.recv_json().await.expect("identify");
    assert_eq!(identify["op"], 2, "expected identify, got {}", identify);

    send_dispatch(
        &conn,
        1,
        "READY",
        json!({ "session_id": SESSION_ID, "resume_gateway_url": RESUME_URL }),
    )
    .await;
    (conn, identify)
}

/// Connect from scratch against a scripted server
pub async fn connect_fresh(
    gateway: &Gateway,
    acceptor: &mut ChannelAcceptor,
    heartbeat_ms: u64,
) -> ServerConnection {
    let cancel = CancellationToken::new();
    let (result, (conn, _identify)) = tokio::join!(
        gateway.connect(&cancel),
        serve_identify(acceptor, heartbeat_ms)
    );
    result.expect("connect failed");
    conn
}

/// Next event matching `pred`; everything else is released and skipped
pub async fn wait_for<F>(listener: &mut Listener, mut pred: F) -> GatewayEvent
where
    F: FnMut(&GatewayEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let event = listener.recv().await.expect("feed closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Next frame from the client that is not a heartbeat
pub async fn recv_non_heartbeat(conn: &mut ServerConnection) -> Value {
    loop {
        let frame = conn.recv_json().await.expect("client hung up");
        if frame["op"] != 1 {
            return frame;
        }
    }
}
