//! Hello / identify / resume exchange
//!
//! Runs on a freshly dialed connection before the read loop starts, reading
//! frames straight off the stream. Every wait is bounded by the configured
//! handshake timeout.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::GatewayInner;
use crate::error::{GatewayError, TransportError};
use crate::messages::frame::{EVENT_READY, OP_HELLO, OP_IDENTIFY, OP_RESUME, OP_RESUMED};
use crate::messages::{Hello, Identify, RawFrame, Ready, Resume};
use crate::transport::{Frame, FrameStream};

/// Run the handshake and return the server's hello.
///
/// A fresh handshake stores the new session and publishes `READY`; a resume
/// publishes nothing.
pub(crate) async fn perform(
    inner: &Arc<GatewayInner>,
    stream: &mut dyn FrameStream,
    resume: bool,
) -> Result<Hello, GatewayError> {
    let timeout = inner.config.handshake_timeout();

    let frame = next_frame(stream, timeout, "hello").await?;
    if frame.op != OP_HELLO {
        return Err(GatewayError::Protocol(format!(
            "expected hello (op {}), got op {}",
            OP_HELLO, frame.op
        )));
    }
    let hello: Hello = frame.payload()?;
    if hello.heartbeat_interval == 0 {
        return Err(GatewayError::Protocol(
            "hello carried a zero heartbeat interval".to_string(),
        ));
    }
    debug!("Hello received, heartbeat every {}ms", hello.heartbeat_interval);

    if resume {
        resume_session(inner, stream, timeout).await?;
    } else {
        identify(inner, stream, timeout).await?;
    }

    Ok(hello)
}

async fn identify(
    inner: &Arc<GatewayInner>,
    stream: &mut dyn FrameStream,
    timeout: Duration,
) -> Result<(), GatewayError> {
    let config = &inner.config;
    let payload = Identify {
        token: config.token.clone(),
        properties: config.properties.clone(),
        compress: config.compress,
        shard: config.shard,
        intents: config.intents,
        large_threshold: config.large_threshold,
    };
    inner.send_frame(OP_IDENTIFY, &payload).await?;

    let frame = next_frame(stream, timeout, "ready").await?;
    if !frame.is_event(EVENT_READY) {
        return Err(GatewayError::Protocol(format!(
            "expected {} dispatch, got op {} ({})",
            EVENT_READY,
            frame.op,
            frame.t.as_deref().unwrap_or("no event")
        )));
    }
    let ready: Ready = frame.payload()?;
    if ready.session_id.is_empty() {
        return Err(GatewayError::Protocol(
            "ready carried an empty session id".to_string(),
        ));
    }

    if let Some(seq) = frame.s {
        inner.observe_sequence(seq);
    }
    info!("Session {} established", ready.session_id);
    inner.store_session(ready.session_id, ready.resume_gateway_url);
    inner.publish_frame(&frame);
    Ok(())
}

async fn resume_session(
    inner: &Arc<GatewayInner>,
    stream: &mut dyn FrameStream,
    timeout: Duration,
) -> Result<(), GatewayError> {
    let session = inner.session();
    let payload = Resume {
        token: inner.config.token.clone(),
        session_id: session.session_id.clone(),
        seq: session.last_sequence,
    };
    inner.send_frame(OP_RESUME, &payload).await?;

    let frame = next_frame(stream, timeout, "resumed").await?;
    if frame.op != OP_RESUMED {
        return Err(GatewayError::Protocol(format!(
            "expected resumed (op {}), got op {}",
            OP_RESUMED, frame.op
        )));
    }
    if let Some(seq) = frame.s {
        inner.observe_sequence(seq);
    }
    info!(
        "Session {} resumed at sequence {}",
        session.session_id, session.last_sequence
    );
    Ok(())
}

async fn next_frame(
    stream: &mut dyn FrameStream,
    timeout: Duration,
    waiting_for: &'static str,
) -> Result<RawFrame, GatewayError> {
    let frame = tokio::time::timeout(timeout, stream.next())
        .await
        .map_err(|_| GatewayError::Timeout(waiting_for))??;

    match frame {
        Frame::Text(text) => Ok(RawFrame::decode(&text)?),
        Frame::Binary(_) => Err(TransportError::UnsupportedFrame("binary").into()),
        Frame::Close(reason) => Err(GatewayError::Protocol(format!(
            "connection closed while waiting for {}: {}",
            waiting_for,
            reason.unwrap_or_default()
        ))),
    }
}
