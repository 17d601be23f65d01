//! Heartbeat task
//!
//! One task per connection. Sends `op 1` with the last observed sequence on
//! every tick and watches the event feed for acks to measure latency. Acks
//! are diagnostic only; a missing ack never tears the connection down.

use log::{debug, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connection::GatewayInner;
use crate::error::{GatewayError, TransportError};
use crate::event::{GatewayEvent, HeartbeatTiming, Listener};
use crate::messages::encode;
use crate::messages::frame::{OP_HEARTBEAT, OP_HEARTBEAT_ACK};
use crate::transport::Frame;

/// Encode a heartbeat; a zero sequence (nothing observed yet) goes out as
/// `null`.
pub(crate) fn heartbeat_frame(sequence: u64) -> Result<Frame, GatewayError> {
    let d = (sequence > 0).then_some(sequence);
    Ok(Frame::Text(encode(OP_HEARTBEAT, &d)?))
}

pub(crate) struct Heartbeat {
    pub(crate) inner: Arc<GatewayInner>,
    pub(crate) listener: Listener,
    pub(crate) outbound: mpsc::Sender<Frame>,
    pub(crate) stop: CancellationToken,
    pub(crate) interval: Duration,
}

impl Heartbeat {
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending: Option<(Instant, u64)> = None;

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    let sequence = self.inner.sequence();
                    match self.send(sequence).await {
                        Ok(()) => {
                            trace!("Heartbeat sent (seq {})", sequence);
                            pending = Some((Instant::now(), sequence));
                        }
                        Err(e) => warn!("Failed to send heartbeat: {}", e),
                    }
                }
                event = self.listener.recv() => match event {
                    None | Some(GatewayEvent::ConnectionClosed) => break,
                    Some(GatewayEvent::Dispatch(dispatch)) if dispatch.op() == OP_HEARTBEAT_ACK => {
                        dispatch.release();
                        if let Some((sent_at, sequence)) = pending.take() {
                            let timing = HeartbeatTiming {
                                sequence,
                                latency: sent_at.elapsed(),
                            };
                            self.inner.record_latency(timing.latency);
                            self.inner.registry.publish_heartbeat(timing);
                        }
                    }
                    Some(_) => {}
                },
            }
        }

        debug!("Heartbeat stopped");
    }

    async fn send(&self, sequence: u64) -> Result<(), GatewayError> {
        self.outbound
            .send(heartbeat_frame(sequence)?)
            .await
            .map_err(|_| TransportError::ChannelClosed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_frame() {
        assert_eq!(
            heartbeat_frame(0).unwrap(),
            Frame::Text(r#"{"op":1,"d":null}"#.to_string())
        );
        assert_eq!(
            heartbeat_frame(42).unwrap(),
            Frame::Text(r#"{"op":1,"d":42}"#.to_string())
        );
    }
}
