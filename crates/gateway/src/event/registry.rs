//! Listener directory and fan-out
//!
//! Each listener owns a bounded queue. Publishing walks the directory under a
//! read lock and `try_send`s into every live slot, so a stalled consumer
//! loses events instead of blocking the publisher or its peers.
//!
//! Slots are stable for the life of a registration: cancelling tombstones
//! the slot and later registrations reuse tombstones before the directory
//! grows.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use super::envelope::Envelope;
use super::{ConnectionState, GatewayEvent, HeartbeatTiming};

/// Default per-listener queue length
pub const DEFAULT_LISTENER_CAPACITY: usize = 256;

pub struct ListenerRegistry {
    slots: RwLock<Vec<Option<mpsc::Sender<GatewayEvent>>>>,
    capacity: usize,
}

impl ListenerRegistry {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(ListenerRegistry {
            slots: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        })
    }

    /// Register a new listener
    pub fn listen(self: &Arc<Self>) -> Listener {
        let (tx, rx) = mpsc::channel(self.capacity);

        let slot = {
            let mut slots = self.slots.write();
            match slots.iter().position(Option::is_none) {
                Some(free) => {
                    slots[free] = Some(tx);
                    free
                }
                None => {
                    slots.push(Some(tx));
                    slots.len() - 1
                }
            }
        };

        Listener {
            rx,
            cancel: ListenerCancel {
                registry: Arc::downgrade(self),
                slot,
                done: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Directory length, tombstones included
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Live registrations
    pub fn active(&self) -> usize {
        self.slots.read().iter().flatten().count()
    }

    pub(crate) fn publish_state(&self, state: ConnectionState) {
        self.broadcast(|| GatewayEvent::StateChanged(state));
    }

    pub(crate) fn publish_closed(&self) {
        self.broadcast(|| GatewayEvent::ConnectionClosed);
    }

    pub(crate) fn publish_max_reconnect(&self) {
        self.broadcast(|| GatewayEvent::MaxReconnectReached);
    }

    pub(crate) fn publish_heartbeat(&self, timing: HeartbeatTiming) {
        self.broadcast(|| GatewayEvent::Heartbeat(timing));
    }

    /// Share `envelope` with every live listener. The reference count starts
    /// at the number of live slots.
    pub(crate) fn publish_envelope(&self, envelope: Envelope) {
        let slots = self.slots.read();
        let live: Vec<&mpsc::Sender<GatewayEvent>> = slots.iter().flatten().collect();
        let refs = envelope.share(live.len());

        for (tx, dispatch) in live.into_iter().zip(refs) {
            deliver(tx, GatewayEvent::Dispatch(dispatch));
        }
    }

    fn broadcast(&self, make: impl Fn() -> GatewayEvent) {
        let slots = self.slots.read();
        for tx in slots.iter().flatten() {
            deliver(tx, make());
        }
    }

    fn tombstone(&self, slot: usize) {
        let mut slots = self.slots.write();
        if let Some(entry) = slots.get_mut(slot) {
            *entry = None;
        }
    }
}

fn deliver(tx: &mpsc::Sender<GatewayEvent>, event: GatewayEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        // Dropping the rejected event releases any envelope reference in it
        Err(TrySendError::Full(event)) => {
            log::warn!("Listener queue full, dropping {:?}", event);
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Idempotent deregistration handle
#[derive(Clone)]
pub struct ListenerCancel {
    registry: Weak<ListenerRegistry>,
    slot: usize,
    done: Arc<AtomicBool>,
}

impl ListenerCancel {
    pub fn cancel(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.tombstone(self.slot);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// A registered feed of gateway events
///
/// Dropping the listener cancels its registration.
pub struct Listener {
    rx: mpsc::Receiver<GatewayEvent>,
    cancel: ListenerCancel,
}

impl Listener {
    /// Next event; `None` once cancelled and drained
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn cancel_handle(&self) -> ListenerCancel {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn slot(&self) -> usize {
        self.cancel.slot
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
