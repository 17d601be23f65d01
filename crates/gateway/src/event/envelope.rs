//! Pooled, reference-counted message envelopes
//!
//! The read loop decodes every frame into an envelope whose payload buffer
//! comes from an [`EventPool`]. Publishing shares the envelope with each live
//! listener; the last release hands the buffer back to the pool and clears
//! the payload.

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of idle buffers kept for reuse
pub const DEFAULT_MAX_IDLE: usize = 64;

/// Buffer pool for envelope payloads
pub struct EventPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    created: AtomicUsize,
    returned: AtomicUsize,
}

impl EventPool {
    pub fn new(max_idle: usize) -> Arc<Self> {
        Arc::new(EventPool {
            free: Mutex::new(Vec::new()),
            max_idle,
            created: AtomicUsize::new(0),
            returned: AtomicUsize::new(0),
        })
    }

    /// Envelopes created and not yet returned
    pub fn outstanding(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.returned.load(Ordering::SeqCst)
    }

    /// Envelopes returned so far
    pub fn returned(&self) -> usize {
        self.returned.load(Ordering::SeqCst)
    }

    /// Buffers waiting for reuse
    pub fn idle_buffers(&self) -> usize {
        self.free.lock().len()
    }

    /// Build an envelope around a copy of `payload`.
    pub(crate) fn envelope(
        self: &Arc<Self>,
        op: u8,
        sequence: Option<u64>,
        event_name: Option<String>,
        payload: &[u8],
    ) -> Envelope {
        let mut buffer = self.free.lock().pop().unwrap_or_default();
        buffer.extend_from_slice(payload);
        self.created.fetch_add(1, Ordering::SeqCst);

        Envelope {
            inner: Arc::new(EnvelopeInner {
                op,
                sequence,
                event_name,
                payload: RwLock::new(buffer),
                refs: AtomicUsize::new(0),
                pool: Arc::clone(self),
            }),
        }
    }

    fn give_back(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        {
            let mut free = self.free.lock();
            if free.len() < self.max_idle {
                free.push(buffer);
            }
        }
        self.returned.fetch_add(1, Ordering::SeqCst);
    }
}

struct EnvelopeInner {
    op: u8,
    sequence: Option<u64>,
    event_name: Option<String>,
    payload: RwLock<Vec<u8>>,
    refs: AtomicUsize,
    pool: Arc<EventPool>,
}

impl EnvelopeInner {
    /// Drop one reference; the 1 -> 0 transition returns the buffer.
    fn release(&self) {
        match self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                let buffer = std::mem::take(&mut *self.payload.write());
                self.pool.give_back(buffer);
            }
            Ok(_) => {}
            Err(_) => {
                debug_assert!(false, "envelope released more times than it was shared");
                log::error!(
                    "Envelope (op {}, {:?}) released more times than it was shared",
                    self.op,
                    self.event_name
                );
            }
        }
    }
}

/// A freshly decoded envelope, not yet shared with anyone
pub(crate) struct Envelope {
    inner: Arc<EnvelopeInner>,
}

impl Envelope {
    /// Hand out exactly `n` references. With no listeners the buffer goes
    /// straight back to the pool.
    pub(crate) fn share(self, n: usize) -> Vec<DispatchRef> {
        if n == 0 {
            self.inner.refs.store(1, Ordering::Release);
            self.inner.release();
            return Vec::new();
        }

        self.inner.refs.store(n, Ordering::Release);
        (0..n)
            .map(|_| DispatchRef {
                inner: Arc::clone(&self.inner),
                released: false,
            })
            .collect()
    }
}

/// One listener's reference to a dispatched envelope
///
/// Released exactly once: explicitly with [`DispatchRef::release`] or
/// implicitly on drop.
pub struct DispatchRef {
    inner: Arc<EnvelopeInner>,
    released: bool,
}

impl DispatchRef {
    pub fn op(&self) -> u8 {
        self.inner.op
    }

    /// Sequence number, present on server-originated dispatches
    pub fn sequence(&self) -> Option<u64> {
        self.inner.sequence
    }

    pub fn event_name(&self) -> Option<&str> {
        self.inner.event_name.as_deref()
    }

    /// Raw JSON payload (`d`)
    pub fn payload(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.inner.payload.read(), |buffer| buffer.as_slice())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload())
    }

    /// Give the reference back
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.release();
        }
    }
}

impl Drop for DispatchRef {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for DispatchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRef")
            .field("op", &self.inner.op)
            .field("sequence", &self.inner.sequence)
            .field("event_name", &self.inner.event_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_release_returns_buffer_once() {
        let pool = EventPool::new(8);
        let envelope = pool.envelope(0, Some(1), Some("READY".to_string()), b"{\"x\":1}");
        let refs = envelope.share(3);
        assert_eq!(pool.outstanding(), 1);

        let mut refs = refs.into_iter();
        let first = refs.next().unwrap();
        assert_eq!(&*first.payload(), b"{\"x\":1}");
        first.release();
        assert_eq!(pool.returned(), 0);

        for r in refs {
            r.release();
        }
        assert_eq!(pool.returned(), 1);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_buffers(), 1);
    }

    #[test]
    fn test_no_listeners_returns_immediately() {
        let pool = EventPool::new(8);
        let refs = pool.envelope(11, None, None, b"null").share(0);

        assert!(refs.is_empty());
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.returned(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let pool = EventPool::new(8);
        let refs = pool.envelope(0, Some(2), None, b"{}").share(2);
        drop(refs);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_leak_is_visible() {
        let pool = EventPool::new(8);
        let mut refs = pool.envelope(0, Some(2), None, b"{}").share(2);

        let leaked = refs.pop().unwrap();
        std::mem::forget(leaked);
        drop(refs);

        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.returned(), 0);
    }

    #[test]
    fn test_buffers_reused() {
        let pool = EventPool::new(1);
        pool.envelope(0, Some(1), None, b"first").share(1);
        assert_eq!(pool.idle_buffers(), 1);

        let refs = pool.envelope(0, Some(2), None, b"second").share(1);
        assert_eq!(pool.idle_buffers(), 0);
        assert_eq!(&*refs[0].payload(), b"second");
    }

    #[test]
    fn test_decode_payload() {
        let pool = EventPool::new(1);
        let refs = pool.envelope(0, Some(1), None, b"{\"heartbeat_interval\":45000}").share(1);
        let hello: crate::messages::Hello = refs[0].decode().unwrap();
        assert_eq!(hello.heartbeat_interval, 45000);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released more times")]
    fn test_over_release_panics_in_debug() {
        let pool = EventPool::new(1);
        let refs = pool.envelope(0, Some(1), None, b"{}").share(1);
        let inner = Arc::clone(&refs[0].inner);
        drop(refs);
        inner.release();
    }
}
