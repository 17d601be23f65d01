//! Connection state machine
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake ok--> Connected
//!      ^                                                      |
//!      +------------------ disconnect(reset, reconnect) ------+
//! ```
//!
//! Each physical connection gets three tasks: a writer that owns the sink, a
//! read loop that republishes every frame, and a heartbeat. They share a
//! per-connection stop token; teardown cancels it and bumps the epoch so
//! a stale loop can never tear down its successor.
//!
//! Read failures and server close frames tear down with the session kept
//! and schedule a background reconnect. Background attempts never surface an
//! error to a caller; they log and drive the backoff instead.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use herald_ratelimit::{IdentifyLimiter, RateLimitError};

use crate::config::GatewayConfig;
use crate::error::{ConfigError, GatewayError, TransportError};
use crate::event::envelope::DEFAULT_MAX_IDLE;
use crate::event::{ConnectionState, EventPool, Listener, ListenerRegistry};
use crate::handshake;
use crate::heartbeat::{Heartbeat, heartbeat_frame};
use crate::messages::frame::{OP_HEARTBEAT, OP_INVALID_SESSION};
use crate::messages::{RawFrame, encode};
use crate::session::SessionContext;
use crate::transport::{Connection, Dialer, Frame, FrameSink, FrameStream};

/// Failed background attempts tolerated before each further attempt waits
/// out [`RECONNECT_COOLDOWN`]
pub const MAX_RECONNECTION_ATTEMPTS: u32 = 3;

pub const RECONNECT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Outbound frames queued per connection
const OUTBOUND_CAPACITY: usize = 64;

/// The live half of one physical connection
struct Link {
    epoch: u64,
    outbound: mpsc::Sender<Frame>,
    stop: CancellationToken,
}

pub(crate) struct GatewayInner {
    pub(crate) config: GatewayConfig,
    dialer: Arc<dyn Dialer>,
    identify_limiter: Option<Arc<IdentifyLimiter>>,
    pub(crate) registry: Arc<ListenerRegistry>,
    pub(crate) pool: Arc<EventPool>,
    state: Mutex<ConnectionState>,
    session: Mutex<SessionContext>,
    sequence: AtomicU64,
    link: Mutex<Option<Link>>,
    next_epoch: AtomicU64,
    latency: Mutex<Option<Duration>>,
    /// Cancelled by an explicit disconnect to abandon pending reconnects
    reconnects: Mutex<CancellationToken>,
    reconnect_pending: AtomicBool,
}

impl GatewayInner {
    pub(crate) fn status(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn session(&self) -> SessionContext {
        self.session.lock().clone()
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub(crate) fn observe_sequence(&self, seq: u64) {
        self.sequence.fetch_max(seq, Ordering::SeqCst);
    }

    pub(crate) fn store_session(&self, session_id: String, resume_url: String) {
        let mut session = self.session.lock();
        session.session_id = session_id;
        session.resume_url = resume_url;
    }

    pub(crate) fn record_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Republish an inbound frame as a dispatch event
    pub(crate) fn publish_frame(&self, frame: &RawFrame) {
        let envelope = self.pool.envelope(
            frame.op,
            frame.s,
            frame.t.clone(),
            frame.payload_json().as_bytes(),
        );
        self.registry.publish_envelope(envelope);
    }

    /// Queue a frame on the current connection
    pub(crate) async fn send_frame<T: Serialize>(&self, op: u8, d: &T) -> Result<(), GatewayError> {
        let text = encode(op, d)?;
        let outbound = self
            .link
            .lock()
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or(GatewayError::NotConnected)?;

        outbound
            .send(Frame::Text(text))
            .await
            .map_err(|_| TransportError::ChannelClosed.into())
    }

    fn connect_url(&self, target: &str) -> Result<String, GatewayError> {
        let mut url = url::Url::parse(target)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("v", &self.config.version.to_string())
                .append_pair("encoding", "json");
            if self.config.compress {
                query.append_pair("compress", "zlib-stream");
            }
        }
        Ok(url.into())
    }

    /// Open a connection and run the handshake.
    ///
    /// `background` marks reconnect attempts; their dial failures are left
    /// to the reconnect task to reschedule.
    async fn connect(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        background: bool,
    ) -> Result<(), GatewayError> {
        let open = self.link.lock().as_ref().map(|link| link.epoch);
        if let Some(epoch) = open {
            debug!("Closing open connection (epoch {}) before connecting", epoch);
            self.teardown(Some(epoch), false, false);
        }

        let (resume, target) = {
            let session = self.session.lock();
            let resume = session.is_resumable();
            let target = if resume && !session.resume_url.is_empty() {
                session.resume_url.clone()
            } else {
                self.config.url.clone()
            };
            (resume, target)
        };
        let url = self.connect_url(&target)?;

        if !resume && let Some(limiter) = &self.identify_limiter {
            limiter.acquire(cancel).await.map_err(|e| match e {
                RateLimitError::Cancelled => GatewayError::Cancelled,
                other => GatewayError::RateLimit(other),
            })?;
        }

        debug!(
            "Dialing {} ({})",
            url,
            if resume { "resume" } else { "identify" }
        );
        let Connection { sink, mut stream } = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            dialed = self.dialer.dial(&url) => dialed?,
        };

        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let stop = CancellationToken::new();
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.state.lock();
            *self.link.lock() = Some(Link {
                epoch,
                outbound: outbound.clone(),
                stop: stop.clone(),
            });
            *state = ConnectionState::Connecting;
        }
        self.registry.publish_state(ConnectionState::Connecting);
        tokio::spawn(write_loop(sink, rx, stop.clone()));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            _ = stop.cancelled() => Err(GatewayError::Protocol(
                "connection closed during handshake".to_string(),
            )),
            result = handshake::perform(self, stream.as_mut(), resume) => result,
        };

        let hello = match result {
            Ok(hello) => hello,
            Err(GatewayError::Cancelled) => {
                self.teardown(Some(epoch), false, false);
                return Err(GatewayError::Cancelled);
            }
            Err(e) => {
                warn!("Handshake failed: {}", e);
                if self.teardown(Some(epoch), true, true) {
                    debug!(
                        "Session reset after failed {} handshake",
                        if background { "background" } else { "initial" }
                    );
                }
                return Err(e);
            }
        };

        {
            let mut state = self.state.lock();
            let current = self.link.lock().as_ref().map(|link| link.epoch) == Some(epoch);
            if !current {
                return Err(GatewayError::Protocol(
                    "connection superseded during handshake".to_string(),
                ));
            }
            *state = ConnectionState::Connected;
            self.session.lock().reconnection_attempts = 0;
        }
        self.registry.publish_state(ConnectionState::Connected);
        info!("Connected (epoch {})", epoch);

        let heartbeat = Heartbeat {
            inner: Arc::clone(self),
            listener: self.registry.listen(),
            outbound: outbound.clone(),
            stop: stop.clone(),
            interval: Duration::from_millis(hello.heartbeat_interval),
        };
        tokio::spawn(heartbeat.run());
        tokio::spawn(read_loop(Arc::clone(self), stream, outbound, stop, epoch));

        Ok(())
    }

    /// Force the state to Disconnected.
    ///
    /// With `expected` set, only tears down if that connection is still the
    /// current one and the state is not already Disconnected; returns whether
    /// a teardown happened.
    pub(crate) fn teardown(
        self: &Arc<Self>,
        expected: Option<u64>,
        reset: bool,
        reconnect: bool,
    ) -> bool {
        {
            let mut state = self.state.lock();
            let mut link = self.link.lock();

            if let Some(epoch) = expected {
                let current = link.as_ref().map(|l| l.epoch) == Some(epoch);
                if !current || *state == ConnectionState::Disconnected {
                    return false;
                }
            }

            if *state != ConnectionState::Disconnected || link.is_some() {
                self.registry.publish_closed();
                self.registry.publish_state(ConnectionState::Disconnected);
            }
            *state = ConnectionState::Disconnected;

            if let Some(link) = link.take() {
                link.stop.cancel();
            }

            let mut session = self.session.lock();
            if reset {
                session.clear();
                self.sequence.store(0, Ordering::SeqCst);
            } else {
                session.last_sequence = self.sequence.load(Ordering::SeqCst);
            }
        }

        if reconnect {
            self.schedule_reconnect();
        }
        true
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = self.reconnects.lock().clone();
        tokio::spawn(Arc::clone(self).reconnect(token));
    }

    async fn reconnect(self: Arc<Self>, token: CancellationToken) {
        let failed = self.session.lock().reconnection_attempts;
        if failed >= MAX_RECONNECTION_ATTEMPTS {
            warn!(
                "{} reconnection attempts failed, waiting {:?} before the next",
                failed, RECONNECT_COOLDOWN
            );
            self.registry.publish_max_reconnect();
            tokio::select! {
                _ = token.cancelled() => {
                    self.reconnect_pending.store(false, Ordering::SeqCst);
                    return;
                }
                _ = tokio::time::sleep(RECONNECT_COOLDOWN) => {}
            }
        }

        let attempt = {
            let mut session = self.session.lock();
            session.reconnection_attempts += 1;
            session.reconnection_attempts
        };
        self.reconnect_pending.store(false, Ordering::SeqCst);
        if token.is_cancelled() {
            return;
        }

        info!("Reconnection attempt {}", attempt);
        match self.connect(&token, true).await {
            Ok(()) => info!("Reconnected after {} attempt(s)", attempt),
            Err(GatewayError::Cancelled) => debug!("Reconnection abandoned"),
            Err(e) => {
                warn!("Reconnection attempt {} failed: {}", attempt, e);
                if !token.is_cancelled() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// Abandon pending reconnects and drop the session
    fn shutdown(self: &Arc<Self>) {
        {
            let mut reconnects = self.reconnects.lock();
            reconnects.cancel();
            *reconnects = CancellationToken::new();
        }
        self.teardown(None, true, false);
    }

    fn handle_text(self: &Arc<Self>, text: &str, outbound: &mpsc::Sender<Frame>, epoch: u64) -> bool {
        let frame = match RawFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return true;
            }
        };

        if let Some(seq) = frame.s {
            self.observe_sequence(seq);
        }
        self.publish_frame(&frame);

        match frame.op {
            OP_HEARTBEAT => {
                debug!("Server requested a heartbeat");
                match heartbeat_frame(self.sequence()) {
                    Ok(heartbeat) => {
                        if outbound.try_send(heartbeat).is_err() {
                            warn!("Failed to queue requested heartbeat");
                        }
                    }
                    Err(e) => error!("Failed to encode heartbeat: {}", e),
                }
                true
            }
            OP_INVALID_SESSION => {
                warn!("Session invalidated by server, identifying fresh");
                self.teardown(Some(epoch), true, true);
                false
            }
            _ => true,
        }
    }
}

async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::Receiver<Frame>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!("Write failed: {}", e);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Close failed: {}", e);
    }
}

async fn read_loop(
    inner: Arc<GatewayInner>,
    mut stream: Box<dyn FrameStream>,
    outbound: mpsc::Sender<Frame>,
    stop: CancellationToken,
    epoch: u64,
) {
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => break,
            frame = stream.next() => frame,
        };

        let reason = match frame {
            Ok(Frame::Text(text)) => {
                if inner.handle_text(&text, &outbound, epoch) {
                    continue;
                }
                break;
            }
            Ok(Frame::Binary(_)) => TransportError::UnsupportedFrame("binary").to_string(),
            Ok(Frame::Close(reason)) => {
                format!("closed by server: {}", reason.unwrap_or_default())
            }
            Err(e) => e.to_string(),
        };

        if inner.teardown(Some(epoch), false, true) {
            warn!("Connection lost: {}", reason);
        }
        break;
    }

    debug!("Read loop stopped (epoch {})", epoch);
}

/// Resumable, heartbeating gateway connection
///
/// Dropping the gateway closes the connection and abandons reconnects.
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, dialer: Arc<dyn Dialer>) -> Result<Self, ConfigError> {
        Self::build(config, dialer, None)
    }

    /// Gate every fresh identify on a limiter shared across gateways
    pub fn with_identify_limiter(
        config: GatewayConfig,
        dialer: Arc<dyn Dialer>,
        limiter: Arc<IdentifyLimiter>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, dialer, Some(limiter))
    }

    fn build(
        config: GatewayConfig,
        dialer: Arc<dyn Dialer>,
        identify_limiter: Option<Arc<IdentifyLimiter>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = ListenerRegistry::new(config.listener_capacity);

        Ok(Gateway {
            inner: Arc::new(GatewayInner {
                config,
                dialer,
                identify_limiter,
                registry,
                pool: EventPool::new(DEFAULT_MAX_IDLE),
                state: Mutex::new(ConnectionState::Disconnected),
                session: Mutex::new(SessionContext::default()),
                sequence: AtomicU64::new(0),
                link: Mutex::new(None),
                next_epoch: AtomicU64::new(0),
                latency: Mutex::new(None),
                reconnects: Mutex::new(CancellationToken::new()),
                reconnect_pending: AtomicBool::new(false),
            }),
        })
    }

    /// Connect, resuming the stored session if there is one.
    ///
    /// A failed handshake is returned here and also schedules a background
    /// reconnect with a fresh session. Cancelling `cancel` only stops this
    /// call.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), GatewayError> {
        self.inner.connect(cancel, false).await
    }

    /// Close the connection, forget the session and stop reconnecting
    pub fn disconnect(&self) {
        info!("Disconnecting");
        self.inner.shutdown();
    }

    pub fn status(&self) -> ConnectionState {
        self.inner.status()
    }

    /// Register a feed of gateway events
    pub fn subscribe(&self) -> Listener {
        self.inner.registry.listen()
    }

    pub fn session(&self) -> SessionContext {
        self.inner.session()
    }

    pub fn session_id(&self) -> Option<String> {
        let session = self.inner.session.lock();
        session
            .is_resumable()
            .then(|| session.session_id.clone())
    }

    /// Highest sequence number seen on the current session
    pub fn sequence(&self) -> u64 {
        self.inner.sequence()
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        *self.inner.latency.lock()
    }

    pub fn pool(&self) -> &Arc<EventPool> {
        &self.inner.pool
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Send an arbitrary control frame on the current connection
    pub async fn send<T: Serialize>(&self, op: u8, d: &T) -> Result<(), GatewayError> {
        self.inner.send_frame(op, d).await
    }

    pub(crate) fn inner(&self) -> &Arc<GatewayInner> {
        &self.inner
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}
