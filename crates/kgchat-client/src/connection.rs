//! Connection lifecycle.
//!
//! [`ConnectionManager`] owns the one transport to the backend:
//!
//! - **Connect**: a no-op while Open. Any other existing transport has its
//!   reconnect flag cleared and is cancelled (and its task awaited) before a
//!   new one is dialed, so two transports are never live at once.
//! - **Register**: the first frame on every new transport is
//!   `register_session` with the durable identity. The state only becomes
//!   Open after it is written, so no chat frame can precede it.
//! - **Run**: a spawned task `select!`s over cancellation, inbound frames,
//!   outbound frames and the keepalive ping.
//! - **Reconnect**: an unexpected close schedules exactly one attempt after
//!   a fixed delay; a failed attempt schedules the next.
//! - **Teardown**: [`ConnectionManager::disconnect`] clears the reconnect
//!   flag before closing.
//!
//! Inbound text frames are forwarded in arrival order on the channel
//! returned by [`ConnectionManager::new`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use kgchat_core::{ClientError, OutboundRequest, TransportError};
use kgchat_settings::KgchatSettings;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::identity::SessionIdentityStore;
use crate::transport::{Connector, Transport};

/// Lifecycle state of the current connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// Dialing, or registering the session.
    Connecting,
    /// Registered; sends are accepted.
    Open,
    /// Caller-initiated close in progress.
    Closing,
}

/// Connection timing and endpoint.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Backend endpoint.
    pub url: String,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Delay before the first connect made by [`ConnectionManager::start`].
    pub startup_delay: Duration,
    /// Keepalive ping interval while Open.
    pub ping_interval: Option<Duration>,
}

impl ConnectionConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &KgchatSettings) -> Self {
        let c = &settings.connection;
        Self {
            url: settings.server.url.clone(),
            reconnect_delay: Duration::from_millis(c.reconnect_delay_ms),
            startup_delay: Duration::from_millis(c.startup_delay_ms),
            ping_interval: (c.ping_interval_ms > 0).then(|| Duration::from_millis(c.ping_interval_ms)),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_settings(&KgchatSettings::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

/// One transport attempt, from dial to close.
struct Slot {
    id: u64,
    /// Cleared before any caller-initiated close.
    reconnect: Arc<AtomicBool>,
    cancel: CancellationToken,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl Slot {
    fn new(id: u64) -> Self {
        Self {
            id,
            reconnect: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
            outbound: None,
            task: None,
        }
    }

    /// Disable reconnect, then cancel. Returns the task to await.
    fn retire(mut self) -> Option<JoinHandle<()>> {
        self.reconnect.store(false, Ordering::Release);
        self.cancel.cancel();
        self.task.take()
    }
}

struct Inner {
    state: ConnectionState,
    current: Option<Slot>,
    next_id: u64,
    shut_down: bool,
}

struct Shared {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    identity: Arc<SessionIdentityStore>,
    inner: Mutex<Inner>,
    frames: mpsc::UnboundedSender<String>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_pending: AtomicBool,
    live_transports: AtomicUsize,
}

impl Shared {
    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state != state {
            debug!(from = ?inner.state, to = ?state, "connection state");
            inner.state = state;
            let _ = self.state_tx.send_replace(state);
        }
    }
}

enum CloseReason {
    Requested,
    Remote,
    Failed(TransportError),
}

// ─────────────────────────────────────────────────────────────────────────────
// ConnectionManager
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of the backend transport. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a disconnected manager and the receiver for inbound frames.
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        identity: Arc<SessionIdentityStore>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            config,
            connector,
            identity,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                current: None,
                next_id: 0,
                shut_down: false,
            }),
            frames,
            state_tx,
            reconnect_pending: AtomicBool::new(false),
            live_transports: AtomicUsize::new(0),
        });
        (Self { shared }, frames_rx)
    }

    /// Wait the startup delay, then connect. Failures are left to the
    /// reconnect loop.
    pub async fn start(&self) {
        tokio::time::sleep(self.shared.config.startup_delay).await;
        if let Err(e) = self.connect().await {
            debug!(error = %e, "initial connect failed; reconnect scheduled");
        }
    }

    /// Open a transport unless one is already Open.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (slot_id, reconnect, cancel, stale_task) = {
            let mut inner = self.shared.inner.lock();
            if inner.state == ConnectionState::Open && inner.current.is_some() {
                return Ok(());
            }
            let stale_task = inner.current.take().and_then(|old| {
                debug!(transport_id = old.id, state = ?inner.state, "force-closing existing transport");
                old.retire()
            });
            inner.shut_down = false;
            inner.next_id += 1;
            let slot = Slot::new(inner.next_id);
            let handles = (slot.id, slot.reconnect.clone(), slot.cancel.clone());
            inner.current = Some(slot);
            self.shared.set_state(&mut inner, ConnectionState::Connecting);
            (handles.0, handles.1, handles.2, stale_task)
        };

        if let Some(task) = stale_task {
            let _ = task.await;
        }

        let url = self.shared.config.url.clone();
        info!(url = %url, transport_id = slot_id, "connecting");
        let attempt = tokio::select! {
            result = self.shared.connector.connect(&url) => result,
            () = cancel.cancelled() => {
                debug!(transport_id = slot_id, "connect attempt superseded");
                return Err(TransportError::Closed.into());
            }
        };
        match attempt {
            Ok(transport) => {
                let _ = self.shared.live_transports.fetch_add(1, Ordering::AcqRel);
                self.register_and_run(slot_id, reconnect, cancel, transport).await
            }
            Err(e) => {
                warn!(error = %e, transport_id = slot_id, "connect failed");
                self.on_attempt_failed(slot_id, &reconnect);
                Err(e.into())
            }
        }
    }

    async fn register_and_run(
        &self,
        slot_id: u64,
        reconnect: Arc<AtomicBool>,
        cancel: CancellationToken,
        mut transport: Transport,
    ) -> Result<(), ClientError> {
        let session_id = self.shared.identity.get_or_create_session_id();
        let registered = match (OutboundRequest::RegisterSession {
            browser_session_id: session_id,
        })
        .to_frame()
        {
            Ok(frame) => transport.sink.send_text(frame).await.map_err(ClientError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = registered {
            warn!(error = %e, transport_id = slot_id, "register_session failed");
            self.release(&mut transport).await;
            self.on_attempt_failed(slot_id, &reconnect);
            return Err(e);
        }

        let superseded = {
            let mut inner = self.shared.inner.lock();
            let is_current = inner.current.as_ref().is_some_and(|s| s.id == slot_id);
            if is_current {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(run_transport(
                    self.clone(),
                    slot_id,
                    reconnect,
                    cancel,
                    transport,
                    out_rx,
                ));
                if let Some(slot) = inner.current.as_mut() {
                    slot.outbound = Some(out_tx);
                    slot.task = Some(task);
                }
                self.shared.set_state(&mut inner, ConnectionState::Open);
                None
            } else {
                Some(transport)
            }
        };

        match superseded {
            None => {
                info!(transport_id = slot_id, "connection open");
                Ok(())
            }
            Some(mut transport) => {
                debug!(transport_id = slot_id, "transport superseded before open; closing");
                self.release(&mut transport).await;
                Err(TransportError::Closed.into())
            }
        }
    }

    /// Send one request. Fails with [`ClientError::NotConnected`] unless Open.
    pub fn send(&self, request: &OutboundRequest) -> Result<(), ClientError> {
        let inner = self.shared.inner.lock();
        if inner.state != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let outbound = inner
            .current
            .as_ref()
            .and_then(|s| s.outbound.as_ref())
            .ok_or(ClientError::NotConnected)?;
        let frame = request.to_frame()?;
        outbound.send(frame).map_err(|_| ClientError::NotConnected)
    }

    /// Close the transport without reconnecting.
    pub async fn disconnect(&self) {
        let task = {
            let mut inner = self.shared.inner.lock();
            inner.shut_down = true;
            match inner.current.take() {
                Some(slot) => {
                    info!(transport_id = slot.id, "closing connection");
                    self.shared.set_state(&mut inner, ConnectionState::Closing);
                    slot.retire()
                }
                None => {
                    self.shared
                        .set_state(&mut inner, ConnectionState::Disconnected);
                    return;
                }
            }
        };
        if let Some(task) = task {
            let _ = task.await;
        }
        let mut inner = self.shared.inner.lock();
        if inner.current.is_none() {
            self.shared
                .set_state(&mut inner, ConnectionState::Disconnected);
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Whether sends are currently accepted.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Resolve once the state is Open.
    pub async fn wait_until_open(&self) {
        let mut rx = self.subscribe_state();
        // The sender lives in `shared`, so this only ends on Open.
        let _ = rx.wait_for(|s| *s == ConnectionState::Open).await;
    }

    /// Transports dialed and not yet closed.
    pub fn live_transports(&self) -> usize {
        self.shared.live_transports.load(Ordering::Acquire)
    }

    // ── Close handling ──────────────────────────────────────────────────────

    async fn release(&self, transport: &mut Transport) {
        if let Err(e) = transport.sink.close().await {
            debug!(error = %e, "error closing transport");
        }
        let _ = self.shared.live_transports.fetch_sub(1, Ordering::AcqRel);
    }

    /// Drop the slot if it is still current and reconnect if allowed.
    fn on_attempt_failed(&self, slot_id: u64, reconnect: &AtomicBool) {
        let was_current = {
            let mut inner = self.shared.inner.lock();
            let is_current = inner.current.as_ref().is_some_and(|s| s.id == slot_id);
            if is_current {
                inner.current = None;
                self.shared
                    .set_state(&mut inner, ConnectionState::Disconnected);
            }
            is_current
        };
        if was_current && reconnect.load(Ordering::Acquire) {
            self.schedule_reconnect();
        }
    }

    fn on_transport_closed(&self, slot_id: u64, reconnect: &AtomicBool, reason: CloseReason) {
        match &reason {
            CloseReason::Requested => debug!(transport_id = slot_id, "transport closed on request"),
            CloseReason::Remote => info!(transport_id = slot_id, "transport closed by peer"),
            CloseReason::Failed(e) => warn!(transport_id = slot_id, error = %e, "transport failed"),
        }
        self.on_attempt_failed(slot_id, reconnect);
    }

    fn schedule_reconnect(&self) {
        if self.shared.reconnect_pending.swap(true, Ordering::AcqRel) {
            debug!("reconnect already scheduled");
            return;
        }
        let delay = self.shared.config.reconnect_delay;
        info!(delay_ms = delay.as_millis(), "scheduling reconnect");
        let manager = self.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager
                .shared
                .reconnect_pending
                .store(false, Ordering::Release);
            if manager.shared.inner.lock().shut_down {
                debug!("reconnect cancelled by teardown");
                return;
            }
            if let Err(e) = manager.connect().await {
                debug!(error = %e, "reconnect attempt failed");
            }
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport task
// ─────────────────────────────────────────────────────────────────────────────

async fn run_transport(
    manager: ConnectionManager,
    slot_id: u64,
    reconnect: Arc<AtomicBool>,
    cancel: CancellationToken,
    transport: Transport,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let Transport { mut sink, mut source } = transport;
    let mut ping = manager.shared.config.ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let ping_frame = OutboundRequest::Ping.to_frame().ok();

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break CloseReason::Requested,
            frame = source.next_text() => match frame {
                Some(Ok(text)) => {
                    if manager.shared.frames.send(text).is_err() {
                        debug!("frame receiver dropped");
                    }
                }
                Some(Err(e)) => break CloseReason::Failed(e),
                None => break CloseReason::Remote,
            },
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send_text(text).await {
                    break CloseReason::Failed(e);
                }
            }
            () = next_tick(&mut ping) => {
                if let Some(frame) = &ping_frame {
                    if let Err(e) = sink.send_text(frame.clone()).await {
                        break CloseReason::Failed(e);
                    }
                }
            }
        }
    };

    if let Err(e) = sink.close().await {
        debug!(transport_id = slot_id, error = %e, "error closing transport");
    }
    let _ = manager
        .shared
        .live_transports
        .fetch_sub(1, Ordering::AcqRel);
    manager.on_transport_closed(slot_id, &reconnect, reason);
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
