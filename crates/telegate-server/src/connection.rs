//! Per-connection lifecycle and I/O tasks
//!
//! Each accepted socket gets one reader task (this module's
//! [`run_connection`], driving a `FramedRead`) and one writer task draining
//! the outbound queue into a `FramedWrite`. The shared [`ConnHandle`] is what
//! the registry, the sweep, and application code see.
//!
//! Teardown is a one-shot transition: I/O errors, peer EOF, the idle sweep,
//! and explicit resets all race to cancel the same token, and the first
//! caller of the Closing transition performs the registry bookkeeping. A
//! connection never regresses to an earlier state and its identity, once
//! learned, never changes.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use telegate_protocol::FrameCodec;

use crate::error::ServerError;
use crate::server::ServerInner;

/// Unique identifier assigned to a connection at accept time.
///
/// Independent of the device identity and never reused, which makes it safe
/// to compare at registry-eviction time (unlike socket handles, which the OS
/// recycles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnState {
    /// Accepted, device identity not yet known
    Open = 0,
    /// Device identity learned from the first identifying frame
    Identified = 1,
    /// Teardown initiated
    Closing = 2,
    /// Socket released and registry bookkeeping resolved (terminal)
    Closed = 3,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Open,
            1 => ConnState::Identified,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

/// Shared view of one live connection
pub struct ConnHandle {
    id: ConnId,
    remote_addr: SocketAddr,
    identity: OnceLock<String>,
    state: AtomicU8,
    last_activity: Mutex<Instant>,
    outbound_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl ConnHandle {
    fn new(remote_addr: SocketAddr, outbound_tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            id: ConnId::new(),
            remote_addr,
            identity: OnceLock::new(),
            state: AtomicU8::new(ConnState::Open as u8),
            last_activity: Mutex::new(Instant::now()),
            outbound_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Unique connection identifier
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Peer address of the underlying socket
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Device identity, once learned
    pub fn identity(&self) -> Option<&str> {
        self.identity.get().map(String::as_str)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Time since the last frame arrived on this connection
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Queue a packed frame for the writer task.
    ///
    /// Exerts backpressure when the outbound queue is full; fails once the
    /// connection has begun closing.
    pub async fn send(&self, frame: Bytes) -> Result<(), ServerError> {
        if self.state() >= ConnState::Closing {
            return Err(ServerError::ConnectionClosed);
        }
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| ServerError::ConnectionClosed)
    }

    /// Request teardown. Safe to call from any task, any number of times.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Record the device identity; returns false when already set.
    fn set_identity(&self, identity: &str) -> bool {
        if self.identity.set(identity.to_string()).is_err() {
            return false;
        }
        // Open -> Identified; losing the exchange means teardown won the
        // race, in which case the state must not regress.
        let _ = self.state.compare_exchange(
            ConnState::Open as u8,
            ConnState::Identified as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        true
    }

    /// One-shot transition into Closing; true only for the first caller.
    fn transition_to_closing(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current >= ConnState::Closing as u8 {
                return false;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    ConnState::Closing as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    fn mark_closed(&self) {
        self.state.store(ConnState::Closed as u8, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<Self> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(Self::new(([127, 0, 0, 1], 0).into(), tx))
    }
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("identity", &self.identity())
            .field("state", &self.state())
            .finish()
    }
}

/// Drive one accepted socket until teardown.
///
/// Spawned by the accept loop; owns the socket halves for the connection's
/// whole life.
pub(crate) async fn run_connection(stream: TcpStream, addr: SocketAddr, inner: Arc<ServerInner>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(inner.config.outbound_queue);
    let handle = Arc::new(ConnHandle::new(addr, outbound_tx));
    inner.conns.insert(handle.id(), Arc::clone(&handle));

    debug!(conn = %handle.id(), %addr, "connection accepted");

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, inner.dialect.codec());
    let writer = FramedWrite::new(write_half, inner.dialect.codec());
    let writer_task = tokio::spawn(write_loop(
        writer,
        outbound_rx,
        handle.cancel.clone(),
        handle.id(),
    ));

    inner.dispatcher.handler().on_opened(Arc::clone(&handle)).await;
    let mut queue = inner.dispatcher.attach(Arc::clone(&handle));

    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => break,

            frame = reader.next() => match frame {
                Some(Ok(frame)) => {
                    handle.touch();
                    process_frame(&handle, &inner, &mut queue, &frame).await;
                }
                Some(Err(e)) => {
                    // Framing is lost; the stream cannot resynchronize.
                    warn!(conn = %handle.id(), error = %e, "unframeable stream, closing connection");
                    break;
                }
                None => {
                    debug!(conn = %handle.id(), "peer closed connection");
                    break;
                }
            },
        }
    }

    // Deliver messages still queued for this connection before the close
    // notifications fire.
    queue.shutdown().await;
    teardown(&handle, &inner).await;
    let _ = writer_task.await;
}

/// Parse one extracted frame and route it to identification and dispatch.
///
/// Parse failures discard the frame and keep the connection alive: the
/// framing boundaries are still known.
async fn process_frame(
    handle: &Arc<ConnHandle>,
    inner: &Arc<ServerInner>,
    queue: &mut crate::dispatch::DispatchQueue,
    frame: &[u8],
) {
    let msg = match inner.dialect.parse(frame) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(conn = %handle.id(), error = %e, "dropping unparseable frame");
            return;
        }
    };

    let identity = msg.device_id();
    if identity.is_empty() {
        // Parsed but anonymous: nothing to register, nothing to deliver.
        debug!(conn = %handle.id(), "dropping frame with empty device identity");
        return;
    }

    if handle.identity().is_none() && handle.set_identity(identity) {
        let identity = identity.to_string();
        info!(conn = %handle.id(), %identity, "connection identified");
        if let Some(displaced) = inner.registry.identify(&identity, Arc::clone(handle)) {
            debug!(
                conn = %handle.id(),
                old_conn = %displaced.id(),
                %identity,
                "reconnect displaced a stale connection"
            );
        }
        inner
            .dispatcher
            .handler()
            .on_identity_changed(Arc::clone(handle), &identity, true)
            .await;
    }

    inner.dispatcher.dispatch(queue, handle, msg).await;
}

/// Resolve teardown exactly once per connection.
async fn teardown(handle: &Arc<ConnHandle>, inner: &Arc<ServerInner>) {
    if !handle.transition_to_closing() {
        return;
    }
    handle.cancel.cancel();
    inner.conns.remove(&handle.id());

    if let Some(identity) = handle.identity() {
        if inner.registry.evict_if_owner(identity, handle) {
            let identity = identity.to_string();
            info!(conn = %handle.id(), %identity, "device disconnected");
            inner
                .dispatcher
                .handler()
                .on_identity_changed(Arc::clone(handle), &identity, false)
                .await;
            inner.dispatcher.handler().on_closed(Arc::clone(handle)).await;
        } else {
            // A newer connection owns this identity; stay silent.
            debug!(conn = %handle.id(), %identity, "stale teardown, identity owned elsewhere");
        }
    } else {
        debug!(conn = %handle.id(), "unidentified connection closed");
    }

    handle.mark_closed();
}

/// Writer task: drain the outbound queue into the socket.
async fn write_loop(
    mut writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    conn_id: ConnId,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = outbound_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = writer.send(frame).await {
                        warn!(conn = %conn_id, error = %e, "write failed, closing connection");
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }
}
