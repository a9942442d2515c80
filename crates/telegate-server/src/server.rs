//! Gateway server
//!
//! Owns the TCP listener, the live-connection table, the device registry,
//! and the idle sweep. One [`Server`] speaks exactly one wire dialect.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use telegate_protocol::Dialect;

use crate::config::ServerConfig;
use crate::connection::{run_connection, ConnHandle, ConnId};
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::events::EventHandler;
use crate::registry::DeviceRegistry;

pub(crate) struct ServerInner {
    pub(crate) config: ServerConfig,
    pub(crate) dialect: Dialect,
    pub(crate) registry: DeviceRegistry,
    pub(crate) conns: DashMap<ConnId, Arc<ConnHandle>>,
    pub(crate) dispatcher: Dispatcher,
    shutdown: CancellationToken,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
}

/// A running (or ready-to-run) gateway for one wire dialect
///
/// Cheap to clone; all clones share the same listener, registry, and
/// connection table.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Bind the listener and prepare the gateway.
    ///
    /// The socket is bound immediately (so [`local_addr`](Self::local_addr)
    /// is usable right away) but no connection is accepted until
    /// [`run`](Self::run).
    pub async fn bind(
        config: ServerConfig,
        dialect: Dialect,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let dispatcher = Dispatcher::new(handler, config.dispatch, config.dispatch_queue);
        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                dialect,
                registry: DeviceRegistry::new(),
                conns: DashMap::new(),
                dispatcher,
                shutdown: CancellationToken::new(),
                listener: Mutex::new(Some(listener)),
                local_addr,
            }),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Wire dialect this gateway speaks
    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    /// Accept connections until [`shutdown`](Self::shutdown).
    ///
    /// Also runs the idle sweep. Returns after the listener stops and every
    /// live connection has been told to close.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = match self.inner.listener.lock().await.take() {
            Some(listener) => listener,
            None => return Err(ServerError::AlreadyRunning),
        };
        info!(
            addr = %self.inner.local_addr,
            dialect = self.inner.dialect.name(),
            "gateway listening"
        );

        let sweep = tokio::spawn(sweep_loop(Arc::clone(&self.inner)));

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    info!("gateway shutting down");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr),
                    Err(e) => {
                        // Transient accept errors (EMFILE and friends) must
                        // not kill the listener.
                        error!(error = %e, "accept failed");
                    }
                },
            }
        }

        for conn in self.inner.conns.iter() {
            conn.close();
        }
        let _ = sweep.await;
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%addr, error = %e, "set_nodelay failed");
        }
        tokio::spawn(run_connection(stream, addr, Arc::clone(&self.inner)));
    }

    /// Pack `payload` in this gateway's dialect and queue it for the device
    /// currently registered under `identity`.
    pub async fn send(&self, identity: &str, payload: &str) -> Result<(), ServerError> {
        let conn = self
            .inner
            .registry
            .lookup(identity)
            .ok_or_else(|| ServerError::IdentityNotConnected(identity.to_string()))?;
        let frame = Bytes::from(self.inner.dialect.pack(payload));
        conn.send(frame).await
    }

    /// Identities of all currently registered devices
    pub fn identities(&self) -> Vec<String> {
        self.inner.registry.identities()
    }

    /// Connection currently registered under `identity`, if any
    pub fn lookup(&self, identity: &str) -> Option<Arc<ConnHandle>> {
        self.inner.registry.lookup(identity)
    }

    /// Number of live connections, identified or not
    pub fn connection_count(&self) -> usize {
        self.inner.conns.len()
    }

    /// Close every connection and clear the registry.
    ///
    /// The listener keeps accepting; devices reconnect and re-identify.
    pub fn reset(&self) {
        info!(connections = self.inner.conns.len(), "gateway reset");
        for conn in self.inner.conns.iter() {
            conn.close();
        }
        self.inner.registry.clear();
    }

    /// Stop the accept loop; [`run`](Self::run) then closes all connections
    /// and returns.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

/// Close connections that have been idle past the configured timeout.
async fn sweep_loop(inner: Arc<ServerInner>) {
    let mut ticker = tokio::time::interval(inner.config.sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,

            _ = ticker.tick() => {
                for conn in inner.conns.iter() {
                    let idle = conn.idle_for();
                    if idle > inner.config.idle_timeout {
                        warn!(
                            conn = %conn.id(),
                            identity = conn.identity().unwrap_or("<unidentified>"),
                            ?idle,
                            "closing idle connection"
                        );
                        conn.close();
                    }
                }
            }
        }
    }
}
