//! Application event surface
//!
//! The gateway reports connection lifecycle and parsed messages through a
//! single handler trait. All methods default to no-ops so applications
//! implement only what they need.
//!
//! Ordering guarantees, per connection: `on_opened` once at accept,
//! `on_identity_changed(.., true)` once right after the first identifying
//! frame, `on_message` per parsed frame in arrival order, and — only if the
//! connection still owns its registry entry at teardown —
//! `on_identity_changed(.., false)` followed by `on_closed`. Messages from
//! different connections carry no relative ordering.

use std::sync::Arc;

use async_trait::async_trait;
use telegate_protocol::ParsedMessage;

use crate::connection::ConnHandle;

/// Callbacks invoked by the gateway dispatcher
///
/// When the gateway runs in pooled dispatch mode, `on_message` is invoked
/// concurrently across connections; implementations must be safe under
/// concurrent invocation.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// A connection was accepted (identity not yet known)
    async fn on_opened(&self, conn: Arc<ConnHandle>) {
        let _ = conn;
    }

    /// A connection that owned a device identity finished closing
    async fn on_closed(&self, conn: Arc<ConnHandle>) {
        let _ = conn;
    }

    /// A device identity came online (`connected` = true, fired when a
    /// connection first identifies) or went offline (`connected` = false,
    /// fired when the owning connection tears down)
    async fn on_identity_changed(&self, conn: Arc<ConnHandle>, identity: &str, connected: bool) {
        let _ = (conn, identity, connected);
    }

    /// A frame parsed successfully on an identified connection
    async fn on_message(&self, conn: Arc<ConnHandle>, msg: ParsedMessage) {
        let _ = (conn, msg);
    }
}

/// Handler that ignores every event; useful as a base or for tests
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {}
