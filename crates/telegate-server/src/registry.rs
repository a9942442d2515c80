//! Device identity registry
//!
//! Maps each device identity to the connection currently representing it.
//! Devices reconnect before their old socket is detected dead, so two rules
//! resolve the race:
//!
//! - `identify` is last-identify-wins: the newest identified connection owns
//!   the identity unconditionally.
//! - `evict_if_owner` removes an entry only when the stored connection id
//!   still matches the closing connection. Connection ids are compared, never
//!   socket handles — the OS recycles those.

use std::sync::Arc;

use dashmap::DashMap;

use crate::connection::{ConnHandle, ConnId};

struct OwnerEntry {
    conn_id: ConnId,
    handle: Arc<ConnHandle>,
}

/// Registry of currently connected device identities
#[derive(Default)]
pub struct DeviceRegistry {
    entries: DashMap<String, OwnerEntry>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The connection currently owning `identity`, if any
    pub fn lookup(&self, identity: &str) -> Option<Arc<ConnHandle>> {
        self.entries.get(identity).map(|e| Arc::clone(&e.handle))
    }

    /// Unconditionally make `handle` the owner of `identity`.
    ///
    /// Returns the previous owner when this call displaced a different
    /// connection (the old socket has not yet noticed it is dead).
    pub fn identify(&self, identity: &str, handle: Arc<ConnHandle>) -> Option<Arc<ConnHandle>> {
        let conn_id = handle.id();
        let entry = OwnerEntry { conn_id, handle };
        self.entries
            .insert(identity.to_string(), entry)
            .filter(|old| old.conn_id != conn_id)
            .map(|old| old.handle)
    }

    /// Remove the entry for `identity` only if `conn` still owns it.
    ///
    /// Returns true when the entry was removed — the caller is then the last
    /// owner and may report the device as disconnected. A stale connection's
    /// teardown returns false and must stay silent.
    pub fn evict_if_owner(&self, identity: &str, conn: &ConnHandle) -> bool {
        self.entries
            .remove_if(identity, |_, entry| entry.conn_id == conn.id())
            .is_some()
    }

    /// All currently registered identities
    pub fn identities(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered identities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no identity is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry (server reset)
    pub fn clear(&self) {
        self.entries.clear();
    }
}
