//! Handler dispatch
//!
//! Two modes, chosen in [`ServerConfig`](crate::config::ServerConfig):
//!
//! - Inline: the handler runs on the connection's reader task. A slow handler
//!   backpressures its own connection only.
//! - Pooled: each connection gets a bounded queue drained by a dedicated
//!   task, and a shared semaphore caps how many handler invocations run at
//!   once across all connections. Per-connection arrival order is preserved
//!   either way.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

use telegate_protocol::ParsedMessage;

use crate::config::DispatchMode;
use crate::connection::ConnHandle;
use crate::events::EventHandler;

enum Mode {
    Inline,
    Pooled { permits: Arc<Semaphore> },
}

pub(crate) struct Dispatcher {
    handler: Arc<dyn EventHandler>,
    mode: Mode,
    queue_capacity: usize,
}

impl Dispatcher {
    pub(crate) fn new(
        handler: Arc<dyn EventHandler>,
        mode: DispatchMode,
        queue_capacity: usize,
    ) -> Self {
        let mode = match mode {
            DispatchMode::Inline => Mode::Inline,
            DispatchMode::Pooled { workers } => Mode::Pooled {
                permits: Arc::new(Semaphore::new(workers.max(1))),
            },
        };
        Self {
            handler,
            mode,
            queue_capacity,
        }
    }

    pub(crate) fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }

    /// Set up dispatch plumbing for one connection.
    pub(crate) fn attach(&self, conn: Arc<ConnHandle>) -> DispatchQueue {
        match &self.mode {
            Mode::Inline => DispatchQueue::Inline,
            Mode::Pooled { permits } => {
                let (tx, rx) = mpsc::channel(self.queue_capacity);
                let task = tokio::spawn(drain_queue(
                    rx,
                    Arc::clone(&self.handler),
                    conn,
                    Arc::clone(permits),
                ));
                DispatchQueue::Pooled { tx, task }
            }
        }
    }

    /// Deliver one parsed message through the connection's queue.
    pub(crate) async fn dispatch(
        &self,
        queue: &mut DispatchQueue,
        conn: &Arc<ConnHandle>,
        msg: ParsedMessage,
    ) {
        match queue {
            DispatchQueue::Inline => self.handler.on_message(Arc::clone(conn), msg).await,
            DispatchQueue::Pooled { tx, .. } => {
                // A full queue backpressures the reader, not the peer's
                // neighbors.
                if tx.send(msg).await.is_err() {
                    debug!(conn = %conn.id(), "dispatch queue gone, dropping message");
                }
            }
        }
    }
}

/// Per-connection dispatch endpoint held by the reader task
pub(crate) enum DispatchQueue {
    Inline,
    Pooled {
        tx: mpsc::Sender<ParsedMessage>,
        task: JoinHandle<()>,
    },
}

impl DispatchQueue {
    /// Flush remaining queued messages; returns once all are delivered.
    ///
    /// Called before close notifications fire so an application never sees a
    /// message after `on_closed` for the same connection.
    pub(crate) async fn shutdown(&mut self) {
        if let DispatchQueue::Pooled { tx, task } = self {
            let (closed_tx, _) = mpsc::channel(1);
            // Replacing the sender drops the original, which lets the drain
            // task run to completion.
            *tx = closed_tx;
            let _ = task.await;
        }
    }
}

async fn drain_queue(
    mut rx: mpsc::Receiver<ParsedMessage>,
    handler: Arc<dyn EventHandler>,
    conn: Arc<ConnHandle>,
    permits: Arc<Semaphore>,
) {
    while let Some(msg) = rx.recv().await {
        let permit = match permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        handler.on_message(Arc::clone(&conn), msg).await;
        drop(permit);
    }
}
