//! Minimal NS gateway
//!
//! Accepts NS devices on port 9010, logs everything they send, and answers
//! frames that ask for a reply.
//!
//! Run with: `cargo run --example ns_gateway`

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telegate_server::{
    ConnHandle, Dialect, EventHandler, ParsedMessage, Server, ServerConfig,
};

struct LoggingHandler {
    server: tokio::sync::OnceCell<Server>,
}

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn on_identity_changed(&self, conn: Arc<ConnHandle>, identity: &str, connected: bool) {
        if connected {
            info!(%identity, addr = %conn.remote_addr(), "device online");
        } else {
            info!(%identity, "device offline");
        }
    }

    async fn on_message(&self, _conn: Arc<ConnHandle>, msg: ParsedMessage) {
        if let ParsedMessage::Ns(record) = &msg {
            info!(
                device = %record.device_id,
                command = %record.command_code,
                entries = record.data.len(),
                "telemetry"
            );
            if record.need_reply {
                if let Some(server) = self.server.get() {
                    let reply = format!("ST=91;CN=9014;PW=123456;MN={};CP=&&&&", record.device_id);
                    if let Err(e) = server.send(&record.device_id, &reply).await {
                        info!(error = %e, "reply failed");
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ns_gateway=info,telegate_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let handler = Arc::new(LoggingHandler {
        server: tokio::sync::OnceCell::new(),
    });
    let server = Server::bind(ServerConfig::default(), Dialect::Ns, handler.clone()).await?;
    let _ = handler.server.set(server.clone());

    info!(addr = %server.local_addr(), "NS gateway ready");
    server.run().await?;
    Ok(())
}
