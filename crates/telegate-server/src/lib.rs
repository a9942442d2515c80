//! Telegate Gateway Engine
//!
//! This crate provides the TCP gateway engine for fleets of telemetry and
//! control devices. Each [`Server`] binds one listener, speaks one wire
//! dialect, and reports everything that happens through an application
//! [`EventHandler`].
//!
//! # Architecture
//!
//! - Every accepted socket becomes a connection with a reader task and a
//!   writer task; the shared [`ConnHandle`] exposes its state.
//! - The first parsed frame carrying a device identity registers the
//!   connection in the [`DeviceRegistry`]. Reconnects are last-identify-wins
//!   and a stale connection's teardown never evicts its replacement.
//! - Parsed messages reach the handler inline or through a bounded worker
//!   pool; per-connection arrival order holds in both modes.
//! - An idle sweep closes connections that stop sending.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telegate_protocol::Dialect;
//! use telegate_server::{NoopHandler, Server, ServerConfig};
//!
//! # async fn demo() -> Result<(), telegate_server::ServerError> {
//! let server = Server::bind(ServerConfig::default(), Dialect::Ns, Arc::new(NoopHandler)).await?;
//! println!("listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod registry;
pub mod server;

mod dispatch;

pub use config::{DispatchMode, ServerConfig};
pub use connection::{ConnHandle, ConnId, ConnState};
pub use error::ServerError;
pub use events::{EventHandler, NoopHandler};
pub use registry::DeviceRegistry;
pub use server::Server;

// The dialect types applications need to embed the gateway.
pub use telegate_protocol::{Dialect, ParsedMessage};
