//! # wirebus-server
//!
//! Websocket transport and dispatch engine for topic-routed signals and
//! functions.
//!
//! ## Layers
//!
//! - [`frame`] / [`handshake`]: RFC6455 wire handling, the opening
//!   handshake and the HyBi frame codec
//! - [`server`]: TCP accept loop, upgrade path, identity resolution
//! - [`connection`]: per-connection select loop (socket, broker
//!   subscription, heartbeat)
//! - [`topics`]: audience → topic serialization, signed window tokens,
//!   TTL subscription store
//! - [`registry`]: the immutable signal/function entry table
//! - [`dispatch`]: validation, authorization, queue fan-out and broker
//!   publishes
//! - [`broker`] / [`queue`]: pluggable pub/sub and work-queue
//!   boundaries with in-process implementations
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wirebus_server::dispatch::CallContext;
//! use wirebus_server::registry::{SignalEntry, SignalRegistry};
//! use wirebus_server::server::{AnonymousResolver, ServerContext, WirebusServer};
//! use wirebus_core::{Audience, ArgSpec};
//!
//! # async fn run() -> std::io::Result<()> {
//! let registry = SignalRegistry::builder()
//!     .signal(
//!         SignalEntry::new("demo.echo", Arc::new(|ctx: &CallContext, kwargs| {
//!             ctx.call("demo.echo2", &[Audience::Broadcast], kwargs.clone());
//!             Ok(())
//!         }))
//!         .args(ArgSpec::new().required("content")),
//!     )
//!     .expect("valid path")
//!     .build();
//!
//! wirebus_settings::init_settings(wirebus_settings::WirebusSettings::default());
//! let context = ServerContext::new(
//!     wirebus_settings::get_settings(),
//!     registry,
//!     Arc::new(AnonymousResolver),
//! );
//! WirebusServer::bind(context).await?.run().await
//! # }
//! ```

pub mod broker;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod frame;
pub mod handshake;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod server;
pub mod topics;

pub use broker::{Broker, MemoryBroker};
pub use dispatch::{CallContext, DispatchEngine};
pub use errors::{FrameError, HandshakeError, HandlerError, RegistryError, TransportError};
pub use queue::{Job, JobQueue, JobRunner, TokioJobQueue};
pub use registry::{FunctionEntry, RegistryBuilder, SignalEntry, SignalRegistry};
pub use server::{AnonymousResolver, IdentityResolver, ServerContext, WirebusServer};
pub use topics::{SubscriptionStore, TokenSigner, TopicDirectory, TopicRouter};
