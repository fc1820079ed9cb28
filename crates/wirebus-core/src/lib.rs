//! # wirebus-core
//!
//! Foundation types for the wirebus signal/function dispatch engine.
//!
//! This crate provides the shared vocabulary the transport and dispatch
//! layers depend on:
//!
//! - **Identity**: [`identity::Identity`] — the immutable caller context
//!   resolved once at handshake time and carried with every call
//! - **Audiences**: [`audience::Audience`] — tagged destination values
//!   (server, window, user, broadcast, addressable object)
//! - **Envelopes**: [`envelope::CallEnvelope`] and
//!   [`envelope::Scheduling`] — the queue/wire payload for one call
//! - **Wire shapes**: [`wire::ClientMessage`], [`wire::SignalFrame`],
//!   [`wire::FunctionReply`] — the JSON exchanged over text frames
//! - **Contracts**: [`contract::ArgSpec`] declarative argument contracts
//!   with [`casters`] and [`permissions`] predicate constructors
//! - **Rejections**: [`errors::Reject`] — expected rejections kept apart
//!   from real failures
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `wirebus-settings` and
//! `wirebus-server`. No I/O happens here.

pub mod audience;
pub mod casters;
pub mod contract;
pub mod envelope;
pub mod errors;
pub mod identity;
pub mod logging;
pub mod permissions;
pub mod wire;

pub use audience::Audience;
pub use contract::ArgSpec;
pub use envelope::{CallEnvelope, CallKind, Scheduling};
pub use errors::Reject;
pub use identity::Identity;
pub use permissions::Permission;
