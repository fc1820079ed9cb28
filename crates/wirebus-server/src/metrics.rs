//! Metric name constants.
//!
//! Everything goes through the `metrics` facade; whether anything
//! listens is the embedding application's choice.

/// Connections accepted after a successful upgrade.
pub const CONNECTIONS_OPENED_TOTAL: &str = "wirebus_connections_opened_total";
/// Connections that have finished cleanup.
pub const CONNECTIONS_CLOSED_TOTAL: &str = "wirebus_connections_closed_total";
/// Upgrade requests rejected before the websocket opened.
pub const HANDSHAKE_REJECTED_TOTAL: &str = "wirebus_handshake_rejected_total";
/// Complete frames decoded from client sockets.
pub const FRAMES_DECODED_TOTAL: &str = "wirebus_frames_decoded_total";
/// Calls rejected by contract or permission checks.
pub const DISPATCH_REJECTED_TOTAL: &str = "wirebus_dispatch_rejected_total";
/// Calls accepted by the dispatch engine.
pub const DISPATCH_ACCEPTED_TOTAL: &str = "wirebus_dispatch_accepted_total";
/// Jobs handed to the work queue.
pub const JOBS_ENQUEUED_TOTAL: &str = "wirebus_jobs_enqueued_total";
/// Scheduled jobs dropped past their expiry.
pub const JOBS_EXPIRED_TOTAL: &str = "wirebus_jobs_expired_total";
/// Broker messages delivered to subscribers.
pub const BROKER_PUBLISHED_TOTAL: &str = "wirebus_broker_published_total";
/// Publishes that reached no subscriber.
pub const BROKER_DROPPED_TOTAL: &str = "wirebus_broker_dropped_total";
