//! TCP accept loop and upgrade path.
//!
//! Accepts raw TCP connections, reads the HTTP request head, runs the
//! websocket handshake and hands upgraded sockets to
//! [`Connection`](crate::connection::Connection) tasks. A failed
//! handshake answers with its mapped HTTP status and drops the socket;
//! nothing past this module ever sees an un-upgraded peer.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use metrics::counter;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use wirebus_core::Identity;
use wirebus_settings::WirebusSettings;

use crate::broker::{Broker, MemoryBroker};
use crate::connection::Connection;
use crate::dispatch::DispatchEngine;
use crate::handshake::{self, RequestHead};
use crate::metrics::{CONNECTIONS_OPENED_TOTAL, HANDSHAKE_REJECTED_TOTAL};
use crate::registry::SignalRegistry;
use crate::topics::{SubscriptionStore, TokenSigner, TopicDirectory, TopicRouter};

/// Upper bound on the request head, defensive against slow-drip peers.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Resolves the caller identity at upgrade time.
///
/// This is the enrichment boundary an embedding application fills in:
/// session lookup, header-based auth, whatever it has. The default
/// resolver makes everyone anonymous.
pub trait IdentityResolver: Send + Sync {
    /// Build the identity for an upgrading connection. `window_key` is
    /// the value recovered from a valid subscription token, when the
    /// client presented one.
    fn resolve(&self, head: &RequestHead, window_key: Option<&str>) -> Identity;
}

/// Everyone is anonymous; a connection without a token gets a fresh
/// window key.
pub struct AnonymousResolver;

impl IdentityResolver for AnonymousResolver {
    fn resolve(&self, _head: &RequestHead, window_key: Option<&str>) -> Identity {
        match window_key {
            Some(key) => Identity::anonymous(key),
            None => Identity::anonymous(Uuid::new_v4().to_string()),
        }
    }
}

/// Everything shared across connections.
pub struct ServerContext {
    pub settings: Arc<WirebusSettings>,
    pub engine: Arc<DispatchEngine>,
    pub broker: Arc<dyn Broker>,
    pub directory: Arc<TopicDirectory>,
    pub resolver: Arc<dyn IdentityResolver>,
}

impl ServerContext {
    /// Wire the engine, broker and topic directory together from the
    /// settings, with the in-process broker and queue.
    pub fn new(
        settings: Arc<WirebusSettings>,
        registry: SignalRegistry,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Arc<Self> {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let router = TopicRouter::new(&settings.topics.prefix);
        let engine = DispatchEngine::new(
            registry,
            Arc::clone(&broker),
            router.clone(),
            &settings.queue.default_queue,
        );
        let directory = Arc::new(TopicDirectory::new(
            router,
            TokenSigner::new(&settings.token.secret),
            SubscriptionStore::new(Duration::from_secs(settings.topics.store_ttl_secs)),
        ));
        Arc::new(Self {
            settings,
            engine,
            broker,
            directory,
            resolver,
        })
    }
}

/// The listening server.
pub struct WirebusServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl WirebusServer {
    /// Bind the configured address.
    pub async fn bind(context: Arc<ServerContext>) -> io::Result<Self> {
        let listener = TcpListener::bind(&context.settings.server.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "listening");
        Ok(Self { listener, context })
    }

    /// Address actually bound, useful with a `:0` port.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever. Each socket gets its own task; accept errors are
    /// the only thing that ends the loop.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            debug!(%peer, "accepted");
            let context = Arc::clone(&self.context);
            let _handle = tokio::spawn(async move {
                if let Err(e) = upgrade_and_serve(context, socket).await {
                    debug!(%peer, error = %e, "connection setup failed");
                }
            });
        }
    }
}

/// Read the request head, handshake, subscribe and hand off.
async fn upgrade_and_serve(
    context: Arc<ServerContext>,
    mut socket: TcpStream,
) -> io::Result<()> {
    let head = match read_request_head(&mut socket).await? {
        Some(head) => head,
        None => return Ok(()), // peer gave up mid-head
    };

    let head = match RequestHead::parse(&head) {
        Ok(head) => head,
        Err(e) => {
            counter!(HANDSHAKE_REJECTED_TOTAL).increment(1);
            socket
                .write_all(handshake::error_response(&e).as_bytes())
                .await?;
            return Ok(());
        }
    };

    let accept = match handshake::validate_upgrade(&head) {
        Ok(accept) => accept,
        Err(e) => {
            counter!(HANDSHAKE_REJECTED_TOTAL).increment(1);
            warn!(target = %head.target, error = %e, "rejected upgrade");
            socket
                .write_all(handshake::error_response(&e).as_bytes())
                .await?;
            return Ok(());
        }
    };

    let token = head.query_param("token");
    let window_key = token.and_then(|t| context.directory.window_key(t));
    let identity = context.resolver.resolve(&head, window_key.as_deref());
    let (_, topics) = context.directory.resolve(&identity, token);
    let subscription = context.broker.subscribe(&topics);

    socket
        .write_all(handshake::switching_protocols(&accept).as_bytes())
        .await?;
    counter!(CONNECTIONS_OPENED_TOTAL).increment(1);

    let connection = Connection::new(
        socket,
        identity,
        Arc::clone(&context.engine),
        subscription,
        Duration::from_secs(context.settings.heartbeat.interval_secs),
        context.settings.heartbeat.sentinel.clone(),
        context.settings.server.max_frame_buffer,
    );
    connection.run().await;
    Ok(())
}

/// Read up to the `\r\n\r\n` terminator, `None` if the peer hangs up.
async fn read_request_head(socket: &mut TcpStream) -> io::Result<Option<String>> {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = find_head_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            return Ok(Some(head));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
        if socket.read_buf(&mut buf).await? == 0 {
            return Ok(None);
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
