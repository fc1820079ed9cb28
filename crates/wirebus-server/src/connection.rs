//! Per-connection multiplexer.
//!
//! One spawned task per upgraded socket, looping over three event
//! sources with `tokio::select!`: socket reads, the broker
//! subscription, and the heartbeat interval. Anything going wrong here
//! tears down this connection and nothing else; cleanup runs exactly
//! once at the end of [`Connection::run`] regardless of which arm ended
//! the loop.

use std::time::Duration;

use bytes::BytesMut;
use metrics::counter;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use wirebus_core::Identity;

use crate::broker::Subscription;
use crate::dispatch::DispatchEngine;
use crate::errors::TransportError;
use crate::frame::{self, Frame, Opcode};
use crate::metrics::{CONNECTIONS_CLOSED_TOTAL, FRAMES_DECODED_TOTAL};

/// Connection lifecycle. Forward-only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Open,
    Closing,
    Closed,
}

/// An upgraded websocket connection bound to one identity and one
/// broker subscription.
pub struct Connection {
    conn_id: Uuid,
    socket: TcpStream,
    identity: Identity,
    engine: std::sync::Arc<DispatchEngine>,
    subscription: Subscription,
    heartbeat: Duration,
    sentinel: String,
    max_buffer: usize,
    state: State,
    close_sent: bool,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: TcpStream,
        identity: Identity,
        engine: std::sync::Arc<DispatchEngine>,
        subscription: Subscription,
        heartbeat: Duration,
        sentinel: impl Into<String>,
        max_buffer: usize,
    ) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            socket,
            identity,
            engine,
            subscription,
            heartbeat,
            sentinel: sentinel.into(),
            max_buffer,
            state: State::Open,
            close_sent: false,
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Drive the connection until either side closes it.
    pub async fn run(mut self) {
        let conn_id = self.conn_id;
        info!(%conn_id, window = ?self.identity.window_key, "connection open");

        let mut buf = BytesMut::with_capacity(4096);
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        let _first = heartbeat.tick().await; // first tick fires immediately

        while self.state == State::Open {
            tokio::select! {
                read = self.socket.read_buf(&mut buf) => {
                    match read {
                        Ok(0) => {
                            debug!(%conn_id, "peer went away");
                            self.state = State::Closing;
                        }
                        Ok(_) => {
                            if buf.len() > self.max_buffer {
                                self.abort(TransportError::BufferOverflow(self.max_buffer)).await;
                            } else if let Err(e) = self.drain_inbound(&mut buf).await {
                                self.abort(e).await;
                            }
                        }
                        Err(e) => self.abort(TransportError::Io(e)).await,
                    }
                }
                message = self.subscription.recv() => {
                    match message {
                        Some(message) => {
                            trace!(%conn_id, topic = %message.topic, "forwarding");
                            self.send(&frame::encode_text(&message.payload)).await;
                        }
                        None => {
                            debug!(%conn_id, "broker gone, closing");
                            self.state = State::Closing;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    let beat = frame::encode_text(&self.sentinel);
                    self.send(&beat).await;
                }
            }
        }

        self.cleanup().await;
    }

    /// Process every complete inbound frame buffered so far.
    async fn drain_inbound(&mut self, buf: &mut BytesMut) -> Result<(), TransportError> {
        let (frames, peer_closing) = frame::drain(buf)?;
        counter!(FRAMES_DECODED_TOTAL).increment(frames.len() as u64);
        for f in frames {
            self.handle_frame(f).await;
        }
        if peer_closing && self.state == State::Open {
            // reply to the close handshake before tearing down
            self.send(&frame::encode_close()).await;
            self.close_sent = true;
            self.state = State::Closing;
        }
        Ok(())
    }

    async fn handle_frame(&mut self, f: Frame) {
        match f.opcode {
            Opcode::Text => {
                let text = String::from_utf8_lossy(&f.payload);
                if text == self.sentinel {
                    trace!(conn_id = %self.conn_id, "heartbeat");
                } else {
                    self.engine.handle_client_text(&self.identity, &text);
                }
            }
            Opcode::Ping => self.send(&frame::encode(&f.payload, Opcode::Pong)).await,
            Opcode::Pong | Opcode::Close | Opcode::Continuation => {}
            Opcode::Binary => {
                warn!(conn_id = %self.conn_id, "ignoring binary frame");
            }
        }
    }

    /// Write, demoting failure to a close: the read half will notice.
    async fn send(&mut self, bytes: &[u8]) {
        if self.state != State::Open {
            return;
        }
        if let Err(e) = self.socket.write_all(bytes).await {
            debug!(conn_id = %self.conn_id, error = %e, "write failed, closing");
            self.state = State::Closing;
        }
    }

    async fn abort(&mut self, error: TransportError) {
        warn!(conn_id = %self.conn_id, error = %error, "transport error, closing connection");
        self.state = State::Closing;
    }

    /// The single teardown path.
    async fn cleanup(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        if !self.close_sent {
            // best-effort close frame; the peer may already be gone
            let _ = self.socket.write_all(&frame::encode_close()).await;
        }
        let _ = self.socket.shutdown().await;
        counter!(CONNECTIONS_CLOSED_TOTAL).increment(1);
        info!(conn_id = %self.conn_id, "connection closed");
    }
}
