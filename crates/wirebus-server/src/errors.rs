//! Transport- and registration-layer errors.
//!
//! Propagation policy: nothing from a single signal/function invocation
//! may affect sibling invocations or the connection loop; transport
//! errors never reach dispatch logic and vice versa.

use thiserror::Error;

/// Malformed websocket upgrade request.
///
/// Recoverable: the caller responds with the mapped HTTP status and
/// never upgrades the socket.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The version header was entirely absent; the client may fall back
    /// to plain HTTP. Mapped to 426 rather than 400.
    #[error("websocket upgrade required")]
    UpgradeRequired,
    /// HTTP method was not GET.
    #[error("HTTP method must be a GET")]
    MethodNotGet,
    /// Protocol was not HTTP/1.1.
    #[error("HTTP server protocol must be 1.1")]
    UnsupportedProtocol,
    /// The request does not ask to upgrade to a websocket.
    #[error("client does not wish to upgrade to a websocket")]
    NotAnUpgrade,
    /// `Sec-WebSocket-Key` missing or empty.
    #[error("Sec-WebSocket-Key header is missing or empty")]
    MissingKey,
    /// Version header present but not in the accepted set.
    #[error("unsupported websocket version: {0}")]
    UnsupportedVersion(String),
    /// The request head could not be parsed at all.
    #[error("malformed upgrade request: {0}")]
    Malformed(String),
}

impl HandshakeError {
    /// HTTP status for the error response.
    pub fn status(&self) -> u16 {
        match self {
            Self::UpgradeRequired => 426,
            _ => 400,
        }
    }
}

/// Structurally invalid frame data; the connection must be closed.
///
/// Short input is never an error: the decoder reports incomplete and
/// consumes nothing.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Reserved or unknown opcode.
    #[error("unknown opcode 0x{0:x}")]
    UnknownOpcode(u8),
    /// Control frames must fit in a 7-bit length.
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLong(u64),
    /// Control frames must not be fragmented.
    #[error("fragmented control frame")]
    FragmentedControlFrame,
    /// Declared payload length overflows the total frame size.
    #[error("declared payload length {0} overflows the frame size")]
    PayloadTooLong(u64),
}

/// Socket-level failure; aborts only the one connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket I/O failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer sent structurally invalid framing.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The peer buffered more inbound bytes than allowed.
    #[error("inbound buffer exceeded {0} bytes")]
    BufferOverflow(usize),
}

/// Failure raised by a signal or function handler.
///
/// For functions the message becomes the `exception` field of the reply
/// frame; for signals it is logged and the sibling handlers still run.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Fatal registration error, raised at process start.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The path does not match the dotted-identifier pattern.
    #[error("invalid path {0:?}: must match ^[A-Za-z_]\\w*(\\.[A-Za-z_]\\w*)*$")]
    InvalidPath(String),
    /// A function responder already exists for the path.
    #[error("a function is already registered for path {0:?}")]
    DuplicateFunction(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_required_maps_to_426() {
        assert_eq!(HandshakeError::UpgradeRequired.status(), 426);
        assert_eq!(HandshakeError::MissingKey.status(), 400);
        assert_eq!(
            HandshakeError::UnsupportedVersion("6".into()).status(),
            400
        );
    }
}
