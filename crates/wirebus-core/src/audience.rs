//! Destination values for a call.
//!
//! An [`Audience`] names a set of recipients without ever being a broker
//! topic itself: the topic router owns the mapping from
//! `(identity, audience)` to a topic string, so a browser client never
//! learns server-side recipients.

use serde::{Deserialize, Serialize};

/// A tagged destination for a signal.
///
/// `Server` is local-only: it is never serialized to a topic and routes
/// the call to the work queue instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Audience {
    /// Handled by registered server-side handlers, no network hop.
    Server,
    /// The single connection that issued the call.
    Window,
    /// The calling identity's user, across all of their connections.
    User,
    /// Every subscriber.
    Broadcast,
    /// An arbitrary addressable domain object, e.g. a chat room.
    Addressable {
        /// Object kind, e.g. `"chat"`.
        kind: String,
        /// Object id within its kind.
        id: String,
    },
}

impl Audience {
    /// Convenience constructor for [`Audience::Addressable`].
    pub fn addressable(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Addressable {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Whether this audience is handled locally rather than published.
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server)
    }
}
