//! Audience → topic routing, signed window tokens and the TTL-backed
//! subscription store.
//!
//! Topic strings are the broker's only addressing scheme. Serialization
//! is deterministic: the same identity and audience always produce the
//! same topic, so a publisher and a subscriber agree without further
//! coordination. `Server` is local-only and never becomes a topic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use tracing::debug;

use wirebus_core::{Audience, Identity};

type HmacSha256 = Hmac<Sha256>;

/// Maps audiences to namespaced topic strings.
#[derive(Clone, Debug)]
pub struct TopicRouter {
    prefix: String,
}

impl TopicRouter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Serialize one audience against the given identity.
    ///
    /// `None` means the audience cannot be addressed: `Server` by
    /// definition, `Window` without a window key, `User` for an
    /// anonymous caller.
    pub fn serialize(&self, identity: &Identity, audience: &Audience) -> Option<String> {
        match audience {
            Audience::Server => None,
            Audience::Broadcast => Some(format!("{}-broadcast", self.prefix)),
            Audience::Window => identity
                .window_key
                .as_deref()
                .map(|key| format!("{}-window.{key}", self.prefix)),
            Audience::User => identity
                .user_pk
                .map(|pk| format!("{}-user.{pk}", self.prefix)),
            Audience::Addressable { kind, id } => {
                Some(format!("{}-{kind}.{id}", self.prefix))
            }
        }
    }

    /// Topics every connection is implicitly subscribed to: broadcast,
    /// its own window, and its user channel when authenticated.
    pub fn implicit_topics(&self, identity: &Identity) -> Vec<String> {
        [Audience::Broadcast, Audience::Window, Audience::User]
            .iter()
            .filter_map(|audience| self.serialize(identity, audience))
            .collect()
    }

    /// Full subscription set for a connection: declared audiences plus
    /// the implicit ones, deduplicated in first-seen order.
    pub fn topics_for(&self, identity: &Identity, declared: &[Audience]) -> Vec<String> {
        let mut topics: Vec<String> = declared
            .iter()
            .filter_map(|audience| self.serialize(identity, audience))
            .collect();
        for topic in self.implicit_topics(identity) {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics
    }
}

/// Signs window keys into upgrade-request tokens.
///
/// Token format is `<value>.<base64url(hmac_sha256(value))>`. A bad or
/// absent signature is not an error at the call site: `unsign` returns
/// `None` and the connection simply gets no declared topics.
#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    fn signature(&self, value: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(value.as_bytes());
        BASE64_URL.encode(mac.finalize().into_bytes())
    }

    /// Produce a signed token for `value`.
    pub fn sign(&self, value: &str) -> String {
        format!("{value}.{}", self.signature(value))
    }

    /// Recover the signed value, or `None` on any tampering.
    pub fn unsign(&self, token: &str) -> Option<String> {
        let (value, signature) = token.rsplit_once('.')?;
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(value.as_bytes());
        let decoded = BASE64_URL.decode(signature).ok()?;
        if mac.verify_slice(&decoded).is_ok() {
            Some(value.to_owned())
        } else {
            debug!(token, "rejected subscription token with bad signature");
            None
        }
    }
}

struct StoredTopics {
    topics: Vec<String>,
    expires_at: Instant,
}

/// TTL store for topic sets declared ahead of a connection.
///
/// Keyed by the signed window token. Entries are dropped lazily on
/// access once past their TTL; a missing or expired key reads as an
/// empty set, never an error.
pub struct SubscriptionStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, StoredTopics>>,
}

impl SubscriptionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store the declared topic set for a token, resetting its TTL.
    pub fn put(&self, token: &str, topics: Vec<String>) {
        let mut entries = self.entries.lock();
        let _ = entries.insert(
            token.to_owned(),
            StoredTopics {
                topics,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Declared topics for a token; empty when unknown or expired.
    pub fn get(&self, token: &str) -> Vec<String> {
        let mut entries = self.entries.lock();
        match entries.get(token) {
            Some(stored) if stored.expires_at > Instant::now() => stored.topics.clone(),
            Some(_) => {
                let _ = entries.remove(token);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, stored| stored.expires_at > now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Declares topics ahead of a connection and resolves them at upgrade.
///
/// The app-facing half (`declare`) runs when a logical page is prepared:
/// it signs the window key, serializes the requested audiences and
/// stores them under the token. The transport-facing half (`resolve`)
/// runs at upgrade time: a valid token yields its stored set, anything
/// else yields nothing, and the implicit topics are added either way.
pub struct TopicDirectory {
    router: TopicRouter,
    signer: TokenSigner,
    store: SubscriptionStore,
}

impl TopicDirectory {
    pub fn new(router: TopicRouter, signer: TokenSigner, store: SubscriptionStore) -> Self {
        Self {
            router,
            signer,
            store,
        }
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Window key recovered from a presented token, `None` on any
    /// signature failure.
    pub fn window_key(&self, token: &str) -> Option<String> {
        self.signer.unsign(token)
    }

    /// Declare the audiences a window should hear, returning the signed
    /// token the client presents at upgrade.
    pub fn declare(&self, identity: &Identity, audiences: &[Audience]) -> String {
        let window_key = identity.window_key.as_deref().unwrap_or_default();
        let token = self.signer.sign(window_key);
        let topics: Vec<String> = audiences
            .iter()
            .filter_map(|audience| self.router.serialize(identity, audience))
            .collect();
        self.store.put(&token, topics);
        token
    }

    /// Subscription set for an upgrading connection.
    ///
    /// Returns the recovered window key (if the token verified) and the
    /// full topic list, implicit topics included.
    pub fn resolve(&self, identity: &Identity, token: Option<&str>) -> (Option<String>, Vec<String>) {
        let window_key = token.and_then(|t| self.signer.unsign(t));
        let mut topics = match (window_key.is_some(), token) {
            (true, Some(token)) => self.store.get(token),
            _ => Vec::new(),
        };
        for topic in self.router.implicit_topics(identity) {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        (window_key, topics)
    }
}
