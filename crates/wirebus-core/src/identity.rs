//! The caller context attached to every signal and function call.
//!
//! An [`Identity`] is resolved exactly once, when the websocket upgrade
//! request (or a server-side call site) is processed, and is immutable for
//! the life of the connection. It is plain serializable data: queue jobs
//! carry an identity snapshot, never a live connection or session handle.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Immutable caller context.
///
/// Server-originated calls use [`Identity::server`], which has no window
/// key and is unauthenticated, so such calls can never be routed to a
/// `Window` or `User` topic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Identity {
    /// Primary key of the authenticated user, if any.
    pub user_pk: Option<i64>,
    /// Username of the authenticated user, if any.
    pub username: Option<String>,
    /// Whether the user has staff rights.
    pub is_staff: bool,
    /// Granted permission codenames.
    pub permissions: BTreeSet<String>,
    /// Per-tab window key, assigned at page render time.
    pub window_key: Option<String>,
    /// Preferred locale, from the upgrade request.
    pub locale: Option<String>,
}

impl Identity {
    /// Identity for server-originated calls: anonymous, no window key.
    pub fn server() -> Self {
        Self::default()
    }

    /// Anonymous identity bound to a window.
    pub fn anonymous(window_key: impl Into<String>) -> Self {
        Self {
            window_key: Some(window_key.into()),
            ..Self::default()
        }
    }

    /// Whether this identity belongs to an authenticated user.
    pub fn is_authenticated(&self) -> bool {
        self.user_pk.is_some()
    }

    /// Whether the given permission codename was granted.
    pub fn has_perm(&self, perm: &str) -> bool {
        self.permissions.contains(perm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_identity_is_anonymous_and_windowless() {
        let id = Identity::server();
        assert!(!id.is_authenticated());
        assert!(id.window_key.is_none());
    }

    #[test]
    fn anonymous_keeps_window_key() {
        let id = Identity::anonymous("w1");
        assert_eq!(id.window_key.as_deref(), Some("w1"));
        assert!(!id.is_authenticated());
    }

    #[test]
    fn authenticated_with_user_pk() {
        let id = Identity {
            user_pk: Some(42),
            ..Identity::default()
        };
        assert!(id.is_authenticated());
    }

    #[test]
    fn has_perm_checks_codename() {
        let mut id = Identity::default();
        let _ = id.permissions.insert("demo.view".into());
        assert!(id.has_perm("demo.view"));
        assert!(!id.has_perm("demo.edit"));
    }

    #[test]
    fn snapshot_round_trip() {
        let id = Identity {
            user_pk: Some(7),
            username: Some("alice".into()),
            is_staff: true,
            permissions: BTreeSet::from(["demo.view".to_string()]),
            window_key: Some("wk".into()),
            locale: Some("fr-fr".into()),
        };
        let json = serde_json::to_string(&id).unwrap();
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn snapshot_tolerates_missing_fields() {
        let back: Identity = serde_json::from_str(r#"{"userPk": 3}"#).unwrap();
        assert_eq!(back.user_pk, Some(3));
        assert!(back.window_key.is_none());
    }
}
