//! Permission predicate constructors.
//!
//! A [`Permission`] decides whether one identity may trigger one registry
//! entry. Predicates are only evaluated for untrusted (client) callers;
//! server-side code may dispatch anything.

use std::sync::Arc;

use crate::identity::Identity;

/// Shared authorization predicate for a registry entry.
pub type Permission = Arc<dyn Fn(&Identity) -> bool + Send + Sync>;

/// Allow every caller, including anonymous clients.
pub fn everyone() -> Permission {
    Arc::new(|_| true)
}

/// Never allow clients; the entry is reachable from server code only.
pub fn server_only() -> Permission {
    Arc::new(|_| false)
}

/// Allow authenticated users.
pub fn authenticated() -> Permission {
    Arc::new(Identity::is_authenticated)
}

/// Allow anonymous callers only.
pub fn anonymous() -> Permission {
    Arc::new(|id| !id.is_authenticated())
}

/// Allow staff users.
pub fn staff() -> Permission {
    Arc::new(|id| id.is_staff)
}

/// Allow users granted the given permission codename.
pub fn has_perm(perm: impl Into<String>) -> Permission {
    let perm = perm.into();
    Arc::new(move |id| id.has_perm(&perm))
}
