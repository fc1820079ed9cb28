//! Signal and function registry.
//!
//! Entries are registered through a builder at startup and the built
//! table is immutable, shared behind an `Arc`. A path may carry any
//! number of signal entries (every one runs) but at most one function
//! entry (exactly one responder computes the reply).

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map, Value};

use wirebus_core::{ArgSpec, Permission, permissions};

use crate::dispatch::CallContext;
use crate::errors::{HandlerError, RegistryError};

/// Dotted identifier path, e.g. `demo.chat.receive`.
static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_]\w*(\.[A-Za-z_]\w*)*$").expect("path pattern is valid")
});

/// Handler invoked for one signal entry. Errors are logged, and sibling
/// entries on the same path still run.
pub type SignalHandler =
    Arc<dyn Fn(&CallContext, &Map<String, Value>) -> Result<(), HandlerError> + Send + Sync>;

/// Handler computing a function result. The error message is forwarded
/// to the caller as the reply's `exception` field.
pub type FunctionHandler =
    Arc<dyn Fn(&CallContext, &Map<String, Value>) -> Result<Value, HandlerError> + Send + Sync>;

/// One registered signal handler.
#[derive(Clone)]
pub struct SignalEntry {
    pub path: String,
    pub queue: String,
    pub permission: Permission,
    pub spec: ArgSpec,
    pub handler: SignalHandler,
}

impl SignalEntry {
    /// Entry on the default queue, callable by everyone, no arguments.
    pub fn new(path: impl Into<String>, handler: SignalHandler) -> Self {
        Self {
            path: path.into(),
            queue: crate::queue::DEFAULT_QUEUE.to_owned(),
            permission: permissions::everyone(),
            spec: ArgSpec::new(),
            handler,
        }
    }

    #[must_use]
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    #[must_use]
    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    #[must_use]
    pub fn args(mut self, spec: ArgSpec) -> Self {
        self.spec = spec;
        self
    }
}

impl std::fmt::Debug for SignalEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalEntry")
            .field("path", &self.path)
            .field("queue", &self.queue)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// The single responder for a function path.
#[derive(Clone)]
pub struct FunctionEntry {
    pub path: String,
    pub queue: String,
    pub permission: Permission,
    pub spec: ArgSpec,
    pub handler: FunctionHandler,
}

impl FunctionEntry {
    pub fn new(path: impl Into<String>, handler: FunctionHandler) -> Self {
        Self {
            path: path.into(),
            queue: crate::queue::DEFAULT_QUEUE.to_owned(),
            permission: permissions::everyone(),
            spec: ArgSpec::new(),
            handler,
        }
    }

    #[must_use]
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    #[must_use]
    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    #[must_use]
    pub fn args(mut self, spec: ArgSpec) -> Self {
        self.spec = spec;
        self
    }
}

impl std::fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("path", &self.path)
            .field("queue", &self.queue)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Accumulates entries, validating paths as they arrive.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    signals: HashMap<String, Vec<Arc<SignalEntry>>>,
    functions: HashMap<String, Arc<FunctionEntry>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signal entry. Any number may share a path.
    pub fn signal(mut self, entry: SignalEntry) -> Result<Self, RegistryError> {
        validate_path(&entry.path)?;
        self.signals
            .entry(entry.path.clone())
            .or_default()
            .push(Arc::new(entry));
        Ok(self)
    }

    /// Register the function responder for a path.
    pub fn function(mut self, entry: FunctionEntry) -> Result<Self, RegistryError> {
        validate_path(&entry.path)?;
        if self.functions.contains_key(&entry.path) {
            return Err(RegistryError::DuplicateFunction(entry.path));
        }
        let _ = self.functions.insert(entry.path.clone(), Arc::new(entry));
        Ok(self)
    }

    /// Freeze the table.
    pub fn build(self) -> SignalRegistry {
        SignalRegistry {
            signals: self.signals,
            functions: self.functions,
        }
    }
}

/// Immutable entry table, shared across connections.
#[derive(Debug, Default)]
pub struct SignalRegistry {
    signals: HashMap<String, Vec<Arc<SignalEntry>>>,
    functions: HashMap<String, Arc<FunctionEntry>>,
}

impl SignalRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Every signal entry registered for a path.
    pub fn signals_for(&self, path: &str) -> &[Arc<SignalEntry>] {
        self.signals.get(path).map_or(&[], Vec::as_slice)
    }

    /// The function responder for a path, if one was registered.
    pub fn function_for(&self, path: &str) -> Option<&Arc<FunctionEntry>> {
        self.functions.get(path)
    }

    /// Number of registered entries (signals plus functions).
    pub fn len(&self) -> usize {
        self.signals.values().map(Vec::len).sum::<usize>() + self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.functions.is_empty()
    }
}

fn validate_path(path: &str) -> Result<(), RegistryError> {
    if PATH_RE.is_match(path) {
        Ok(())
    } else {
        Err(RegistryError::InvalidPath(path.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_signal(path: &str) -> SignalEntry {
        SignalEntry::new(path, Arc::new(|_, _| Ok(())))
    }

    fn noop_function(path: &str) -> FunctionEntry {
        FunctionEntry::new(path, Arc::new(|_, _| Ok(Value::Null)))
    }

    #[test]
    fn valid_paths_accepted() {
        for path in ["a", "demo.echo", "demo.chat.receive", "_private.x1", "A.B_c"] {
            assert!(validate_path(path).is_ok(), "path {path}");
        }
    }

    #[test]
    fn invalid_paths_rejected() {
        for path in ["", "1abc", "demo..echo", ".echo", "echo.", "demo echo", "demo-echo"] {
            assert!(
                matches!(validate_path(path), Err(RegistryError::InvalidPath(_))),
                "path {path}"
            );
        }
    }

    #[test]
    fn multiple_signals_share_a_path() {
        let registry = SignalRegistry::builder()
            .signal(noop_signal("demo.echo"))
            .unwrap()
            .signal(noop_signal("demo.echo").queue("slow"))
            .unwrap()
            .build();
        assert_eq!(registry.signals_for("demo.echo").len(), 2);
        assert_eq!(registry.signals_for("demo.echo")[1].queue, "slow");
        assert!(registry.signals_for("unknown").is_empty());
    }

    #[test]
    fn second_function_on_a_path_rejected() {
        let err = SignalRegistry::builder()
            .function(noop_function("add"))
            .unwrap()
            .function(noop_function("add"))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateFunction("add".into()));
    }

    #[test]
    fn signal_and_function_may_share_a_path() {
        let registry = SignalRegistry::builder()
            .signal(noop_signal("demo.echo"))
            .unwrap()
            .function(noop_function("demo.echo"))
            .unwrap()
            .build();
        assert_eq!(registry.signals_for("demo.echo").len(), 1);
        assert!(registry.function_for("demo.echo").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn entry_defaults() {
        let entry = noop_signal("demo.echo");
        assert_eq!(entry.queue, crate::queue::DEFAULT_QUEUE);
        assert!((entry.permission)(&wirebus_core::Identity::anonymous("w")));
    }
}
