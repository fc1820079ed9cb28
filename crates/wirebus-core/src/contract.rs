//! Declarative argument contracts.
//!
//! Contracts are declared explicitly at registration time with a
//! builder and checked by the dispatch engine before a handler is
//! invoked. Any violation rejects the whole call; there is no partial
//! application.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};

use crate::casters::Caster;
use crate::errors::Reject;

/// Argument contract for one registry entry.
///
/// Checking order: casters first (so a caster sees the raw value), then
/// required-presence, then unexpected-key detection unless
/// [`ArgSpec::accept_extra`] was set.
#[derive(Clone, Default)]
pub struct ArgSpec {
    required: BTreeSet<String>,
    optional: BTreeSet<String>,
    typed: HashMap<String, Caster>,
    accept_extra: bool,
}

impl ArgSpec {
    /// Empty contract: no arguments accepted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required argument.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>) -> Self {
        let _ = self.required.insert(name.into());
        self
    }

    /// Declare an optional argument.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        let _ = self.optional.insert(name.into());
        self
    }

    /// Declare a required argument with a caster.
    #[must_use]
    pub fn typed(mut self, name: impl Into<String>, caster: Caster) -> Self {
        let name = name.into();
        let _ = self.required.insert(name.clone());
        let _ = self.typed.insert(name, caster);
        self
    }

    /// Declare an optional argument with a caster.
    #[must_use]
    pub fn typed_optional(mut self, name: impl Into<String>, caster: Caster) -> Self {
        let name = name.into();
        let _ = self.optional.insert(name.clone());
        let _ = self.typed.insert(name, caster);
        self
    }

    /// Accept keyword arguments beyond the declared names.
    #[must_use]
    pub fn accept_extra(mut self) -> Self {
        self.accept_extra = true;
        self
    }

    /// Names of required arguments.
    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(String::as_str)
    }

    /// Validate and coerce `kwargs` against this contract.
    ///
    /// Returns the coerced kwargs, or the first violation found. The
    /// input is not mutated.
    pub fn check(&self, kwargs: &Map<String, Value>) -> Result<Map<String, Value>, Reject> {
        let mut out = kwargs.clone();
        for (name, caster) in &self.typed {
            if let Some(value) = out.get(name) {
                match caster(value) {
                    Ok(cast) => {
                        let _ = out.insert(name.clone(), cast);
                    }
                    Err(e) => {
                        return Err(Reject::InvalidArgument {
                            name: name.clone(),
                            reason: e.0,
                        });
                    }
                }
            }
        }
        for name in &self.required {
            if !out.contains_key(name) {
                return Err(Reject::MissingArgument { name: name.clone() });
            }
        }
        if !self.accept_extra {
            for name in out.keys() {
                if !self.required.contains(name) && !self.optional.contains(name) {
                    return Err(Reject::UnexpectedArgument { name: name.clone() });
                }
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for ArgSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgSpec")
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("typed", &self.typed.keys().collect::<Vec<_>>())
            .field("accept_extra", &self.accept_extra)
            .finish()
    }
}
