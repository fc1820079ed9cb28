//! Expected rejections, kept apart from real failures.
//!
//! A [`Reject`] is a normal outcome of validating one registry entry
//! against one call: the entry is skipped, a log line is written, and
//! sibling entries are unaffected. Handler crashes are a different thing
//! entirely and are caught at the job boundary.

use thiserror::Error;

/// Why a single registry-entry invocation was skipped.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Reject {
    /// A required argument was absent from the call kwargs.
    #[error("missing required argument {name:?}")]
    MissingArgument {
        /// Argument name.
        name: String,
    },
    /// An argument the contract does not accept was present.
    #[error("unexpected argument {name:?}")]
    UnexpectedArgument {
        /// Argument name.
        name: String,
    },
    /// A declared caster refused the provided value.
    #[error("invalid value for argument {name:?}: {reason}")]
    InvalidArgument {
        /// Argument name.
        name: String,
        /// Caster failure description.
        reason: String,
    },
    /// The entry's permission predicate refused the caller.
    #[error("permission denied")]
    PermissionDenied,
}

/// Failure produced by an argument caster.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CastError(pub String);

impl CastError {
    /// Build a cast error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
