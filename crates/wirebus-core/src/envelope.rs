//! The queue/wire payload for one call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audience::Audience;

/// Signal or function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Fan-out, no response; any number of handlers may share a path.
    Signal,
    /// Request/response; exactly one responder per path.
    Function,
}

/// Delayed-execution options, honored by the work queue.
///
/// The dispatcher never runs its own clock: these values are handed to
/// the queue's native delayed-execution support.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scheduling {
    /// Seconds to wait before executing.
    pub countdown: Option<u64>,
    /// Absolute instant before which the job must not execute.
    pub eta: Option<DateTime<Utc>>,
    /// Seconds after which an unexecuted job is dropped.
    pub expires: Option<u64>,
}

impl Scheduling {
    /// True when no delayed-execution option is set.
    pub fn is_empty(&self) -> bool {
        self.countdown.is_none() && self.eta.is_none() && self.expires.is_none()
    }
}

/// One named call with keyword arguments and a destination set.
///
/// Invariant: a `Function` envelope has exactly one destination
/// (`Server`) and a `call_id`; a `Signal` envelope has no `call_id` and
/// may target any combination of audiences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    /// Dotted path naming the registered handler(s).
    pub path: String,
    /// Keyword arguments, JSON values keyed by name.
    pub kwargs: Map<String, Value>,
    /// Correlation id for function replies (`None` for signals).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Destination audiences.
    pub destinations: Vec<Audience>,
    /// Delayed-execution options.
    #[serde(default, skip_serializing_if = "Scheduling::is_empty")]
    pub scheduling: Scheduling,
}

impl CallEnvelope {
    /// Build a signal envelope.
    pub fn signal(
        path: impl Into<String>,
        kwargs: Map<String, Value>,
        destinations: Vec<Audience>,
    ) -> Self {
        Self {
            path: path.into(),
            kwargs,
            call_id: None,
            destinations,
            scheduling: Scheduling::default(),
        }
    }

    /// Build a function envelope. Destination is implicitly `Server`.
    pub fn function(
        path: impl Into<String>,
        kwargs: Map<String, Value>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kwargs,
            call_id: Some(call_id.into()),
            destinations: vec![Audience::Server],
            scheduling: Scheduling::default(),
        }
    }

    /// Attach delayed-execution options.
    pub fn with_scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }

    /// The call kind implied by the envelope shape.
    pub fn kind(&self) -> CallKind {
        if self.call_id.is_some() {
            CallKind::Function
        } else {
            CallKind::Signal
        }
    }
}
