//! Work-queue boundary.
//!
//! [`JobQueue`] is the contract an external task engine would fill; the
//! bundled [`TokioJobQueue`] runs each job as a spawned task, honoring
//! the delayed-execution options (`countdown`, `eta`, `expires`) that a
//! real queue engine would handle natively. Job execution itself lives
//! behind [`JobRunner`], implemented by the dispatch engine.

use std::sync::Weak;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use wirebus_core::{Identity, Scheduling};

use crate::metrics::{JOBS_ENQUEUED_TOTAL, JOBS_EXPIRED_TOTAL};

/// Name of the queue used when an entry does not pick one.
pub const DEFAULT_QUEUE: &str = "default";

/// One unit of deferred work.
///
/// Carries a full identity snapshot so execution sees the caller as it
/// was at dispatch time, however late the job runs. Serializable, so an
/// external queue engine can carry it as a payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Queue the job was routed to.
    pub queue: String,
    /// Dotted path of the call.
    pub path: String,
    /// Validated keyword arguments.
    pub kwargs: Map<String, Value>,
    /// Caller snapshot.
    pub identity: Identity,
    /// Delayed-execution options.
    #[serde(default, skip_serializing_if = "Scheduling::is_empty")]
    pub scheduling: Scheduling,
    /// Run the server-side handlers registered on this queue.
    pub run_handlers: bool,
    /// Correlation id when the job is a function call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Topic the function reply is published to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_topic: Option<String>,
    /// Pre-serialized client topics to publish at execution time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_topics: Vec<String>,
}

/// Executes a job once its delay has elapsed.
pub trait JobRunner: Send + Sync {
    fn run(&self, job: Job);
}

/// Queue boundary: accepts jobs, runs them later.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job);
}

/// In-process queue running jobs as tokio tasks.
///
/// Holds the runner weakly so the engine's drop tears the pair down
/// without a cycle; a job whose runner is gone is silently discarded.
pub struct TokioJobQueue {
    runner: Weak<dyn JobRunner>,
}

impl TokioJobQueue {
    pub fn new(runner: Weak<dyn JobRunner>) -> Self {
        Self { runner }
    }
}

/// Delay implied by the scheduling options, `eta` winning over
/// `countdown` when both are set.
fn delay_for(scheduling: &Scheduling) -> Duration {
    if let Some(eta) = scheduling.eta {
        let until = eta - Utc::now();
        return until.to_std().unwrap_or(Duration::ZERO);
    }
    Duration::from_secs(scheduling.countdown.unwrap_or(0))
}

impl JobQueue for TokioJobQueue {
    fn enqueue(&self, job: Job) {
        counter!(JOBS_ENQUEUED_TOTAL, "queue" => job.queue.clone()).increment(1);
        let runner = self.runner.clone();
        let delay = delay_for(&job.scheduling);
        let expiry = job.scheduling.expires.map(Duration::from_secs);
        let _handle = tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            if let Some(expiry) = expiry {
                if delay > expiry {
                    counter!(JOBS_EXPIRED_TOTAL).increment(1);
                    warn!(path = %job.path, queue = %job.queue, "dropped expired job");
                    return;
                }
            }
            match runner.upgrade() {
                Some(runner) => runner.run(job),
                None => debug!(path = %job.path, "runner gone, job discarded"),
            }
        });
    }
}
