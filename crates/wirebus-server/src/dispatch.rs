//! Call validation, authorization and routing.
//!
//! The engine is the single funnel every call passes through, whatever
//! its origin:
//!
//! - untrusted client text arrives via [`DispatchEngine::handle_client_text`]
//!   (the websocket loop calls it; any other transport can too),
//! - trusted server-side code calls [`DispatchEngine::call`] /
//!   [`DispatchEngine::call_scheduled`], or hands a prebuilt
//!   [`CallEnvelope`] to [`DispatchEngine::dispatch`],
//! - deferred work re-enters through the [`JobRunner`] impl.
//!
//! Server-side execution always rides the work queue (one job per
//! distinct entry queue); client-bound fan-out is a broker publish per
//! serialized topic. When a call is scheduled, its client publishes ride
//! the default queue so the delay applies to them as well.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use metrics::counter;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use wirebus_core::{Audience, CallEnvelope, CallKind, Identity, Scheduling};
use wirebus_core::wire::{ClientMessage, FunctionReply, SignalFrame};

use crate::broker::Broker;
use crate::metrics::{DISPATCH_ACCEPTED_TOTAL, DISPATCH_REJECTED_TOTAL};
use crate::queue::{Job, JobQueue, JobRunner, TokioJobQueue};
use crate::registry::SignalRegistry;
use crate::topics::TopicRouter;

/// What a handler sees about the call it is servicing.
///
/// Holds the engine weakly so handlers can emit further calls without
/// keeping the engine alive past its owner.
pub struct CallContext {
    /// Caller snapshot, as resolved at handshake (or dispatch) time.
    pub identity: Identity,
    engine: Weak<DispatchEngine>,
}

impl CallContext {
    /// Emit a signal from inside a handler, as the current caller.
    pub fn call(&self, path: &str, to: &[Audience], kwargs: Map<String, Value>) {
        if let Some(engine) = self.engine.upgrade() {
            engine.call(&self.identity, path, to, kwargs);
        }
    }
}

/// The dispatch engine. Immutable after construction, shared via `Arc`.
pub struct DispatchEngine {
    registry: SignalRegistry,
    broker: Arc<dyn Broker>,
    router: TopicRouter,
    queue: Box<dyn JobQueue>,
    default_queue: String,
    weak_self: Weak<DispatchEngine>,
}

impl DispatchEngine {
    /// Engine backed by the in-process tokio queue.
    pub fn new(
        registry: SignalRegistry,
        broker: Arc<dyn Broker>,
        router: TopicRouter,
        default_queue: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let runner: Weak<dyn JobRunner> = weak.clone();
            Self {
                registry,
                broker,
                router,
                queue: Box::new(TokioJobQueue::new(runner)),
                default_queue: default_queue.into(),
                weak_self: weak.clone(),
            }
        })
    }

    pub fn registry(&self) -> &SignalRegistry {
        &self.registry
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// One inbound text payload from an untrusted client.
    ///
    /// Malformed JSON is logged and dropped; the connection stays up.
    /// The heartbeat sentinel must be filtered before this point.
    pub fn handle_client_text(&self, identity: &Identity, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                counter!(DISPATCH_REJECTED_TOTAL, "reason" => "malformed").increment(1);
                warn!(error = %e, "dropped unparseable client message");
                return;
            }
        };
        let scheduling = message.scheduling();
        match message {
            ClientMessage::Signal { signal, opts, .. } => {
                self.client_signal(identity, &signal, opts, scheduling);
            }
            ClientMessage::Function {
                func,
                result_id,
                opts,
            } => {
                self.client_function(identity, &func, &result_id, opts);
            }
        }
    }

    /// Untrusted signal: permission-filtered fan-out to server handlers.
    ///
    /// Client signals only ever target the server audience; relaying to
    /// other clients is a decision handlers make.
    fn client_signal(
        &self,
        identity: &Identity,
        path: &str,
        kwargs: Map<String, Value>,
        scheduling: Scheduling,
    ) {
        let entries = self.registry.signals_for(path);
        if entries.is_empty() {
            counter!(DISPATCH_REJECTED_TOTAL, "reason" => "unknown_signal").increment(1);
            warn!(path, "client signal has no registered handler");
            return;
        }
        let mut queues: Vec<String> = Vec::new();
        for entry in entries {
            if !(entry.permission)(identity) {
                counter!(DISPATCH_REJECTED_TOTAL, "reason" => "permission").increment(1);
                debug!(path, queue = %entry.queue, "caller not allowed, entry skipped");
                continue;
            }
            if let Err(reject) = entry.spec.check(&kwargs) {
                counter!(DISPATCH_REJECTED_TOTAL, "reason" => "contract").increment(1);
                warn!(path, %reject, "client signal rejected by contract");
                continue;
            }
            if !queues.contains(&entry.queue) {
                queues.push(entry.queue.clone());
            }
        }
        if queues.is_empty() {
            return;
        }
        counter!(DISPATCH_ACCEPTED_TOTAL, "kind" => "signal").increment(1);
        for queue in queues {
            self.queue.enqueue(Job {
                queue,
                path: path.to_owned(),
                kwargs: kwargs.clone(),
                identity: identity.clone(),
                scheduling: scheduling.clone(),
                run_handlers: true,
                call_id: None,
                reply_topic: None,
                client_topics: Vec::new(),
            });
        }
    }

    /// Untrusted function call: exactly one reply, always.
    ///
    /// Unknown path, permission denial and contract violations all
    /// produce an exception reply on the caller's window topic rather
    /// than silence.
    fn client_function(
        &self,
        identity: &Identity,
        path: &str,
        result_id: &str,
        kwargs: Map<String, Value>,
    ) {
        let Some(reply_topic) = self.router.serialize(identity, &Audience::Window) else {
            warn!(path, "function call from a connection without a window, dropped");
            return;
        };
        let Some(entry) = self.registry.function_for(path) else {
            counter!(DISPATCH_REJECTED_TOTAL, "reason" => "unknown_function").increment(1);
            self.publish_reply(
                &reply_topic,
                FunctionReply {
                    result_id: result_id.to_owned(),
                    result: Value::Null,
                    exception: Some(format!("no function registered for {path:?}")),
                },
            );
            return;
        };
        if !(entry.permission)(identity) {
            counter!(DISPATCH_REJECTED_TOTAL, "reason" => "permission").increment(1);
            self.publish_reply(
                &reply_topic,
                FunctionReply {
                    result_id: result_id.to_owned(),
                    result: Value::Null,
                    exception: Some("permission denied".to_owned()),
                },
            );
            return;
        }
        if let Err(reject) = entry.spec.check(&kwargs) {
            counter!(DISPATCH_REJECTED_TOTAL, "reason" => "contract").increment(1);
            self.publish_reply(
                &reply_topic,
                FunctionReply {
                    result_id: result_id.to_owned(),
                    result: Value::Null,
                    exception: Some(reject.to_string()),
                },
            );
            return;
        }
        counter!(DISPATCH_ACCEPTED_TOTAL, "kind" => "function").increment(1);
        self.enqueue_function_job(
            identity,
            entry.queue.clone(),
            path,
            kwargs,
            result_id,
            reply_topic,
        );
    }

    fn enqueue_function_job(
        &self,
        identity: &Identity,
        queue: String,
        path: &str,
        kwargs: Map<String, Value>,
        result_id: &str,
        reply_topic: String,
    ) {
        self.queue.enqueue(Job {
            queue,
            path: path.to_owned(),
            kwargs,
            identity: identity.clone(),
            scheduling: Scheduling::default(),
            run_handlers: true,
            call_id: Some(result_id.to_owned()),
            reply_topic: Some(reply_topic),
            client_topics: Vec::new(),
        });
    }

    /// Trusted server-side signal emission.
    ///
    /// An empty `to` means the calling user, matching the common case of
    /// notifying whoever triggered the work. Permission checks do not
    /// apply to trusted callers; argument contracts still do, at
    /// execution time.
    pub fn call(&self, identity: &Identity, path: &str, to: &[Audience], kwargs: Map<String, Value>) {
        self.call_scheduled(identity, path, to, kwargs, Scheduling::default());
    }

    /// [`DispatchEngine::call`] with delayed-execution options.
    pub fn call_scheduled(
        &self,
        identity: &Identity,
        path: &str,
        to: &[Audience],
        kwargs: Map<String, Value>,
        scheduling: Scheduling,
    ) {
        let destinations = if to.is_empty() {
            vec![Audience::User]
        } else {
            to.to_vec()
        };
        self.dispatch(
            identity,
            CallEnvelope::signal(path, kwargs, destinations).with_scheduling(scheduling),
        );
    }

    /// Trusted entry point for a fully formed envelope.
    ///
    /// Signal envelopes fan out to their destination set; function
    /// envelopes run through the queue and reply on the caller's window
    /// topic. No permission check applies, matching
    /// [`DispatchEngine::call`].
    pub fn dispatch(&self, identity: &Identity, envelope: CallEnvelope) {
        match envelope.kind() {
            CallKind::Signal => self.route_signal(identity, &envelope),
            CallKind::Function => self.route_function(identity, &envelope),
        }
    }

    fn route_signal(&self, identity: &Identity, envelope: &CallEnvelope) {
        let CallEnvelope {
            path,
            kwargs,
            destinations,
            scheduling,
            ..
        } = envelope;

        let mut queues: Vec<String> = Vec::new();
        if destinations.iter().any(Audience::is_server) {
            for entry in self.registry.signals_for(path) {
                if !queues.contains(&entry.queue) {
                    queues.push(entry.queue.clone());
                }
            }
            if queues.is_empty() {
                debug!(path = %path, "server destination but no registered handler");
            }
        }

        let mut topics: Vec<String> = Vec::new();
        for audience in destinations {
            if let Some(topic) = self.router.serialize(identity, audience) {
                if !topics.contains(&topic) {
                    topics.push(topic);
                }
            }
        }

        if scheduling.is_empty() {
            if !topics.is_empty() {
                self.publish_signal(path, kwargs, &topics);
            }
        } else if !topics.is_empty() && !queues.contains(&self.default_queue) {
            // publish-only job so the delay covers the client fan-out
            self.queue.enqueue(Job {
                queue: self.default_queue.clone(),
                path: path.to_owned(),
                kwargs: kwargs.clone(),
                identity: identity.clone(),
                scheduling: scheduling.clone(),
                run_handlers: false,
                call_id: None,
                reply_topic: None,
                client_topics: topics.clone(),
            });
        }

        for queue in queues {
            let client_topics = if !scheduling.is_empty() && queue == self.default_queue {
                topics.clone()
            } else {
                Vec::new()
            };
            self.queue.enqueue(Job {
                queue,
                path: path.to_owned(),
                kwargs: kwargs.clone(),
                identity: identity.clone(),
                scheduling: scheduling.clone(),
                run_handlers: true,
                call_id: None,
                reply_topic: None,
                client_topics,
            });
        }
    }

    fn route_function(&self, identity: &Identity, envelope: &CallEnvelope) {
        let Some(result_id) = envelope.call_id.as_deref() else {
            error!(path = %envelope.path, "function envelope without a call id, dropped");
            return;
        };
        let Some(reply_topic) = self.router.serialize(identity, &Audience::Window) else {
            warn!(path = %envelope.path, "function envelope for an identity without a window, dropped");
            return;
        };
        let Some(entry) = self.registry.function_for(&envelope.path) else {
            counter!(DISPATCH_REJECTED_TOTAL, "reason" => "unknown_function").increment(1);
            self.publish_reply(
                &reply_topic,
                FunctionReply {
                    result_id: result_id.to_owned(),
                    result: Value::Null,
                    exception: Some(format!("no function registered for {:?}", envelope.path)),
                },
            );
            return;
        };
        counter!(DISPATCH_ACCEPTED_TOTAL, "kind" => "function").increment(1);
        self.enqueue_function_job(
            identity,
            entry.queue.clone(),
            &envelope.path,
            envelope.kwargs.clone(),
            result_id,
            reply_topic,
        );
    }

    /// Publish one signal to a set of topics under a fresh `signal_id`.
    fn publish_signal(&self, path: &str, kwargs: &Map<String, Value>, topics: &[String]) {
        let frame = SignalFrame {
            signal: path.to_owned(),
            opts: kwargs.clone(),
            signal_id: Uuid::new_v4().to_string(),
        };
        match serde_json::to_string(&frame) {
            Ok(payload) => {
                for topic in topics {
                    self.broker.publish(topic, &payload);
                }
            }
            Err(e) => error!(path, error = %e, "failed to encode signal frame"),
        }
    }

    fn publish_reply(&self, topic: &str, reply: FunctionReply) {
        match serde_json::to_string(&reply) {
            Ok(payload) => self.broker.publish(topic, &payload),
            Err(e) => error!(result_id = %reply.result_id, error = %e, "failed to encode reply"),
        }
    }

    fn context(&self, identity: Identity) -> CallContext {
        CallContext {
            identity,
            engine: self.weak_self.clone(),
        }
    }

    fn run_signal_job(&self, job: &Job) {
        let context = self.context(job.identity.clone());
        for entry in self.registry.signals_for(&job.path) {
            if entry.queue != job.queue {
                continue;
            }
            let kwargs = match entry.spec.check(&job.kwargs) {
                Ok(kwargs) => kwargs,
                Err(reject) => {
                    counter!(DISPATCH_REJECTED_TOTAL, "reason" => "contract").increment(1);
                    warn!(path = %job.path, %reject, "entry skipped at execution");
                    continue;
                }
            };
            match catch_unwind(AssertUnwindSafe(|| (entry.handler)(&context, &kwargs))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(path = %job.path, queue = %job.queue, error = %e, "signal handler failed");
                }
                Err(payload) => {
                    error!(
                        path = %job.path,
                        queue = %job.queue,
                        panic = %panic_message(payload.as_ref()),
                        "signal handler panicked"
                    );
                }
            }
        }
    }

    fn run_function_job(&self, job: &Job, call_id: &str) {
        let Some(reply_topic) = job.reply_topic.as_deref() else {
            error!(path = %job.path, "function job without a reply topic");
            return;
        };
        let reply = match self.registry.function_for(&job.path) {
            Some(entry) => {
                let context = self.context(job.identity.clone());
                let outcome = match entry.spec.check(&job.kwargs) {
                    Ok(kwargs) => {
                        match catch_unwind(AssertUnwindSafe(|| (entry.handler)(&context, &kwargs)))
                        {
                            Ok(result) => result.map_err(|e| e.to_string()),
                            Err(payload) => {
                                Err(format!(
                                    "handler panicked: {}",
                                    panic_message(payload.as_ref())
                                ))
                            }
                        }
                    }
                    Err(reject) => Err(reject.to_string()),
                };
                match outcome {
                    Ok(result) => FunctionReply {
                        result_id: call_id.to_owned(),
                        result,
                        exception: None,
                    },
                    Err(exception) => FunctionReply {
                        result_id: call_id.to_owned(),
                        result: Value::Null,
                        exception: Some(exception),
                    },
                }
            }
            None => FunctionReply {
                result_id: call_id.to_owned(),
                result: Value::Null,
                exception: Some(format!("no function registered for {:?}", job.path)),
            },
        };
        self.publish_reply(reply_topic, reply);
    }
}

/// Best-effort text for a caught panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

impl JobRunner for DispatchEngine {
    fn run(&self, job: Job) {
        if job.run_handlers {
            match job.call_id.clone() {
                Some(call_id) => self.run_function_job(&job, &call_id),
                None => self.run_signal_job(&job),
            }
        }
        if !job.client_topics.is_empty() {
            self.publish_signal(&job.path, &job.kwargs, &job.client_topics);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::registry::{FunctionEntry, SignalEntry};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use wirebus_core::{ArgSpec, casters, permissions};

    fn kwargs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn user(pk: i64, window: &str) -> Identity {
        let mut id = Identity::anonymous(window);
        id.user_pk = Some(pk);
        id.username = Some(format!("user{pk}"));
        id
    }

    async fn recv_json(sub: &mut crate::broker::Subscription) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for broker message")
            .expect("broker gone");
        serde_json::from_str(&message.payload).unwrap()
    }

    struct Fixture {
        engine: Arc<DispatchEngine>,
        broker: Arc<MemoryBroker>,
        calls: CallLog,
    }

    type CallLog = Arc<Mutex<Vec<(String, Map<String, Value>)>>>;

    fn record(name: &'static str, calls: &CallLog) -> crate::registry::SignalHandler {
        let calls = Arc::clone(calls);
        Arc::new(move |_: &CallContext, kwargs: &Map<String, Value>| {
            calls.lock().push((name.to_owned(), kwargs.clone()));
            Ok(())
        })
    }

    fn fixture() -> Fixture {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let registry = SignalRegistry::builder()
            .signal(
                SignalEntry::new("demo.echo", record("echo", &calls))
                    .args(ArgSpec::new().required("content")),
            )
            .unwrap()
            .signal(
                SignalEntry::new("demo.echo", record("echo_slow", &calls))
                    .queue("slow")
                    .args(ArgSpec::new().required("content")),
            )
            .unwrap()
            .signal(
                SignalEntry::new("staff.only", record("staff", &calls))
                    .permission(permissions::staff())
                    .args(ArgSpec::new().accept_extra()),
            )
            .unwrap()
            .signal(
                SignalEntry::new(
                    "flaky.notify",
                    Arc::new(
                        |_: &CallContext,
                         _: &Map<String, Value>|
                         -> Result<(), crate::errors::HandlerError> {
                            panic!("kaboom")
                        },
                    ),
                )
                .args(ArgSpec::new().accept_extra()),
            )
            .unwrap()
            .signal(
                SignalEntry::new("flaky.notify", record("survivor", &calls))
                    .args(ArgSpec::new().accept_extra()),
            )
            .unwrap()
            .function(
                FunctionEntry::new(
                    "add",
                    Arc::new(|_: &CallContext, kwargs: &Map<String, Value>| {
                        let a = kwargs["a"].as_i64().unwrap_or(0);
                        let b = kwargs["b"].as_i64().unwrap_or(0);
                        Ok(json!(a + b))
                    }),
                )
                .args(
                    ArgSpec::new()
                        .typed("a", casters::integer())
                        .typed("b", casters::integer()),
                ),
            )
            .unwrap()
            .function(
                FunctionEntry::new(
                    "always_fails",
                    Arc::new(|_: &CallContext, _: &Map<String, Value>| {
                        Err(crate::errors::HandlerError::new("boom"))
                    }),
                )
                .args(ArgSpec::new().accept_extra()),
            )
            .unwrap()
            .function(
                FunctionEntry::new(
                    "explode",
                    Arc::new(
                        |_: &CallContext,
                         _: &Map<String, Value>|
                         -> Result<Value, crate::errors::HandlerError> {
                            panic!("blew up")
                        },
                    ),
                )
                .args(ArgSpec::new().accept_extra()),
            )
            .unwrap()
            .build();
        let broker = Arc::new(MemoryBroker::new());
        let engine = DispatchEngine::new(
            registry,
            Arc::clone(&broker) as Arc<dyn Broker>,
            TopicRouter::new("ws"),
            crate::queue::DEFAULT_QUEUE,
        );
        Fixture {
            engine,
            broker,
            calls,
        }
    }

    async fn settle() {
        // queue jobs are spawned tasks; give them a chance to run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn client_signal_runs_every_allowed_entry_once_per_queue() {
        let fx = fixture();
        fx.engine.handle_client_text(
            &user(1, "w1"),
            r#"{"signal": "demo.echo", "opts": {"content": "hi"}}"#,
        );
        settle().await;
        let calls = fx.calls.lock();
        let names: Vec<&str> = calls.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(calls.len(), 2);
        assert!(names.contains(&"echo") && names.contains(&"echo_slow"));
    }

    #[tokio::test]
    async fn contract_violation_drops_the_call() {
        let fx = fixture();
        fx.engine
            .handle_client_text(&user(1, "w1"), r#"{"signal": "demo.echo", "opts": {}}"#);
        fx.engine.handle_client_text(
            &user(1, "w1"),
            r#"{"signal": "demo.echo", "opts": {"content": "x", "extra": 1}}"#,
        );
        settle().await;
        assert!(fx.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn permission_filters_entries_per_caller() {
        let fx = fixture();
        fx.engine
            .handle_client_text(&user(1, "w1"), r#"{"signal": "staff.only", "opts": {}}"#);
        settle().await;
        assert!(fx.calls.lock().is_empty());

        let mut staff = user(2, "w2");
        staff.is_staff = true;
        fx.engine
            .handle_client_text(&staff, r#"{"signal": "staff.only", "opts": {}}"#);
        settle().await;
        assert_eq!(fx.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn unknown_signal_is_ignored() {
        let fx = fixture();
        fx.engine
            .handle_client_text(&user(1, "w1"), r#"{"signal": "no.such", "opts": {}}"#);
        settle().await;
        assert!(fx.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_text_is_ignored() {
        let fx = fixture();
        fx.engine.handle_client_text(&user(1, "w1"), "not json");
        fx.engine.handle_client_text(&user(1, "w1"), r#"{"nope": 1}"#);
        settle().await;
        assert!(fx.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn function_reply_reaches_the_window_topic() {
        let fx = fixture();
        let caller = user(1, "w1");
        let mut sub = fx.broker.subscribe(&["ws-window.w1".into()]);
        fx.engine.handle_client_text(
            &caller,
            r#"{"func": "add", "result_id": "r1", "opts": {"a": 2, "b": 3}}"#,
        );
        let reply = recv_json(&mut sub).await;
        assert_eq!(reply, json!({"result_id": "r1", "result": 5, "exception": null}));
    }

    #[tokio::test]
    async fn unknown_function_gets_an_exception_reply() {
        let fx = fixture();
        let caller = user(1, "w1");
        let mut sub = fx.broker.subscribe(&["ws-window.w1".into()]);
        fx.engine.handle_client_text(
            &caller,
            r#"{"func": "no.such", "result_id": "r2", "opts": {}}"#,
        );
        let reply = recv_json(&mut sub).await;
        assert_eq!(reply["result_id"], "r2");
        assert_eq!(reply["result"], Value::Null);
        assert!(reply["exception"].as_str().unwrap().contains("no.such"));
    }

    #[tokio::test]
    async fn handler_failure_becomes_an_exception_reply() {
        let fx = fixture();
        let caller = user(1, "w1");
        let mut sub = fx.broker.subscribe(&["ws-window.w1".into()]);
        fx.engine.handle_client_text(
            &caller,
            r#"{"func": "always_fails", "result_id": "r3", "opts": {}}"#,
        );
        let reply = recv_json(&mut sub).await;
        assert_eq!(reply["result"], Value::Null);
        assert_eq!(reply["exception"], "boom");
    }

    #[tokio::test]
    async fn bad_function_args_become_an_exception_reply() {
        let fx = fixture();
        let caller = user(1, "w1");
        let mut sub = fx.broker.subscribe(&["ws-window.w1".into()]);
        fx.engine.handle_client_text(
            &caller,
            r#"{"func": "add", "result_id": "r4", "opts": {"a": 1}}"#,
        );
        let reply = recv_json(&mut sub).await;
        assert_eq!(reply["result"], Value::Null);
        assert!(reply["exception"].as_str().unwrap().contains('b'));
    }

    #[tokio::test]
    async fn panicking_entry_does_not_block_siblings() {
        let fx = fixture();
        fx.engine
            .handle_client_text(&user(1, "w1"), r#"{"signal": "flaky.notify", "opts": {}}"#);
        settle().await;
        let calls = fx.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "survivor");
    }

    #[tokio::test]
    async fn panicking_function_still_replies() {
        let fx = fixture();
        let caller = user(1, "w1");
        let mut sub = fx.broker.subscribe(&["ws-window.w1".into()]);
        fx.engine.handle_client_text(
            &caller,
            r#"{"func": "explode", "result_id": "r5", "opts": {}}"#,
        );
        let reply = recv_json(&mut sub).await;
        assert_eq!(reply["result"], Value::Null);
        let exception = reply["exception"].as_str().unwrap();
        assert!(exception.contains("panicked") && exception.contains("blew up"));
    }

    #[tokio::test]
    async fn envelope_dispatch_routes_by_kind() {
        let fx = fixture();
        let caller = user(1, "w1");

        let mut bcast = fx.broker.subscribe(&["ws-broadcast".into()]);
        fx.engine.dispatch(
            &caller,
            CallEnvelope::signal(
                "announce",
                kwargs(&[("content", json!("hi"))]),
                vec![Audience::Broadcast],
            ),
        );
        let frame = recv_json(&mut bcast).await;
        assert_eq!(frame["signal"], "announce");

        let mut window = fx.broker.subscribe(&["ws-window.w1".into()]);
        fx.engine.dispatch(
            &caller,
            CallEnvelope::function(
                "add",
                kwargs(&[("a", json!(2)), ("b", json!(4))]),
                "r9",
            ),
        );
        let reply = recv_json(&mut window).await;
        assert_eq!(reply, json!({"result_id": "r9", "result": 6, "exception": null}));
    }

    #[tokio::test]
    async fn mixed_destinations_publish_and_run_handlers() {
        let fx = fixture();
        let mut bcast = fx.broker.subscribe(&["ws-broadcast".into()]);
        fx.engine.call(
            &user(1, "w1"),
            "demo.echo",
            &[Audience::Broadcast, Audience::Server],
            kwargs(&[("content", json!("hi"))]),
        );
        let frame = recv_json(&mut bcast).await;
        assert_eq!(frame["opts"]["content"], "hi");
        settle().await;
        assert_eq!(fx.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn server_call_defaults_to_the_calling_user() {
        let fx = fixture();
        let caller = user(7, "w1");
        let mut sub = fx.broker.subscribe(&["ws-user.7".into()]);
        fx.engine.call(
            &caller,
            "notify",
            &[],
            kwargs(&[("content", json!("done"))]),
        );
        let frame = recv_json(&mut sub).await;
        assert_eq!(frame["signal"], "notify");
        assert_eq!(frame["opts"]["content"], "done");
        assert!(frame["signal_id"].is_string());
    }

    #[tokio::test]
    async fn broadcast_publish_carries_one_signal_id() {
        let fx = fixture();
        let caller = user(1, "w1");
        let mut a = fx.broker.subscribe(&["ws-broadcast".into()]);
        let mut b = fx.broker.subscribe(&["ws-broadcast".into()]);
        fx.engine.call(
            &caller,
            "announce",
            &[Audience::Broadcast],
            kwargs(&[("content", json!("hi"))]),
        );
        let frame_a = recv_json(&mut a).await;
        let frame_b = recv_json(&mut b).await;
        assert_eq!(frame_a["signal_id"], frame_b["signal_id"]);
    }

    #[tokio::test]
    async fn server_destination_runs_handlers_via_queue() {
        let fx = fixture();
        fx.engine.call(
            &user(1, "w1"),
            "demo.echo",
            &[Audience::Server],
            kwargs(&[("content", json!("hi"))]),
        );
        settle().await;
        assert_eq!(fx.calls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_client_publish_rides_the_default_queue() {
        let fx = fixture();
        let caller = user(1, "w1");
        let mut sub = fx.broker.subscribe(&["ws-broadcast".into()]);
        fx.engine.call_scheduled(
            &caller,
            "announce",
            &[Audience::Broadcast],
            kwargs(&[("content", json!("later"))]),
            Scheduling {
                countdown: Some(30),
                ..Scheduling::default()
            },
        );
        settle().await;
        // nothing published until the countdown has elapsed
        tokio::time::sleep(Duration::from_secs(29)).await;
        settle().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        let frame = recv_json(&mut sub).await;
        assert_eq!(frame["opts"]["content"], "later");
    }

    #[tokio::test]
    async fn handler_can_relay_through_its_context() {
        let registry = SignalRegistry::builder()
            .signal(
                SignalEntry::new(
                    "relay",
                    Arc::new(|ctx: &CallContext, kwargs: &Map<String, Value>| {
                        ctx.call("relayed", &[Audience::Broadcast], kwargs.clone());
                        Ok(())
                    }),
                )
                .args(ArgSpec::new().accept_extra()),
            )
            .unwrap()
            .build();
        let broker = Arc::new(MemoryBroker::new());
        let engine = DispatchEngine::new(
            registry,
            Arc::clone(&broker) as Arc<dyn Broker>,
            TopicRouter::new("ws"),
            crate::queue::DEFAULT_QUEUE,
        );
        let mut sub = broker.subscribe(&["ws-broadcast".into()]);
        engine.handle_client_text(
            &user(1, "w1"),
            r#"{"signal": "relay", "opts": {"content": "hi"}}"#,
        );
        let frame = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        let frame: Value = serde_json::from_str(&frame.payload).unwrap();
        assert_eq!(frame["signal"], "relayed");
        assert_eq!(frame["opts"]["content"], "hi");
    }
}
