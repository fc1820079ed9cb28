//! JSON shapes exchanged over text frames.
//!
//! Client → server: [`ClientMessage`] — either a signal
//! (`{"signal": path, "opts": {...}, "eta"?, "expires"?, "countdown"?}`)
//! or a function call (`{"func": path, "result_id": uuid, "opts": {...}}`).
//!
//! Server → client: [`SignalFrame`]
//! (`{"signal": path, "opts": {...}, "signal_id": uuid}`) or
//! [`FunctionReply`]
//! (`{"result_id": uuid, "result": any, "exception": string|null}`).
//!
//! The heartbeat sentinel is exchanged as a bare string outside these
//! shapes and is filtered before parsing.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::Scheduling;

/// An inbound message from an untrusted client.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Fire-and-forget signal, always dispatched to the server audience.
    Signal {
        /// Dotted signal path.
        signal: String,
        /// Keyword arguments.
        #[serde(default)]
        opts: Map<String, Value>,
        /// Epoch seconds; zero means unset.
        #[serde(default)]
        eta: u64,
        /// Seconds; zero means unset.
        #[serde(default)]
        expires: u64,
        /// Seconds; zero means unset.
        #[serde(default)]
        countdown: u64,
    },
    /// Request/response function call.
    Function {
        /// Dotted function path.
        func: String,
        /// Correlation id echoed back in the reply.
        result_id: String,
        /// Keyword arguments.
        #[serde(default)]
        opts: Map<String, Value>,
    },
}

impl ClientMessage {
    /// Scheduling options of a signal message, with zeros treated as
    /// unset (the wire encodes "absent" as `0`).
    pub fn scheduling(&self) -> Scheduling {
        match self {
            Self::Signal {
                eta,
                expires,
                countdown,
                ..
            } => Scheduling {
                countdown: (*countdown > 0).then_some(*countdown),
                eta: (*eta > 0).then(|| epoch_seconds(*eta)),
                expires: (*expires > 0).then_some(*expires),
            },
            Self::Function { .. } => Scheduling::default(),
        }
    }
}

fn epoch_seconds(secs: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// An outbound signal fan-out frame.
///
/// `signal_id` is a fresh correlation id shared by every recipient of the
/// same publish, so a client can deduplicate its own echo.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalFrame {
    /// Dotted signal path.
    pub signal: String,
    /// Keyword arguments.
    pub opts: Map<String, Value>,
    /// Publish correlation id.
    pub signal_id: String,
}

/// An outbound function reply, published to the caller's window topic.
///
/// `exception` is the stringified failure when the handler raised; the
/// reply never carries a partial result alongside an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionReply {
    /// Correlation id from the originating call.
    pub result_id: String,
    /// Handler result (`null` on failure).
    pub result: Value,
    /// Stringified handler failure, if any.
    pub exception: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn parses_signal_message() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"signal": "demo.echo", "opts": {"content": "hi"}}"#).unwrap();
        assert_matches!(msg, ClientMessage::Signal { ref signal, ref opts, .. } => {
            assert_eq!(signal, "demo.echo");
            assert_eq!(opts["content"], "hi");
        });
        assert!(msg.scheduling().is_empty());
    }

    #[test]
    fn parses_function_message() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"func": "add", "result_id": "r1", "opts": {"a": 2, "b": 3}}"#,
        )
        .unwrap();
        assert_matches!(msg, ClientMessage::Function { ref func, ref result_id, .. } => {
            assert_eq!(func, "add");
            assert_eq!(result_id, "r1");
        });
    }

    #[test]
    fn zero_scheduling_fields_mean_unset() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"signal": "s", "opts": {}, "eta": 0, "expires": 0, "countdown": 0}"#,
        )
        .unwrap();
        assert!(msg.scheduling().is_empty());
    }

    #[test]
    fn nonzero_scheduling_fields_carried() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"signal": "s", "opts": {}, "countdown": 10, "expires": 120}"#,
        )
        .unwrap();
        let sched = msg.scheduling();
        assert_eq!(sched.countdown, Some(10));
        assert_eq!(sched.expires, Some(120));
        assert!(sched.eta.is_none());
    }

    #[test]
    fn missing_opts_defaults_to_empty() {
        let msg: ClientMessage = serde_json::from_str(r#"{"signal": "s"}"#).unwrap();
        assert_matches!(msg, ClientMessage::Signal { ref opts, .. } => assert!(opts.is_empty()));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"nope": 1}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn function_reply_wire_shape() {
        let reply = FunctionReply {
            result_id: "r1".into(),
            result: json!(5),
            exception: None,
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(v, json!({"result_id": "r1", "result": 5, "exception": null}));
    }

    #[test]
    fn signal_frame_wire_shape() {
        let frame = SignalFrame {
            signal: "demo.echo2".into(),
            opts: Map::new(),
            signal_id: "sid".into(),
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            v,
            json!({"signal": "demo.echo2", "opts": {}, "signal_id": "sid"})
        );
    }
}
