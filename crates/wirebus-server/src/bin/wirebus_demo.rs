//! Demo server: a tiny chat wired through the dispatch engine.
//!
//! Registers four handlers:
//! - `demo.echo` (signal): relays the content back as `demo.echo2` to
//!   every connected client and to the server,
//! - `demo.echo2` (signal): server-side sink for the relay, logs the
//!   content,
//! - `demo.chat.receive` (signal): forwards a chat line to the sender's
//!   window and to the named room topic,
//! - `add` (function): returns the sum of its two integer arguments.
//!
//! Configuration comes from an optional JSON file (first CLI argument)
//! merged over the defaults, then `WIREBUS_*` environment overrides.

use std::sync::Arc;

use anyhow::Context as _;
use serde_json::{Value, json};
use tracing::{debug, info};

use wirebus_core::{ArgSpec, Audience, casters};
use wirebus_server::dispatch::CallContext;
use wirebus_server::registry::{FunctionEntry, SignalEntry, SignalRegistry};
use wirebus_server::server::{AnonymousResolver, ServerContext, WirebusServer};

fn demo_registry() -> anyhow::Result<SignalRegistry> {
    let registry = SignalRegistry::builder()
        .signal(
            SignalEntry::new(
                "demo.echo",
                Arc::new(|ctx: &CallContext, kwargs| {
                    ctx.call(
                        "demo.echo2",
                        &[Audience::Broadcast, Audience::Server],
                        kwargs.clone(),
                    );
                    Ok(())
                }),
            )
            .args(ArgSpec::new().required("content")),
        )?
        .signal(
            SignalEntry::new(
                "demo.echo2",
                Arc::new(|_: &CallContext, kwargs| {
                    debug!(content = %kwargs.get("content").cloned().unwrap_or(serde_json::Value::Null), "echoed");
                    Ok(())
                }),
            )
            .args(ArgSpec::new().required("content")),
        )?
        .signal(
            SignalEntry::new(
                "demo.chat.receive",
                Arc::new(|ctx: &CallContext, kwargs| {
                    let room = kwargs
                        .get("room")
                        .and_then(Value::as_str)
                        .unwrap_or("lobby")
                        .to_owned();
                    ctx.call(
                        "demo.chat.message",
                        &[Audience::Window, Audience::addressable("chat", &room)],
                        kwargs.clone(),
                    );
                    Ok(())
                }),
            )
            .args(
                ArgSpec::new()
                    .typed("content", casters::string())
                    .typed_optional("room", casters::matching(r"^(\w+)$")),
            ),
        )?
        .function(
            FunctionEntry::new(
                "add",
                Arc::new(|_: &CallContext, kwargs| {
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
        )?
        .build();
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wirebus_core::logging::init();

    match std::env::args().nth(1) {
        Some(path) => {
            let settings = wirebus_settings::load_settings_from_path(std::path::Path::new(&path))
                .with_context(|| format!("loading settings from {path}"))?;
            wirebus_settings::init_settings(settings);
        }
        None => wirebus_settings::init_settings(wirebus_settings::WirebusSettings::default()),
    }

    let context = ServerContext::new(
        wirebus_settings::get_settings(),
        demo_registry()?,
        Arc::new(AnonymousResolver),
    );
    let server = WirebusServer::bind(context).await?;

    tokio::select! {
        result = server.run() => result.context("accept loop failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}
