//! A small topology: a default route, a named route and one worker.
//!
//! The same binary plays every role. Run it with no arguments; the hub
//! re-executes it for each child.
//!
//! ```text
//! cargo run --example topology
//! HUBWIRE_LOG=debug cargo run --example topology
//! ```
//!
//! The worker sends four requests, logs the answers and exits. With
//! respawn off, that exit also ends the hub.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hubwire::{App, HubConfig, HubError, Next, RouteEntry, RouteError};
use serde_json::{json, Map, Value};

const REQUESTS: [&str; 4] = [
    "path/callback",
    "numbers/14",
    "priv1/path",
    "priv1/fail",
];

#[tokio::main]
async fn main() -> hubwire::Result<()> {
    let mut priv1_options = Map::new();
    priv1_options.insert("var1".into(), json!("only for priv1"));

    let app = App::new()
        .config(HubConfig {
            count: Some(1),
            ..HubConfig::default()
        })
        .set("var2", "Yes Sir!")
        .route(|conn| {
            tracing::info!(var1 = ?conn.options().get("var1"), "route options");
            conn.add("path/callback", |req| {
                Box::pin(async move {
                    let _ = req.send(vec![Value::Null, json!("that")]).await;
                    Next::Halt
                })
            })?;
            conn.add("numbers/:num", |req| {
                Box::pin(async move {
                    let num = req.param("num").map(str::to_string);
                    let _ = req.send(vec![Value::Null, json!(num)]).await;
                    Next::Halt
                })
            })?;
            Ok(())
        })
        .entry(
            "priv1",
            RouteEntry::Nested {
                options: priv1_options,
                entry: Box::new(RouteEntry::setup(|conn| {
                    tracing::info!(var1 = ?conn.options().get_str("var1"), "priv1 options");
                    conn.add("path", |req| {
                        Box::pin(async move {
                            let _ = req.send(vec![Value::Null, json!("pon")]).await;
                            Next::Halt
                        })
                    })?;
                    conn.add("fail", |_req| {
                        Box::pin(async move {
                            Next::Error(RouteError::named("TypeError", "priv1 refused"))
                        })
                    })?;
                    Ok(())
                })),
            },
        )
        .worker(|conn| {
            let requester = conn.requester();
            let done = Arc::new(AtomicUsize::new(0));
            tokio::spawn(async move {
                for path in REQUESTS {
                    let done = done.clone();
                    let sent = requester
                        .request_with(path, vec![json!("ping")], move |reply| {
                            match reply.into_result() {
                                Ok(values) => tracing::info!(path, ?values, "answered"),
                                Err(e) => tracing::info!(path, error = %e, "failed"),
                            }
                            if done.fetch_add(1, Ordering::SeqCst) + 1 == REQUESTS.len() {
                                tracing::info!("End of demo");
                                std::process::exit(0);
                            }
                        })
                        .await;
                    if let Err(e) = sent {
                        tracing::warn!(path, "could not send: {}", e);
                    }
                }
            });
            Ok(())
        });

    match app.run().await {
        Err(HubError::WorkerExited { key: None, .. }) => Ok(()),
        other => other,
    }
}
