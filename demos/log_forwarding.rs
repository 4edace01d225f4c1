//! Log forwarding - a persistent callback as a log sink.
//!
//! This example demonstrates:
//! - Handing the worker a long-lived callback it can invoke at any time
//! - The controller receiving those invocations as structured log lines
//! - Releasing the callback once it is no longer needed
//!
//! # Running
//!
//! ```sh
//! cargo run --example log_forwarding
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crosscall::channel;
use crosscall::{Arg, Callback, Endpoint, StructuredError};

/// One log line as the worker ships it across the channel.
#[derive(Serialize, Deserialize, Debug)]
struct LogLine {
    level: String,
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (controller_side, worker_side) = channel::pair(32);

    // The worker keeps the sink callback across procedure invocations.
    let sink: Arc<Mutex<Option<Callback>>> = Arc::new(Mutex::new(None));
    let sink_install = sink.clone();
    let sink_work = sink.clone();
    let worker = Endpoint::builder()
        .procedure("install_sink", move |args: Vec<Arg>| {
            let sink = sink_install.clone();
            async move {
                *sink.lock() = args[0].as_callback().cloned();
                Ok(Arg::null())
            }
        })
        .procedure("do_work", move |args: Vec<Arg>| {
            let sink = sink_work.clone();
            async move {
                let steps: u32 = args[0].deserialize()?;
                let log = sink
                    .lock()
                    .clone()
                    .ok_or_else(|| StructuredError::new("no log sink installed"))?;
                for step in 1..=steps {
                    log.invoke(vec![Arg::value(LogLine {
                        level: "info".to_string(),
                        message: format!("finished step {step} of {steps}"),
                    })?])?;
                }
                Ok(Arg::value("complete")?)
            }
        })
        .connect(worker_side);

    let controller = Endpoint::builder().connect(controller_side);

    // Every line the worker emits lands in this closure.
    let forwarder = Callback::new(|args| match args[0].deserialize::<LogLine>() {
        Ok(line) => match line.level.as_str() {
            "warn" => tracing::warn!(target: "worker", "{}", line.message),
            _ => tracing::info!(target: "worker", "{}", line.message),
        },
        Err(e) => tracing::warn!("Unreadable log line: {}", e),
    });

    controller
        .call("install_sink", vec![Arg::from(forwarder.clone())])
        .await?;
    let outcome = controller.call("do_work", vec![Arg::value(3u32)?]).await?;
    tracing::info!("Worker reported: {}", outcome.deserialize::<String>()?);

    // The sink is no longer needed; retire its registry entry.
    controller.release_callback(&forwarder);

    controller.end();
    worker.closed().await;
    worker.end();
    controller.closed().await;

    Ok(())
}
