//! Calculator - two endpoints over an in-memory channel.
//!
//! This example demonstrates:
//! - Connecting a pair of endpoints with the builder pattern
//! - Awaiting a procedure outcome with `call`
//! - A structured error as the outcome of a failed invocation
//! - A progress callback reporting back mid-procedure
//!
//! # Running
//!
//! ```sh
//! cargo run --example calculator
//! ```

use crosscall::channel;
use crosscall::{Arg, Callback, Endpoint, StructuredError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (controller_side, worker_side) = channel::pair(32);

    // The worker registers the procedures the controller may invoke.
    let worker = Endpoint::builder()
        .procedure("add", |args: Vec<Arg>| async move {
            let a: f64 = args[0].deserialize()?;
            let b: f64 = args[1].deserialize()?;
            Ok(Arg::value(a + b)?)
        })
        .procedure("divide", |args: Vec<Arg>| async move {
            let a: f64 = args[0].deserialize()?;
            let b: f64 = args[1].deserialize()?;
            if b == 0.0 {
                return Err(StructuredError::new("division by zero")
                    .with_location(file!(), line!()));
            }
            Ok(Arg::value(a / b)?)
        })
        .procedure("sum_all", |args: Vec<Arg>| async move {
            let numbers: Vec<f64> = args[0].deserialize()?;
            let progress = args[1]
                .as_callback()
                .cloned()
                .ok_or_else(|| StructuredError::new("expected a progress callback"))?;
            let mut total = 0.0;
            for (i, n) in numbers.iter().enumerate() {
                total += n;
                progress.invoke(vec![Arg::value(i + 1)?, Arg::value(numbers.len())?])?;
            }
            Ok(Arg::value(total)?)
        })
        .connect(worker_side);

    let controller = Endpoint::builder().connect(controller_side);

    // A plain call with a value outcome.
    let sum = controller
        .call("add", vec![Arg::value(2.5)?, Arg::value(4.0)?])
        .await?;
    println!("2.5 + 4 = {}", sum.deserialize::<f64>()?);

    // An error outcome surfaces to the caller.
    match controller
        .call("divide", vec![Arg::value(1.0)?, Arg::value(0.0)?])
        .await
    {
        Ok(_) => println!("divide unexpectedly succeeded"),
        Err(e) => println!("divide failed as expected: {e}"),
    }

    // A callback argument: the worker reports progress while it works.
    let progress = Callback::new(|args| {
        let done: usize = args[0].deserialize().unwrap_or(0);
        let total: usize = args[1].deserialize().unwrap_or(0);
        println!("  progress: {done}/{total}");
    });
    let total = controller
        .call(
            "sum_all",
            vec![
                Arg::value(vec![1.0, 2.0, 3.0, 4.0])?,
                Arg::from(progress),
            ],
        )
        .await?;
    println!("sum_all = {}", total.deserialize::<f64>()?);

    // Graceful teardown: each side drains, then closes.
    controller.end();
    worker.closed().await;
    worker.end();
    controller.closed().await;

    Ok(())
}
