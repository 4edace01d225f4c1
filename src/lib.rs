//! # crosscall
//!
//! Symmetric RPC endpoints over a single ordered duplex channel.
//!
//! Two endpoints, usually in different processes, exchange self-describing
//! envelopes over any transport that delivers them in order. Either side
//! registers named procedures; the peer invokes them with plain values,
//! live callbacks, and structured errors as arguments. Callbacks cross the
//! channel as index references and come back out as invokable stubs.
//!
//! ## Architecture
//!
//! - **Envelope layer**: self-describing `[kind, ...]` sequences (USER, RUN,
//!   CALLBACK, RETURN) carrying `[tag, value]` pairs as arguments
//! - **Registry**: one index space per endpoint holding persistent callbacks
//!   and one-shot call slots
//! - **Channel adapter**: pluggable ordered transport; an in-memory pair is
//!   included
//!
//! All inbound traffic for an endpoint runs through one dispatch task, so
//! handlers observe envelopes in exactly the order the peer produced them.
//!
//! ## Example
//!
//! ```ignore
//! use crosscall::{Arg, Endpoint};
//!
//! #[tokio::main]
//! async fn main() -> crosscall::Result<()> {
//!     let endpoint = Endpoint::builder()
//!         .procedure("add", |args: Vec<Arg>| async move {
//!             let a: i64 = args[0].deserialize()?;
//!             let b: i64 = args[1].deserialize()?;
//!             Ok(Arg::value(a + b)?)
//!         })
//!         .connect(adapter);
//!
//!     let sum = endpoint.call("add", vec![Arg::value(2)?, Arg::value(3)?]).await?;
//!     println!("2 + 3 = {}", sum.deserialize::<i64>()?);
//!
//!     endpoint.end();
//!     endpoint.closed().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod error;
pub mod marshal;
pub mod procedure;
pub mod protocol;
pub mod registry;
pub mod value;

mod callback;
mod endpoint;
mod outbound;

pub use callback::Callback;
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{CrosscallError, Result};
pub use outbound::OutboundHandle;
pub use value::{Arg, MessageEvent, SourceLocation, StructuredError};
