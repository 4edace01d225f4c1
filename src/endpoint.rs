//! Endpoint builder and runtime loop.
//!
//! The [`EndpointBuilder`] provides a fluent API for registering procedures
//! and hooks and connecting a channel adapter. The [`Endpoint`] manages the
//! lifecycle:
//! 1. Split the adapter into sender and receiver halves
//! 2. Spawn the writer task on the sender half
//! 3. Spawn the dispatch task on the receiver half
//! 4. Dispatch inbound envelopes in arrival order until the channel ends
//!
//! Both sides of a connection are the same type; controller and worker
//! differ only in which procedures they register and which calls they make.
//!
//! # Example
//!
//! ```ignore
//! use crosscall::{Arg, Endpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = Endpoint::builder()
//!         .procedure("add", |args: Vec<Arg>| async move {
//!             let a: i64 = args[0].deserialize()?;
//!             let b: i64 = args[1].deserialize()?;
//!             Ok(Arg::value(a + b)?)
//!         })
//!         .connect(adapter);
//!
//!     let sum = endpoint.call("add", vec![Arg::value(2)?, Arg::value(3)?]).await?;
//!     endpoint.end();
//!     endpoint.closed().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::callback::Callback;
use crate::channel::{ChannelAdapter, ChannelReceiver, ChannelSender};
use crate::error::{CrosscallError, Result};
use crate::marshal;
use crate::outbound::{self, OutboundHandle};
use crate::procedure::{self, ProcedureResult, ProcedureTable};
use crate::protocol::{Envelope, TaggedValue};
use crate::registry::CallbackRegistry;
use crate::value::{Arg, MessageEvent, StructuredError};

/// Hook receiving user messages from the peer.
type MessageHook = Arc<dyn Fn(MessageEvent) + Send + Sync>;

/// Hook receiving dispatch faults that have no completion handler to go to.
type FaultHook = Arc<dyn Fn(&CrosscallError) + Send + Sync>;

/// Builder for configuring and connecting an endpoint.
///
/// Use the fluent API to register procedures and hooks, then call
/// [`connect`](Self::connect) with a channel adapter (or
/// [`spawn`](Self::spawn) with pre-split halves) to start the endpoint.
pub struct EndpointBuilder {
    procedures: ProcedureTable,
    on_message: Option<MessageHook>,
    on_fault: Option<FaultHook>,
}

impl EndpointBuilder {
    /// Create a new endpoint builder.
    pub fn new() -> Self {
        Self {
            procedures: ProcedureTable::new(),
            on_message: None,
            on_fault: None,
        }
    }

    /// Register a named procedure the peer can invoke.
    ///
    /// The procedure receives the unmarshaled arguments; callback arguments
    /// arrive as invokable [`Callback`] stubs.
    pub fn procedure<F, Fut>(mut self, name: &str, procedure: F) -> Self
    where
        F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        self.procedures.register(name, procedure);
        self
    }

    /// Replace the whole procedure table.
    pub fn procedures(mut self, table: ProcedureTable) -> Self {
        self.procedures = table;
        self
    }

    /// Install the handler for USER envelopes from the peer.
    ///
    /// Without one, user messages are dropped with a debug log.
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(handler));
        self
    }

    /// Install the hook for dispatch faults.
    ///
    /// Fired for faults with no completion handler to deliver to: slot
    /// resolution failures, failed detached invocations, and fatal channel
    /// errors. Every fault is also logged.
    pub fn on_fault<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CrosscallError) + Send + Sync + 'static,
    {
        self.on_fault = Some(Arc::new(hook));
        self
    }

    /// Connect a channel adapter and start the endpoint.
    pub fn connect<A: ChannelAdapter>(self, adapter: A) -> Endpoint {
        let (sender, receiver) = adapter.into_split();
        self.spawn(sender, receiver)
    }

    /// Start the endpoint on pre-split channel halves.
    ///
    /// Spawns the writer and dispatch tasks, so this must be called from
    /// within a Tokio runtime.
    pub fn spawn<S, R>(self, sender: S, receiver: R) -> Endpoint
    where
        S: ChannelSender,
        R: ChannelReceiver,
    {
        // 1. Shared callback registry; the outbound handle only holds it
        //    weakly so stray stubs cannot keep a dead endpoint alive.
        let registry = Arc::new(Mutex::new(CallbackRegistry::new()));

        // 2. Outbound queue feeding the writer task.
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let outbound = OutboundHandle::new(tx, pending.clone(), Arc::downgrade(&registry));

        // 3. Writer task owns the sender half until ended.
        let (end_tx, end_rx) = oneshot::channel();
        let writer_task = outbound::spawn_writer_task(sender, rx, pending, end_rx);

        let shared = Arc::new(Shared {
            registry,
            procedures: self.procedures,
            on_message: Mutex::new(self.on_message),
            on_fault: Mutex::new(self.on_fault),
            outbound,
            end_tx: Mutex::new(Some(end_tx)),
            _writer_task: writer_task,
        });

        // 4. Dispatch task owns the receiver half until the channel ends.
        let (closed_tx, closed_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&shared).run_dispatch(receiver, closed_tx));

        Endpoint { shared, closed_rx }
    }
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One side of a connected channel.
///
/// Cheaply cloneable; clones share the registry, the procedure table, and
/// the outbound queue. Dropping every clone does not close the channel,
/// the dispatch and writer tasks keep serving the peer until [`end`] is
/// called or the channel itself ends.
///
/// [`end`]: Endpoint::end
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
    closed_rx: watch::Receiver<bool>,
}

struct Shared {
    /// Callback and slot index space, one per endpoint.
    registry: Arc<Mutex<CallbackRegistry>>,
    /// Procedures the peer may invoke.
    procedures: ProcedureTable,
    /// Handler for USER envelopes.
    on_message: Mutex<Option<MessageHook>>,
    /// Hook for faults with nowhere else to go.
    on_fault: Mutex<Option<FaultHook>>,
    /// Queue into the writer task.
    outbound: OutboundHandle,
    /// Graceful close signal, consumed by the first `end` call.
    end_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Writer task handle.
    _writer_task: JoinHandle<()>,
}

impl Endpoint {
    /// Create a new endpoint builder.
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// Invoke a procedure on the peer.
    ///
    /// The call slot is registered before the arguments are marshaled, so
    /// its index precedes any callback indices minted for `args`. The
    /// completion handler runs on the dispatch task when the matching
    /// RETURN arrives, exactly once.
    pub fn invoke<F>(&self, procedure: &str, args: Vec<Arg>, on_complete: F) -> Result<()>
    where
        F: FnOnce(Option<StructuredError>, Arg) + Send + 'static,
    {
        let (slot, args) = {
            let mut registry = self.shared.registry.lock();
            let slot = registry.register_slot(Box::new(on_complete));
            (slot, marshal::marshal(&mut registry, args))
        };
        let envelope = Envelope::Run {
            procedure: procedure.to_string(),
            slot,
            args,
        };
        if let Err(e) = self.shared.outbound.send(envelope) {
            // Take the slot back; the handler is dropped without running.
            let _ = self.shared.registry.lock().resolve(slot);
            return Err(e);
        }
        Ok(())
    }

    /// Invoke a procedure without a completion handler of your own.
    ///
    /// The default handler discards the value and reports an error outcome
    /// as a fault: logged, and passed to the `on_fault` hook if installed.
    pub fn invoke_detached(&self, procedure: &str, args: Vec<Arg>) -> Result<()> {
        let shared = Arc::downgrade(&self.shared);
        self.invoke(procedure, args, move |error, _value| {
            if let Some(error) = error {
                let fault = CrosscallError::Remote(error);
                match shared.upgrade() {
                    Some(shared) => shared.report_fault(&fault),
                    None => tracing::error!("Detached invocation failed: {}", fault),
                }
            }
        })
    }

    /// Invoke a procedure and await its outcome.
    ///
    /// An error outcome arrives as [`CrosscallError::Remote`]. Must not be
    /// awaited from inside one of this endpoint's own procedures: dispatch
    /// is serialized, so the RETURN could never be delivered.
    pub async fn call(&self, procedure: &str, args: Vec<Arg>) -> Result<Arg> {
        let (tx, rx) = oneshot::channel();
        self.invoke(procedure, args, move |error, value| {
            let _ = tx.send(match error {
                Some(e) => Err(CrosscallError::Remote(e)),
                None => Ok(value),
            });
        })?;
        rx.await.map_err(|_| CrosscallError::ChannelClosed)?
    }

    /// Send a user message outside the procedure mechanism.
    pub fn send<T: Serialize>(&self, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.shared.outbound.send(Envelope::User { data })
    }

    /// Install or replace the handler for USER envelopes.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        *self.shared.on_message.lock() = Some(Arc::new(handler));
    }

    /// Install or replace the fault hook.
    pub fn on_fault<F>(&self, hook: F)
    where
        F: Fn(&CrosscallError) + Send + Sync + 'static,
    {
        *self.shared.on_fault.lock() = Some(Arc::new(hook));
    }

    /// Release a persistent callback's registry entry.
    ///
    /// Returns `false` if the callback was never registered here or was
    /// already released. Its index is retired either way, a later CALLBACK
    /// addressed to it faults instead of running a fresh registrant.
    pub fn release_callback(&self, callback: &Callback) -> bool {
        self.shared.registry.lock().release_callback(callback)
    }

    /// Close the outgoing direction.
    ///
    /// Envelopes already queued are still delivered, then the channel
    /// sender is closed. Later sends fail with
    /// [`CrosscallError::ChannelClosed`]. Idempotent.
    pub fn end(&self) {
        if let Some(end_tx) = self.shared.end_tx.lock().take() {
            let _ = end_tx.send(());
        }
    }

    /// Wait until the incoming direction has ended.
    ///
    /// Resolves once the dispatch task has stopped, whether the peer closed
    /// cleanly or the channel failed.
    pub async fn closed(&self) {
        let mut closed_rx = self.closed_rx.clone();
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }

    /// Number of envelopes queued but not yet written to the channel.
    pub fn pending_envelopes(&self) -> usize {
        self.shared.outbound.pending_count()
    }
}

impl Shared {
    /// Main dispatch loop. Envelopes are dispatched one at a time in
    /// arrival order; a RUN is not dispatched until the previous
    /// procedure's outcome has been queued.
    async fn run_dispatch<R: ChannelReceiver>(
        self: Arc<Self>,
        mut receiver: R,
        closed_tx: watch::Sender<bool>,
    ) {
        loop {
            match receiver.recv().await {
                Ok(Some(envelope)) => self.dispatch(envelope).await,
                Ok(None) => {
                    tracing::debug!("Channel closed by peer");
                    break;
                }
                Err(e) => {
                    // Ordering is broken once an envelope is lost, so any
                    // receive error ends dispatch.
                    self.report_fault(&e);
                    break;
                }
            }
        }
        let _ = closed_tx.send(true);
    }

    async fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::User { data } => self.dispatch_user(data),
            Envelope::Run {
                procedure,
                slot,
                args,
            } => self.dispatch_run(procedure, slot, args).await,
            Envelope::Callback { index, args } => self.dispatch_callback(index, args),
            Envelope::Return { slot, error, value } => self.dispatch_return(slot, error, value),
        }
    }

    fn dispatch_user(&self, data: Value) {
        let handler = self.on_message.lock().clone();
        match handler {
            Some(handler) => {
                let event = MessageEvent { data };
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                    let message = procedure::panic_message(payload.as_ref());
                    tracing::error!("Message handler panicked: {}", message);
                }
            }
            None => tracing::debug!("Dropping user message: no handler installed"),
        }
    }

    async fn dispatch_run(&self, procedure: String, slot: u32, args: Vec<TaggedValue>) {
        let args = marshal::unmarshal(&self.outbound, args);
        let outcome = self.procedures.run(&procedure, args).await;
        let (error, value) = {
            let mut registry = self.registry.lock();
            marshal::marshal_outcome(&mut registry, outcome)
        };
        if let Err(e) = self.outbound.send(Envelope::Return { slot, error, value }) {
            tracing::debug!("Dropping RETURN for slot {}: {}", slot, e);
        }
    }

    fn dispatch_callback(&self, index: u32, args: Vec<TaggedValue>) {
        // Bound first so the registry guard drops before any user code,
        // the fault hook included, can run.
        let looked_up = self.registry.lock().lookup(index);
        let callback = match looked_up {
            Ok(callback) => callback,
            Err(e) => {
                self.report_fault(&e);
                return;
            }
        };
        let args = marshal::unmarshal(&self.outbound, args);
        match catch_unwind(AssertUnwindSafe(|| callback.invoke(args))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report_fault(&e),
            Err(payload) => {
                let message = procedure::panic_message(payload.as_ref());
                tracing::error!("Callback {} panicked: {}", index, message);
            }
        }
    }

    fn dispatch_return(&self, slot: u32, error: TaggedValue, value: TaggedValue) {
        // Bound first so the registry guard drops before user code runs.
        let resolved = self.registry.lock().resolve(slot);
        let handler = match resolved {
            Ok(handler) => handler,
            Err(e) => {
                self.report_fault(&e);
                return;
            }
        };
        let error = marshal::unmarshal_error(error);
        let value = marshal::unmarshal_one(&self.outbound, value);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(move || handler(error, value))) {
            let message = procedure::panic_message(payload.as_ref());
            tracing::error!("Completion handler for slot {} panicked: {}", slot, message);
        }
    }

    fn report_fault(&self, error: &CrosscallError) {
        tracing::error!("Dispatch fault: {}", error);
        let hook = self.on_fault.lock().clone();
        if let Some(hook) = hook {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(error))) {
                let message = procedure::panic_message(payload.as_ref());
                tracing::error!("Fault hook panicked: {}", message);
            }
        }
    }
}
