//! Procedure source and runner.
//!
//! Procedures are invoked by name: the wire carries a stable string key,
//! never code. The table maps keys to handlers; the runner executes one
//! inline with dispatch and captures either a value or an error. A failure
//! (including a panic) never unwinds into the dispatch loop; it ships back
//! in the RETURN's error position.
//!
//! # Example
//!
//! ```
//! use crosscall::procedure::ProcedureTable;
//! use crosscall::Arg;
//!
//! let mut table = ProcedureTable::new();
//! table.register("add", |args: Vec<Arg>| async move {
//!     let a: i64 = args[0].deserialize()?;
//!     let b: i64 = args[1].deserialize()?;
//!     Ok(Arg::value(a + b)?)
//! });
//! assert!(table.contains("add"));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;

use crate::value::{Arg, StructuredError};

/// Outcome of one procedure execution.
pub type ProcedureResult = Result<Arg, StructuredError>;

/// Boxed future for procedure outcomes.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for procedures invokable from the other side.
pub trait Procedure: Send + Sync + 'static {
    /// Execute with the unmarshaled arguments.
    fn call(&self, args: Vec<Arg>) -> BoxFuture<'static, ProcedureResult>;
}

/// Adapter implementing [`Procedure`] for async closures.
struct FnProcedure<F> {
    f: F,
}

impl<F, Fut> Procedure for FnProcedure<F>
where
    F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcedureResult> + Send + 'static,
{
    fn call(&self, args: Vec<Arg>) -> BoxFuture<'static, ProcedureResult> {
        Box::pin((self.f)(args))
    }
}

/// Registry mapping procedure names to handlers.
pub struct ProcedureTable {
    procedures: HashMap<String, Arc<dyn Procedure>>,
}

impl ProcedureTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            procedures: HashMap::new(),
        }
    }

    /// Register an async closure under `name`, replacing any existing
    /// registration with the same name.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, procedure: F)
    where
        F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        self.register_procedure(name, Arc::new(FnProcedure { f: procedure }));
    }

    /// Register a trait-object procedure under `name`.
    pub fn register_procedure(&mut self, name: impl Into<String>, procedure: Arc<dyn Procedure>) {
        self.procedures.insert(name.into(), procedure);
    }

    /// Get the procedure registered under `name`.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Procedure>> {
        self.procedures.get(name).cloned()
    }

    /// Check if a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    /// Registered names, sorted for stable logging.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.procedures.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Execute the named procedure, capturing the outcome.
    ///
    /// An unknown name produces an error outcome like any other failure, so
    /// the caller learns about it through the normal RETURN path. Panics are
    /// caught and converted to a structured error.
    pub async fn run(&self, name: &str, args: Vec<Arg>) -> ProcedureResult {
        let Some(procedure) = self.resolve(name) else {
            return Err(StructuredError::new(format!("unknown procedure: {name}")));
        };

        match AssertUnwindSafe(procedure.call(args)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Procedure '{}' panicked: {}", name, message);
                Err(StructuredError::new(format!(
                    "procedure '{name}' panicked: {message}"
                )))
            }
        }
    }
}

impl Default for ProcedureTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
