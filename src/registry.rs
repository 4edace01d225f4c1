//! Callback registry - call slots and persistent callback references.
//!
//! One table per endpoint holds both entry flavors in a single index space,
//! exactly as the indices appear on the wire:
//! - persistent callbacks, registered while marshaling callback arguments,
//!   invokable any number of times by CALLBACK envelopes;
//! - one-shot call slots, registered by `invoke`, resolved exactly once by
//!   the matching RETURN.
//!
//! Persistent entries are deduplicated through an explicit map from callable
//! identity to index, so the same callback marshals to the same index within
//! and across invocations. Indices are assigned from a monotonically
//! increasing counter and never reused, even after release.

use std::collections::HashMap;

use crate::callback::Callback;
use crate::error::{CrosscallError, Result};
use crate::value::{Arg, StructuredError};

/// Completion handler for one invocation, called with the RETURN's
/// `(error, value)` outcome.
pub type CompletionHandler = Box<dyn FnOnce(Option<StructuredError>, Arg) + Send>;

enum Entry {
    /// Durable callable.
    Callback(Callback),
    /// Pending call slot.
    Slot(CompletionHandler),
}

/// Registry mapping wire indices to local callables.
pub struct CallbackRegistry {
    /// Live entries by index.
    entries: HashMap<u32, Entry>,
    /// Callable identity -> index, persistent entries only.
    identity_index: HashMap<usize, u32>,
    /// Next index to assign. Wider than the wire's `u32` so exhaustion is
    /// detected instead of wrapping onto live indices.
    next_index: u64,
}

impl CallbackRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            identity_index: HashMap::new(),
            next_index: 0,
        }
    }

    /// Register a persistent callback, reusing the existing index if this
    /// callable (by identity) is already registered.
    ///
    /// # Panics
    ///
    /// Panics once all `u32` indices have been handed out.
    pub fn register(&mut self, callback: &Callback) -> u32 {
        let identity = callback.identity();
        if let Some(&index) = self.identity_index.get(&identity) {
            return index;
        }

        let index = self.allocate();
        self.entries.insert(index, Entry::Callback(callback.clone()));
        self.identity_index.insert(identity, index);
        index
    }

    /// Register a one-shot call slot. Slots are never deduplicated; every
    /// invocation gets a fresh index.
    ///
    /// # Panics
    ///
    /// Panics once all `u32` indices have been handed out.
    pub fn register_slot(&mut self, handler: CompletionHandler) -> u32 {
        let index = self.allocate();
        self.entries.insert(index, Entry::Slot(handler));
        index
    }

    /// Consume the slot at `index`, returning its completion handler.
    ///
    /// # Errors
    ///
    /// `SlotResolution` if the index is unknown (never registered, already
    /// resolved, or released) or refers to a persistent callback.
    pub fn resolve(&mut self, index: u32) -> Result<CompletionHandler> {
        match self.entries.remove(&index) {
            Some(Entry::Slot(handler)) => Ok(handler),
            Some(entry @ Entry::Callback(_)) => {
                self.entries.insert(index, entry);
                Err(CrosscallError::SlotResolution(format!(
                    "index {index} is a persistent callback, not a pending call slot"
                )))
            }
            None => Err(CrosscallError::SlotResolution(format!(
                "slot {index} is unknown or already resolved"
            ))),
        }
    }

    /// Look up the persistent callback at `index` without consuming it.
    ///
    /// # Errors
    ///
    /// `SlotResolution` if the index is unknown or refers to a pending call
    /// slot (slots are resolvable exactly once, and only by RETURN).
    pub fn lookup(&self, index: u32) -> Result<Callback> {
        match self.entries.get(&index) {
            Some(Entry::Callback(callback)) => Ok(callback.clone()),
            Some(Entry::Slot(_)) => Err(CrosscallError::SlotResolution(format!(
                "index {index} is a pending call slot, not a callback"
            ))),
            None => Err(CrosscallError::SlotResolution(format!(
                "unknown callback index {index}"
            ))),
        }
    }

    /// Release the persistent callback at `index`. Returns `false` for
    /// unknown indices and for pending slots (slots are released by their
    /// RETURN). The index is retired, not recycled.
    pub fn release(&mut self, index: u32) -> bool {
        match self.entries.get(&index) {
            Some(Entry::Callback(callback)) => {
                let identity = callback.identity();
                self.entries.remove(&index);
                self.identity_index.remove(&identity);
                true
            }
            _ => false,
        }
    }

    /// Release a persistent callback by identity.
    pub fn release_callback(&mut self, callback: &Callback) -> bool {
        match self.identity_index.get(&callback.identity()) {
            Some(&index) => self.release(index),
            None => false,
        }
    }

    /// Check if an index is live (either flavor).
    pub fn contains(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn allocate(&mut self) -> u32 {
        if self.next_index > u64::from(u32::MAX) {
            panic!("callback registry index space exhausted");
        }
        let index = self.next_index as u32;
        self.next_index += 1;
        index
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
