//! Callables that cross the endpoint boundary.
//!
//! A [`Callback`] is either a local closure supplied by the application or a
//! remote stub produced by unmarshaling a callback reference. Invoking a
//! local callback runs the closure; invoking a stub marshals the arguments
//! and enqueues a CALLBACK envelope for the owning side. There is no return
//! path across the boundary in either case.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::outbound::OutboundHandle;
use crate::value::Arg;

/// A callable argument. Cheap to clone; clones share identity, so passing
/// the same callback twice marshals to the same registry index.
///
/// # Example
///
/// ```
/// use crosscall::{Arg, Callback};
///
/// let progress = Callback::new(|args: Vec<Arg>| {
///     println!("progress: {:?}", args);
/// });
/// progress.invoke(vec![]).unwrap();
/// ```
#[derive(Clone)]
pub struct Callback {
    inner: Arc<Inner>,
}

enum Inner {
    Local(Box<dyn Fn(Vec<Arg>) + Send + Sync>),
    Remote { index: u32, outbound: OutboundHandle },
}

impl Callback {
    /// Wraps a local closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Arg>) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner::Local(Box::new(f))),
        }
    }

    /// Builds a stub for a callback living on the other side of `outbound`.
    pub(crate) fn remote(index: u32, outbound: OutboundHandle) -> Self {
        Self {
            inner: Arc::new(Inner::Remote { index, outbound }),
        }
    }

    /// Invokes the callable, fire-and-forget.
    ///
    /// # Errors
    ///
    /// A stub returns [`CrosscallError::ChannelClosed`](crate::CrosscallError::ChannelClosed)
    /// when the endpoint it belongs to is gone. Local callbacks cannot fail.
    pub fn invoke(&self, args: Vec<Arg>) -> Result<()> {
        match &*self.inner {
            Inner::Local(f) => {
                f(args);
                Ok(())
            }
            Inner::Remote { index, outbound } => outbound.send_callback(*index, args),
        }
    }

    /// Check if this is a stub for a remote callable.
    #[inline]
    pub fn is_remote(&self) -> bool {
        matches!(&*self.inner, Inner::Remote { .. })
    }

    /// The remote registry index, for stubs.
    #[inline]
    pub fn remote_index(&self) -> Option<u32> {
        match &*self.inner {
            Inner::Remote { index, .. } => Some(*index),
            Inner::Local(_) => None,
        }
    }

    /// Stable identity used for marshal-time deduplication.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            Inner::Local(_) => f.debug_struct("Callback").field("kind", &"local").finish(),
            Inner::Remote { index, .. } => f
                .debug_struct("Callback")
                .field("kind", &"remote")
                .field("index", index)
                .finish(),
        }
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
