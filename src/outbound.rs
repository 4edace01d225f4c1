//! Outbound envelope queue and its dedicated writer task.
//!
//! Every envelope an endpoint produces funnels through one unbounded mpsc
//! queue into a single writer task that owns the channel sender. Endpoint
//! handles and remote callback stubs each hold an [`OutboundHandle`], so a
//! stub invoked from any thread lands in the same ordered queue as the
//! endpoint's own traffic and the channel sees one writer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::ChannelSender;
use crate::error::{CrosscallError, Result};
use crate::marshal;
use crate::protocol::Envelope;
use crate::registry::CallbackRegistry;
use crate::value::Arg;

/// Handle for queueing envelopes onto the writer task.
///
/// Cheaply cloneable. Holds only a weak reference to the callback registry,
/// so stubs captured by application code never keep a closed endpoint alive.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    pending: Arc<AtomicUsize>,
    registry: Weak<Mutex<CallbackRegistry>>,
}

impl OutboundHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Envelope>,
        pending: Arc<AtomicUsize>,
        registry: Weak<Mutex<CallbackRegistry>>,
    ) -> Self {
        Self {
            tx,
            pending,
            registry,
        }
    }

    /// Queue one envelope for the writer task.
    ///
    /// Fails with [`CrosscallError::ChannelClosed`] once the endpoint has
    /// ended or the writer task has stopped.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        // Increment before handing off so the count never reads low.
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(envelope).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            CrosscallError::ChannelClosed
        })
    }

    /// Marshal `args` and queue a CALLBACK envelope addressed to `index`.
    ///
    /// This is the path remote callback stubs take when invoked.
    pub(crate) fn send_callback(&self, index: u32, args: Vec<Arg>) -> Result<()> {
        let registry = self
            .registry
            .upgrade()
            .ok_or(CrosscallError::ChannelClosed)?;
        let args = {
            let mut registry = registry.lock();
            marshal::marshal(&mut registry, args)
        };
        self.send(Envelope::Callback { index, args })
    }

    /// Number of envelopes queued but not yet written to the channel.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task.
///
/// The task forwards queued envelopes to the channel sender until either the
/// queue closes (every handle dropped) or the `end` signal fires. Both exits
/// drain envelopes that were queued first, then close the sender half so the
/// peer's receiver observes an orderly end.
pub(crate) fn spawn_writer_task<S>(
    mut sender: S,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    pending: Arc<AtomicUsize>,
    mut end_rx: oneshot::Receiver<()>,
) -> JoinHandle<()>
where
    S: ChannelSender,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                envelope = rx.recv() => match envelope {
                    Some(envelope) => {
                        let outcome = sender.send(envelope).await;
                        pending.fetch_sub(1, Ordering::Release);
                        if let Err(e) = outcome {
                            tracing::error!("Writer task stopping, channel send failed: {}", e);
                            return;
                        }
                    }
                    None => break,
                },
                _ = &mut end_rx => break,
            }
        }

        // Refuse new sends, flush what was already queued, then close.
        rx.close();
        while let Some(envelope) = rx.recv().await {
            let outcome = sender.send(envelope).await;
            pending.fetch_sub(1, Ordering::Release);
            if let Err(e) = outcome {
                tracing::error!("Writer task stopping, drain send failed: {}", e);
                return;
            }
        }
        if let Err(e) = sender.close().await {
            tracing::debug!("Channel close reported an error: {}", e);
        }
    })
}
