//! Channel adapter contract and the in-memory reference adapter.
//!
//! The physical channel is an external collaborator: anything that delivers
//! [`Envelope`] values in order, at most once each, in both directions. An
//! endpoint splits an adapter into its two halves and runs its writer task
//! on the sender and its dispatch loop on the receiver.
//!
//! Delivery failures belong to the adapter; they surface as
//! [`CrosscallError::Transport`] or [`CrosscallError::ChannelClosed`] from
//! `send`/`recv`, as do decode failures in adapters that carry the envelopes
//! over a byte stream.
//!
//! [`pair`] connects two endpoints in one process without any encoding and
//! is what the test suite and the demos run on.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CrosscallError, Result};
use crate::protocol::Envelope;

/// Default capacity for one direction of an in-memory pair.
pub const DEFAULT_PAIR_CAPACITY: usize = 64;

/// Sending half of a channel adapter.
#[async_trait]
pub trait ChannelSender: Send + 'static {
    /// Deliver one envelope to the peer, preserving send order.
    async fn send(&mut self, envelope: Envelope) -> Result<()>;

    /// Close this direction so the peer's `recv` observes an orderly end.
    async fn close(&mut self) -> Result<()>;
}

/// Receiving half of a channel adapter.
#[async_trait]
pub trait ChannelReceiver: Send + 'static {
    /// Receive the next envelope. `None` means the peer closed cleanly.
    async fn recv(&mut self) -> Result<Option<Envelope>>;
}

/// A connectable channel, split into its two halves by the endpoint.
pub trait ChannelAdapter: Send + 'static {
    type Sender: ChannelSender;
    type Receiver: ChannelReceiver;

    fn into_split(self) -> (Self::Sender, Self::Receiver);
}

/// Create a connected in-memory adapter pair.
///
/// Each direction is a bounded queue of `capacity` envelopes; a full peer
/// inbox makes the writer task wait, it never blocks dispatch.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn pair(capacity: usize) -> (MemoryChannel, MemoryChannel) {
    let (left_tx, right_rx) = mpsc::channel(capacity);
    let (right_tx, left_rx) = mpsc::channel(capacity);
    (
        MemoryChannel {
            tx: left_tx,
            rx: left_rx,
        },
        MemoryChannel {
            tx: right_tx,
            rx: right_rx,
        },
    )
}

/// One side of an in-memory pair.
pub struct MemoryChannel {
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
}

impl ChannelAdapter for MemoryChannel {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    fn into_split(self) -> (MemorySender, MemoryReceiver) {
        (MemorySender { tx: Some(self.tx) }, MemoryReceiver { rx: self.rx })
    }
}

/// Sending half of a [`MemoryChannel`].
pub struct MemorySender {
    tx: Option<mpsc::Sender<Envelope>>,
}

#[async_trait]
impl ChannelSender for MemorySender {
    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(CrosscallError::ChannelClosed)?;
        tx.send(envelope)
            .await
            .map_err(|_| CrosscallError::ChannelClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Receiving half of a [`MemoryChannel`].
pub struct MemoryReceiver {
    rx: mpsc::Receiver<Envelope>,
}

#[async_trait]
impl ChannelReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Result<Option<Envelope>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(n: i64) -> Envelope {
        Envelope::User { data: json!(n) }
    }

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (left, right) = pair(8);
        let (mut tx, _) = left.into_split();
        let (_, mut rx) = right.into_split();

        tx.send(user(1)).await.unwrap();
        tx.send(user(2)).await.unwrap();
        tx.send(user(3)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Some(user(1)));
        assert_eq!(rx.recv().await.unwrap(), Some(user(2)));
        assert_eq!(rx.recv().await.unwrap(), Some(user(3)));
    }

    #[tokio::test]
    async fn test_directions_are_independent() {
        let (left, right) = pair(8);
        let (mut left_tx, mut left_rx) = left.into_split();
        let (mut right_tx, mut right_rx) = right.into_split();

        left_tx.send(user(1)).await.unwrap();
        right_tx.send(user(2)).await.unwrap();

        assert_eq!(right_rx.recv().await.unwrap(), Some(user(1)));
        assert_eq!(left_rx.recv().await.unwrap(), Some(user(2)));
    }

    #[tokio::test]
    async fn test_close_ends_the_peer_receiver() {
        let (left, right) = pair(8);
        let (mut tx, _) = left.into_split();
        let (_, mut rx) = right.into_split();

        tx.send(user(1)).await.unwrap();
        tx.close().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Some(user(1)));
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (left, _right) = pair(8);
        let (mut tx, _) = left.into_split();

        tx.close().await.unwrap();
        let err = tx.send(user(1)).await.unwrap_err();
        assert!(matches!(err, CrosscallError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_dropped_peer_fails_send() {
        let (left, right) = pair(1);
        let (mut tx, _) = left.into_split();
        drop(right);

        let err = tx.send(user(1)).await.unwrap_err();
        assert!(matches!(err, CrosscallError::ChannelClosed));
    }
}
