//! How layers plug together.
//!
//! A stack is wired once at startup from owned parts. The downstream
//! direction is plain ownership: the outer layer holds the inner one and
//! calls [`Sink::indication`] on it. The upstream direction is a bounded
//! channel: [`bind`] produces an [`Upstream`] sender that is handed to the
//! inner layer at construction and a [`Confirmations`] receiver the outer
//! layer drains from its own task. Per binding, PDUs arrive in the order
//! they were sent; backpressure comes from the channel capacity.

use bacstack_core::Pdu;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by link layers.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid frame")]
    InvalidFrame,
    #[error("frame too large")]
    FrameTooLarge,
    #[error("unsupported BVLC function 0x{0:02x}")]
    UnsupportedBvlcFunction(u8),
    #[error("BVLC result code 0x{0:04x}")]
    BvlcResult(u16),
    #[error("bbmd not configured")]
    BbmdNotConfigured,
    #[error("no broadcast address on this interface")]
    NoBroadcast,
    #[error("not registered with the bbmd")]
    NotRegistered,
    #[error("destination not valid for this link")]
    InvalidDestination,
    #[error("link closed")]
    Closed,
    #[error("timed out waiting for a reply")]
    Timeout,
}

/// Accepts traffic moving down the stack, toward the wire.
pub trait Sink {
    async fn indication(&self, pdu: Pdu) -> Result<(), LinkError>;
}

/// Accepts traffic moving up the stack, toward the application.
pub trait Source {
    async fn confirmation(&self, pdu: Pdu) -> Result<(), LinkError>;
}

/// The sending half of a binding, held by the inner layer.
///
/// Cloneable so a layer can feed the same outer layer from several tasks.
#[derive(Debug, Clone)]
pub struct Upstream {
    tx: mpsc::Sender<Pdu>,
}

/// The receiving half of a binding, drained by the outer layer.
#[derive(Debug)]
pub struct Confirmations {
    rx: mpsc::Receiver<Pdu>,
}

/// Creates the upstream half of a binding with the given channel capacity.
pub fn bind(capacity: usize) -> (Upstream, Confirmations) {
    let (tx, rx) = mpsc::channel(capacity);
    (Upstream { tx }, Confirmations { rx })
}

impl Source for Upstream {
    async fn confirmation(&self, pdu: Pdu) -> Result<(), LinkError> {
        self.tx.send(pdu).await.map_err(|_| LinkError::Closed)
    }
}

impl Confirmations {
    /// The next upstream PDU, or `None` once every [`Upstream`] clone has
    /// been dropped.
    pub async fn recv(&mut self) -> Option<Pdu> {
        self.rx.recv().await
    }

    /// A PDU that is already waiting, without blocking. `None` when the
    /// channel is empty or every sender has been dropped.
    pub fn try_recv(&mut self) -> Option<Pdu> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::{bind, LinkError, Source};
    use bacstack_core::{Address, Pdu};

    #[tokio::test]
    async fn binding_preserves_order() {
        let (up, mut confirmations) = bind(4);
        for i in 0..4u8 {
            up.confirmation(Pdu::new([i], Address::local_broadcast()))
                .await
                .unwrap();
        }
        for i in 0..4u8 {
            let pdu = confirmations.recv().await.unwrap();
            assert_eq!(pdu.data, [i]);
        }
    }

    #[tokio::test]
    async fn send_after_receiver_drop_is_closed() {
        let (up, confirmations) = bind(1);
        drop(confirmations);
        let err = up
            .confirmation(Pdu::new([0], Address::local_broadcast()))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Closed));
    }

    #[tokio::test]
    async fn recv_none_after_all_senders_drop() {
        let (up, mut confirmations) = bind(1);
        let up2 = up.clone();
        up2.confirmation(Pdu::new([7], Address::local_broadcast()))
            .await
            .unwrap();
        drop(up);
        drop(up2);
        assert_eq!(confirmations.recv().await.unwrap().data, [7]);
        assert!(confirmations.recv().await.is_none());
    }

    #[tokio::test]
    async fn try_recv_is_non_blocking() {
        let (up, mut confirmations) = bind(2);
        assert!(confirmations.try_recv().is_none());
        up.confirmation(Pdu::new([3], Address::local_broadcast()))
            .await
            .unwrap();
        assert_eq!(confirmations.try_recv().unwrap().data, [3]);
        assert!(confirmations.try_recv().is_none());
    }
}
