//! In-process channel pair.
//!
//! Both ends live in the same process and exchange messages over bounded
//! tokio mpsc queues. Closing either sink, or dropping it, ends the peer's
//! stream.

use super::{Channel, MessageSink, MessageStream, TransportError};
use tokio::sync::mpsc;

struct MemorySink {
    tx: Option<mpsc::Sender<Vec<u8>>>,
}

struct MemoryStream {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait::async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageStream for MemoryStream {
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Create two connected channels, each queueing up to `capacity` messages.
pub fn pair(capacity: usize) -> (Channel, Channel) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    let a = Channel::new(
        Box::new(MemorySink { tx: Some(a_tx) }),
        Box::new(MemoryStream { rx: b_rx }),
    );
    let b = Channel::new(
        Box::new(MemorySink { tx: Some(b_tx) }),
        Box::new(MemoryStream { rx: a_rx }),
    );
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, b) = pair(4);
        let (mut a_tx, _a_rx) = a.into_split();
        let (_b_tx, mut b_rx) = b.into_split();

        a_tx.send(vec![1]).await.unwrap();
        a_tx.send(vec![2, 3]).await.unwrap();
        assert_eq!(b_rx.recv().await.unwrap().unwrap(), vec![1]);
        assert_eq!(b_rx.recv().await.unwrap().unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (a, b) = pair(4);
        let (mut a_tx, _a_rx) = a.into_split();
        let (_b_tx, mut b_rx) = b.into_split();

        a_tx.close().await.unwrap();
        assert!(b_rx.recv().await.is_none());
        assert!(matches!(
            a_tx.send(vec![1]).await,
            Err(TransportError::Closed)
        ));
    }
}
