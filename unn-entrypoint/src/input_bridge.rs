//! Dual-consumer stdin, modeled as an `InputBridge` (§5, §9).
//!
//! Exactly one reader ever touches a Person's incoming byte stream: this
//! bridge. It republishes every byte onto a channel whose receiving end
//! can be swapped out from under a short-held mutex, so ownership can
//! move between "the onboarding form", "the room browser", and (when we
//! hand a PTY off to a door/child process, out of scope here) whatever
//! else wants exclusive stdin — without ever juggling raw reads in more
//! than one place. Swapping flushes nothing: the new consumer simply
//! starts receiving from whatever arrives after the swap, and the old
//! receiver is dropped, so anything buffered in it is discarded rather
//! than delivered to the wrong state.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub struct InputBridge {
    current: Arc<Mutex<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl InputBridge {
    /// Spawn the bridge's sole reader loop. `feed` is called once per
    /// chunk of bytes arriving off the wire; the returned `InputBridge`
    /// is used by consumers to install themselves as the active
    /// receiver via `switch_consumer`.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { current: Arc::new(Mutex::new(tx)) }, rx)
    }

    /// Push a chunk of bytes read off the wire to whichever consumer is
    /// currently active.
    pub async fn publish(&self, bytes: Vec<u8>) {
        let tx = self.current.lock().await;
        let _ = tx.send(bytes);
    }

    /// Install a new active consumer, returning its receiver. The
    /// previous consumer's receiver (if any task is still holding it)
    /// simply stops receiving; this is a clean hand-off, not a
    /// broadcast — only one consumer is ever active (§5).
    pub async fn switch_consumer(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.current.lock().await = tx;
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_initial_receiver() {
        let (bridge, mut rx) = InputBridge::new();
        bridge.publish(b"hello".to_vec()).await;
        assert_eq!(rx.recv().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn switching_consumer_stops_delivery_to_the_old_receiver() {
        let (bridge, mut rx1) = InputBridge::new();
        let mut rx2 = bridge.switch_consumer().await;
        bridge.publish(b"after-switch".to_vec()).await;
        assert_eq!(rx2.recv().await.unwrap(), b"after-switch".to_vec());
        // The old receiver's sender was replaced, not kept alive, so it
        // observes a closed channel rather than the new bytes.
        assert!(rx1.recv().await.is_none());
    }
}
