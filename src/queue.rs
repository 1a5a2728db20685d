//! Outbound message queue
//!
//! Unbounded, ordered, thread-safe buffer between the producers and the
//! sender. Producers hold cloneable [`QueueSender`] handles and never block;
//! the sender task owns the single [`QueueReceiver`]. Re-enqueueing a failed
//! message goes through the same sender handle and lands at the tail, behind
//! any messages queued in the meantime.

use crate::protocol::OutboundMessage;
use tokio::sync::mpsc;

/// Cloneable enqueue handle
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

/// Single-consumer dequeue handle
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

/// Create the outbound queue pair
pub fn outbound_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}

impl QueueSender {
    /// Append a message at the tail. Never blocks.
    ///
    /// Fails only when the receiver side is gone, which means the sender task
    /// has shut down; at that point dropping the message is the intended
    /// behavior (no persistence across shutdown).
    pub fn enqueue(&self, message: OutboundMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl QueueReceiver {
    /// Wait for the next message in FIFO order.
    ///
    /// Returns `None` once every sender handle has been dropped and the
    /// queue is drained.
    pub async fn next(&mut self) -> Option<OutboundMessage> {
        self.rx.recv().await
    }
}
