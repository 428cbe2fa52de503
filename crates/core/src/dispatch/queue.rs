//! Dispatch queue trait and in-memory implementation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::types::{DispatchError, DispatchMessage};

/// At-least-once delivery of stage dispatches.
///
/// Consumers must tolerate duplicates and reordering; the orchestrator
/// discards stale or redundant results on apply.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Enqueue `message`, making it visible to consumers after `delay`.
    async fn enqueue(&self, message: DispatchMessage, delay: Duration) -> Result<(), DispatchError>;

    /// Wait for the next message. Returns `None` once the queue is closed
    /// and drained.
    async fn receive(&self) -> Option<DispatchMessage>;

    /// Take the next visible message without waiting.
    fn try_receive(&self) -> Option<DispatchMessage>;

    /// Messages enqueued but not yet received (includes delayed ones).
    fn pending(&self) -> usize;

    /// Stop accepting messages.
    fn close(&self);
}

/// In-process queue backed by an unbounded tokio channel.
///
/// Delayed messages are held by a sleeping task until they become visible.
#[derive(Clone)]
pub struct InMemoryDispatchQueue {
    sender: mpsc::UnboundedSender<DispatchMessage>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<DispatchMessage>>>,
    pending: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    history: Arc<Mutex<Vec<DispatchMessage>>>,
}

impl Default for InMemoryDispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDispatchQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every message ever enqueued, in enqueue order.
    pub fn history(&self) -> Vec<DispatchMessage> {
        self.history.lock().unwrap().clone()
    }

    /// Messages ever enqueued for one task.
    pub fn history_for(&self, task_id: &str) -> Vec<DispatchMessage> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Re-deliver an already received message (simulates at-least-once
    /// redelivery).
    pub fn redeliver(&self, message: DispatchMessage) -> Result<(), DispatchError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.sender.send(message).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            DispatchError::Closed
        })
    }

    fn taken(&self, message: Option<DispatchMessage>) -> Option<DispatchMessage> {
        if message.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        message
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn enqueue(&self, message: DispatchMessage, delay: Duration) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Closed);
        }

        debug!(
            task_id = %message.task_id,
            unit = %message.unit_label(),
            delay_ms = delay.as_millis() as u64,
            "Enqueue dispatch"
        );
        self.history.lock().unwrap().push(message.clone());
        self.pending.fetch_add(1, Ordering::SeqCst);

        if delay.is_zero() {
            return self.sender.send(message).map_err(|_| {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                DispatchError::Closed
            });
        }

        let sender = self.sender.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(message).is_err() {
                pending.fetch_sub(1, Ordering::SeqCst);
            }
        });
        Ok(())
    }

    async fn receive(&self) -> Option<DispatchMessage> {
        let message = self.receiver.lock().await.recv().await;
        self.taken(message)
    }

    fn try_receive(&self) -> Option<DispatchMessage> {
        let message = match self.receiver.try_lock() {
            Ok(mut receiver) => receiver.try_recv().ok(),
            Err(_) => None,
        };
        self.taken(message)
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Stage;
    use chrono::Utc;

    fn message(task_id: &str) -> DispatchMessage {
        DispatchMessage::new(task_id, 2, Stage::Outline, None, 1, Utc::now())
    }

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let queue = InMemoryDispatchQueue::new();
        queue.enqueue(message("a"), Duration::ZERO).await.unwrap();
        queue.enqueue(message("b"), Duration::ZERO).await.unwrap();
        assert_eq!(queue.pending(), 2);

        assert_eq!(queue.receive().await.unwrap().task_id, "a");
        assert_eq!(queue.try_receive().unwrap().task_id, "b");
        assert_eq!(queue.pending(), 0);
        assert!(queue.try_receive().is_none());
    }

    #[tokio::test]
    async fn test_delayed_message_not_visible_early() {
        let queue = InMemoryDispatchQueue::new();
        queue
            .enqueue(message("late"), Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(queue.pending(), 1);
        assert!(queue.try_receive().is_none());

        let received = queue.receive().await.unwrap();
        assert_eq!(received.task_id, "late");
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = InMemoryDispatchQueue::new();
        queue.close();
        let err = queue.enqueue(message("a"), Duration::ZERO).await.unwrap_err();
        assert_eq!(err, DispatchError::Closed);
        assert!(queue.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_and_redelivery() {
        let queue = InMemoryDispatchQueue::new();
        queue.enqueue(message("a"), Duration::ZERO).await.unwrap();
        queue.enqueue(message("b"), Duration::ZERO).await.unwrap();

        let first = queue.receive().await.unwrap();
        queue.redeliver(first.clone()).unwrap();

        assert_eq!(queue.history_for("a").len(), 1);
        assert_eq!(queue.history().len(), 2);
        assert_eq!(queue.receive().await.unwrap().task_id, "b");
        assert_eq!(queue.receive().await.unwrap().id, first.id);
    }
}
