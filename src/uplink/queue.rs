//! In-memory FIFO upload queue
//!
//! Many producers (the directory watcher, startup rescan), one consumer.
//! `join()` waits until every enqueued task has been marked done, which is
//! how shutdown drains the queue before sending the stop sentinel.

use crate::types::UploadTask;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Upload queue is closed")]
    Closed,
}

enum QueueItem {
    Task(UploadTask),
    /// Stop sentinel; the consumer exits when it dequeues this
    Stop,
}

#[derive(Default)]
struct Shared {
    pending: AtomicUsize,
    drained: Notify,
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct UploadQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    shared: Arc<Shared>,
}

/// Consumer handle. Exactly one exists per queue.
pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    shared: Arc<Shared>,
}

impl UploadQueue {
    pub fn new() -> (Self, QueueConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        (
            Self {
                tx,
                shared: Arc::clone(&shared),
            },
            QueueConsumer { rx, shared },
        )
    }

    /// Append a task. Never blocks.
    pub fn enqueue(&self, task: UploadTask) -> Result<(), QueueError> {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(QueueItem::Task(task)).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Tasks enqueued but not yet marked done.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued task has been marked done.
    pub async fn join(&self) {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Queue the stop sentinel behind everything already enqueued.
    pub fn stop(&self) -> Result<(), QueueError> {
        self.tx.send(QueueItem::Stop).map_err(|_| QueueError::Closed)
    }
}

impl QueueConsumer {
    /// Next task in FIFO order, or `None` once the stop sentinel (or the
    /// end of all producers) is reached.
    pub async fn next(&mut self) -> Option<UploadTask> {
        match self.rx.recv().await {
            Some(QueueItem::Task(task)) => Some(task),
            Some(QueueItem::Stop) | None => None,
        }
    }

    /// Mark one dequeued task as finished (delivered or abandoned).
    pub fn task_done(&self) {
        let prev = self
            .shared
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if prev <= 1 {
            self.shared.drained.notify_waiters();
        }
    }
}
