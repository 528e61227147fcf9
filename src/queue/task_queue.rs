use std::fmt;
use std::sync::Arc;

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, watch};

use crate::error::QueueError;

/// One shell command to run on whichever host picks it up
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Task(Arc<str>);

impl Task {
    pub fn new(command: impl Into<Arc<str>>) -> Self {
        Self(command.into())
    }

    /// Get the command string
    pub fn command(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Task {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

impl From<String> for Task {
    fn from(command: String) -> Self {
        Self::new(command)
    }
}

/// A queued task and the admission slot it occupies, if any
struct Entry {
    task: Task,
    _admission: Option<OwnedSemaphorePermit>,
}

/// Bounded FIFO of tasks shared by the producer and every host worker.
///
/// Next to the items it tracks the number of issued but unfinalized attempts.
/// Every successful `dequeue` must be paired with exactly one `mark_done`,
/// whatever the outcome of the attempt; a requeue is a fresh attempt.
///
/// Only the producer side is bounded. Workers put failed tasks back with
/// `requeue`, which never waits, so a full queue cannot stall every worker
/// at once.
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Entry>,
    receiver: Mutex<mpsc::UnboundedReceiver<Entry>>,
    admission: Arc<Semaphore>,
    capacity: usize,
    waiting: AtomicUsize,
    pending: watch::Sender<usize>,
}

impl TaskQueue {
    /// Create a queue admitting at most `capacity` waiting tasks (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            admission: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: AtomicUsize::new(0),
            pending,
        }
    }

    /// Add a task, waiting for a free slot while the queue is full.
    ///
    /// The pending counter is raised before the task becomes visible to
    /// consumers. Dropping the future while it waits for a slot leaves both
    /// the queue and the counter untouched.
    pub async fn enqueue(&self, task: impl Into<Task>) -> Result<(), QueueError> {
        let permit = Arc::clone(&self.admission)
            .acquire_owned()
            .await
            .map_err(|_| QueueError::Closed)?;
        self.push(task.into(), Some(permit))
    }

    /// Put a task back for another attempt without waiting for a slot
    pub fn requeue(&self, task: Task) -> Result<(), QueueError> {
        self.push(task, None)
    }

    fn push(&self, task: Task, admission: Option<OwnedSemaphorePermit>) -> Result<(), QueueError> {
        self.pending.send_modify(|n| *n += 1);
        self.waiting.fetch_add(1, Ordering::AcqRel);
        let entry = Entry {
            task,
            _admission: admission,
        };
        if self.sender.send(entry).is_err() {
            self.waiting.fetch_sub(1, Ordering::AcqRel);
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Take the oldest task, waiting while the queue is empty.
    ///
    /// Cancel safe: a dropped call never loses a task. Returns `None` only if
    /// the channel is gone, which cannot happen while `self` is alive.
    pub async fn dequeue(&self) -> Option<Task> {
        let entry = self.receiver.lock().await.recv().await?;
        self.waiting.fetch_sub(1, Ordering::AcqRel);
        Some(entry.task)
    }

    /// Finalize one dequeued attempt
    pub fn mark_done(&self) -> Result<(), QueueError> {
        let mut underflow = false;
        self.pending.send_if_modified(|n| match n.checked_sub(1) {
            Some(left) => {
                *n = left;
                true
            }
            None => {
                underflow = true;
                false
            }
        });
        if underflow {
            Err(QueueError::AccountingFault)
        } else {
            Ok(())
        }
    }

    /// Wait until every issued attempt, requeues included, has been finalized
    pub async fn wait_idle(&self) {
        let mut pending = self.pending.subscribe();
        // The sender lives in `self`, so the watch cannot close under us
        let _ = pending.wait_for(|n| *n == 0).await;
    }

    /// Number of issued but unfinalized attempts
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Number of tasks waiting in the queue
    pub fn len(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting tasks admitted through `enqueue`
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
