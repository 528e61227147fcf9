use std::sync::Arc;

use tracing::info;

use crate::buffer::OutputKind;
use crate::config::{Host, PoolConfig, QUEUE_SLOTS_PER_HOST};
use crate::error::QueueError;
use crate::queue::{Task, TaskQueue};
use crate::session::Connector;
use crate::tui::{Dashboard, TabHandle};
use crate::worker::WorkerPool;

/// Application state: the task queue, the workers draining it and the
/// dashboard showing their output
pub struct App {
    queue: Arc<TaskQueue>,
    pool: WorkerPool,
    dashboard: Dashboard,
    /// Aggregate tab shared by every host
    main_tab: TabHandle,
}

impl App {
    /// Create one worker per host and start them.
    ///
    /// Host tabs are added to the dashboard after `main_tab`, in the order
    /// the hosts are given.
    pub fn start(
        hosts: Vec<Host>,
        connector: Arc<dyn Connector>,
        dashboard: Dashboard,
        main_tab: TabHandle,
        config: PoolConfig,
    ) -> Self {
        let queue = Arc::new(TaskQueue::new(hosts.len() * QUEUE_SLOTS_PER_HOST));
        let pool = WorkerPool::new(
            hosts,
            Arc::clone(&queue),
            connector,
            dashboard.clone(),
            config,
        );
        pool.start();
        Self {
            queue,
            pool,
            dashboard,
            main_tab,
        }
    }

    /// Queue a command, waiting while the queue is full.
    ///
    /// Fails once the workers are gone, since nothing would ever make room.
    pub async fn enqueue(&self, task: impl Into<Task>) -> Result<(), QueueError> {
        let stopped = self.pool.cancellation_token();
        tokio::select! {
            biased;
            _ = stopped.cancelled() => Err(QueueError::Closed),
            result = self.queue.enqueue(task) => result,
        }
    }

    /// Wait until every queued command, retries included, has finished
    pub async fn wait_idle(&self) -> Result<(), QueueError> {
        let stopped = self.pool.cancellation_token();
        tokio::select! {
            biased;
            _ = self.queue.wait_idle() => Ok(()),
            _ = stopped.cancelled() => Err(QueueError::Closed),
        }
    }

    /// Show `message` and wait until the user quits the dashboard
    pub async fn wait_user_exit(&self, message: &str) {
        info!("{message}");
        self.dashboard.append(self.main_tab, OutputKind::Log, message);
        self.dashboard.wait_closed().await;
    }

    /// Stop the workers, then the dashboard.
    ///
    /// Returns whether the dashboard stopped within its timeout.
    pub async fn shutdown(&self) -> bool {
        self.pool.shutdown().await;
        self.dashboard.stop().await
    }

    /// Get reference to the task queue
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Get reference to the worker pool
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }
}
