use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Host, PoolConfig};
use crate::queue::TaskQueue;
use crate::session::Connector;
use crate::tui::{Dashboard, TabHandle};
use crate::worker::host_worker::{HostWorker, WorkerContext};
use crate::worker::registry::SessionRegistry;

/// One worker per host connection, all feeding from the same queue
pub struct WorkerPool {
    hosts: Vec<(Host, TabHandle)>,
    ctx: Arc<WorkerContext>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl WorkerPool {
    /// Create a pool and one dashboard tab per host
    pub fn new(
        hosts: Vec<Host>,
        queue: Arc<TaskQueue>,
        connector: Arc<dyn Connector>,
        dashboard: Dashboard,
        config: PoolConfig,
    ) -> Self {
        let hosts = hosts
            .into_iter()
            .map(|host| {
                let tab = dashboard.add_tab(host.label());
                (host, tab)
            })
            .collect();
        Self {
            hosts,
            ctx: Arc::new(WorkerContext {
                queue,
                connector,
                registry: Arc::new(SessionRegistry::new()),
                dashboard,
                cancel: CancellationToken::new(),
                config,
            }),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Spawn the workers. Only the first call does anything.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(workers = self.hosts.len(), "starting workers");
        let handles = self.hosts.iter().map(|(host, tab)| {
            let worker = HostWorker::new(host.clone(), *tab, Arc::clone(&self.ctx));
            tokio::spawn(worker.run())
        });
        self.lock_workers().extend(handles);
    }

    /// Stop every worker.
    ///
    /// Cancels the pool, closes all open sessions so no worker stays blocked
    /// on remote I/O, then waits for the workers up to the shutdown grace
    /// period and aborts whatever is left. Later calls return immediately.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down workers");
        self.ctx.cancel.cancel();
        let closed = self.ctx.registry.close_all();
        debug!(closed, "closed open sessions");

        let workers = std::mem::take(&mut *self.lock_workers());
        let deadline = Instant::now() + self.ctx.config.shutdown_grace;
        for mut worker in workers {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                warn!("worker did not stop in time, aborting it");
                worker.abort();
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Cancelled once the pool stops, by `shutdown` or by a fatal fault
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    /// Sessions currently open across all workers
    pub fn open_sessions(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Dashboard tab of every host, in configuration order
    pub fn tabs(&self) -> impl Iterator<Item = (&Host, TabHandle)> {
        self.hosts.iter().map(|(host, tab)| (host, *tab))
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::DashboardConfig;
    use crate::session::mock::{Scripted, ScriptedConnector};

    struct Fixture {
        pool: WorkerPool,
        queue: Arc<TaskQueue>,
        dashboard: Dashboard,
        connector: ScriptedConnector,
    }

    impl Fixture {
        fn new(addresses: &[&str], connector: ScriptedConnector, config: PoolConfig) -> Self {
            let hosts: Vec<Host> = addresses
                .iter()
                .map(|address| Host::new(*address, "tester"))
                .collect();
            let dashboard = Dashboard::detached(DashboardConfig::default());
            dashboard.set_viewport(120, 20);
            let queue = Arc::new(TaskQueue::new(16 * hosts.len()));
            let pool = WorkerPool::new(
                hosts,
                Arc::clone(&queue),
                Arc::new(connector.clone()),
                dashboard.clone(),
                config,
            );
            Self {
                pool,
                queue,
                dashboard,
                connector,
            }
        }

        async fn enqueue_all(&self, commands: &[&str]) {
            for command in commands {
                self.queue.enqueue(*command).await.unwrap();
            }
        }

        async fn wait_idle(&self) {
            tokio::time::timeout(Duration::from_secs(3600), self.queue.wait_idle())
                .await
                .expect("queue should drain");
        }

        fn tab_lines(&self, index: usize) -> Vec<String> {
            let (_, tab) = self.pool.tabs().nth(index).unwrap();
            self.dashboard.lines(tab)
        }

        async fn wait_for_runs(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.connector.runs().len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("runs should start");
        }
    }

    fn not_persistent() -> PoolConfig {
        PoolConfig {
            persistent: false,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn pool_runs_every_task_exactly_once() {
        let fixture = Fixture::new(&["a", "b", "c"], ScriptedConnector::echo(), PoolConfig::default());
        let commands: Vec<String> = (0..20).map(|i| format!("task-{i:02}")).collect();
        let refs: Vec<&str> = commands.iter().map(String::as_str).collect();

        fixture.pool.start();
        fixture.enqueue_all(&refs).await;
        fixture.wait_idle().await;

        let mut done: Vec<String> = fixture
            .connector
            .successes()
            .into_iter()
            .map(|(_, command)| command)
            .collect();
        done.sort();
        assert_eq!(done, commands);
        assert_eq!(fixture.queue.pending(), 0);

        fixture.pool.shutdown().await;
        assert_eq!(fixture.connector.closes(), fixture.connector.connects());
        assert_eq!(fixture.pool.open_sessions(), 0);
    }

    #[tokio::test]
    async fn pool_creates_one_tab_per_host_in_order() {
        let fixture = Fixture::new(&["a", "b"], ScriptedConnector::echo(), PoolConfig::default());

        let labels: Vec<&str> = fixture.pool.tabs().map(|(host, _)| host.label()).collect();
        assert_eq!(labels, vec!["tester@a", "tester@b"]);
        assert_eq!(fixture.dashboard.tab_count(), 2);
    }

    #[tokio::test]
    async fn pool_forwards_output_and_narrates_command() {
        let fixture = Fixture::new(&["a"], ScriptedConnector::echo(), PoolConfig::default());

        fixture.pool.start();
        fixture.enqueue_all(&["uptime"]).await;
        fixture.wait_idle().await;

        let lines = fixture.tab_lines(0);
        assert!(lines.iter().any(|l| l.ends_with("] Connected")));
        assert!(lines.iter().any(|l| l.ends_with("] $ uptime")));
        assert_eq!(lines.last().map(String::as_str), Some("uptime"));
        fixture.pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pool_persistent_failure_is_retried_with_growing_penalty() {
        let connector = ScriptedConnector::new(|_, _, attempt| {
            if attempt < 2 {
                Scripted::fail(1, "boom")
            } else {
                Scripted::ok("fine")
            }
        });
        let fixture = Fixture::new(&["a"], connector, PoolConfig::default());
        let started = Instant::now();

        fixture.pool.start();
        fixture.enqueue_all(&["flaky"]).await;
        fixture.wait_idle().await;

        // Paused 1s after the first failure and 2s after the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
        assert_eq!(fixture.connector.runs().len(), 3);
        assert_eq!(fixture.connector.successes().len(), 1);

        let lines = fixture.tab_lines(0);
        assert!(lines.iter().any(|l| l == "boom"));
        assert!(lines.iter().any(|l| l.ends_with("Requeued, pausing 1s")));
        assert!(lines.iter().any(|l| l.ends_with("Requeued, pausing 2s")));
        fixture.pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pool_failed_task_lands_on_a_healthy_host() {
        let connector = ScriptedConnector::new(|host, command, _| {
            if host.address == "broken" {
                Scripted::fail(2, "")
            } else {
                Scripted::ok(command)
            }
        });
        let fixture = Fixture::new(&["broken", "healthy"], connector, PoolConfig::default());

        fixture.pool.start();
        fixture.enqueue_all(&["one", "two", "three", "four"]).await;
        fixture.wait_idle().await;

        let successes = fixture.connector.successes();
        assert_eq!(successes.len(), 4);
        assert!(successes.iter().all(|(host, _)| host == "tester@healthy"));
        fixture.pool.shutdown().await;
    }

    /// Hosts `ok-1` and `ok-2` succeed, `bad` exits 1 on every command
    fn fleet_with_one_failing_host() -> ScriptedConnector {
        ScriptedConnector::new(|host, command, _| {
            if host.address == "bad" {
                Scripted::fail(1, "disk full")
            } else {
                Scripted::ok(command)
            }
        })
    }

    fn ten_tasks() -> Vec<String> {
        (0..10).map(|i| format!("task-{i}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn pool_persistent_fleet_finishes_every_task_on_healthy_hosts() {
        let fixture = Fixture::new(
            &["ok-1", "ok-2", "bad"],
            fleet_with_one_failing_host(),
            PoolConfig::default(),
        );
        let commands = ten_tasks();
        let refs: Vec<&str> = commands.iter().map(String::as_str).collect();

        fixture.pool.start();
        fixture.enqueue_all(&refs).await;
        fixture.wait_idle().await;

        assert_eq!(fixture.queue.pending(), 0);
        let mut done: Vec<String> = fixture
            .connector
            .successes()
            .into_iter()
            .map(|(host, command)| {
                assert_ne!(host, "tester@bad");
                command
            })
            .collect();
        done.sort();
        assert_eq!(done, commands);

        let failures = fixture
            .connector
            .runs()
            .iter()
            .filter(|(host, _, _)| host == "tester@bad")
            .count();
        let bad_tab = fixture.tab_lines(2);
        let requeues = bad_tab
            .iter()
            .filter(|l| l.contains("Requeued, pausing"))
            .count();
        assert_eq!(requeues, failures);
        assert_eq!(
            bad_tab.iter().filter(|l| *l == "disk full").count(),
            failures
        );
        fixture.pool.shutdown().await;
    }

    #[tokio::test]
    async fn pool_not_persistent_fleet_attempts_each_task_once() {
        let fixture = Fixture::new(
            &["ok-1", "ok-2", "bad"],
            fleet_with_one_failing_host(),
            not_persistent(),
        );
        let commands = ten_tasks();
        let refs: Vec<&str> = commands.iter().map(String::as_str).collect();

        fixture.pool.start();
        fixture.enqueue_all(&refs).await;
        fixture.wait_idle().await;

        let runs = fixture.connector.runs();
        let mut attempted: Vec<String> = runs.iter().map(|(_, command, _)| command.clone()).collect();
        attempted.sort();
        assert_eq!(attempted, commands);

        let failed = runs
            .iter()
            .filter(|(host, _, _)| host == "tester@bad")
            .count();
        assert_eq!(fixture.connector.successes().len(), 10 - failed);
        assert_eq!(fixture.queue.pending(), 0);
        assert!(fixture.queue.is_empty());
        assert!(
            !fixture
                .tab_lines(2)
                .iter()
                .any(|l| l.contains("Requeued"))
        );
        fixture.pool.shutdown().await;
    }

    #[tokio::test]
    async fn pool_not_persistent_drops_failed_task() {
        let connector = ScriptedConnector::new(|_, _, _| Scripted::fail(3, "nope"));
        let fixture = Fixture::new(&["a"], connector, not_persistent());

        fixture.pool.start();
        fixture.enqueue_all(&["doomed"]).await;
        fixture.wait_idle().await;

        assert_eq!(fixture.connector.runs().len(), 1);
        assert!(fixture.queue.is_empty());
        let lines = fixture.tab_lines(0);
        assert!(lines.iter().any(|l| l.ends_with("Command exited with status 3")));
        fixture.pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pool_transport_fault_requeues_and_reconnects_after_backoff() {
        let connector = ScriptedConnector::new(|_, command, attempt| {
            if attempt == 0 {
                Scripted::Disconnect
            } else {
                Scripted::ok(command)
            }
        });
        // Requeued even though failed tasks are normally dropped
        let fixture = Fixture::new(&["a"], connector, not_persistent());
        let started = Instant::now();

        fixture.pool.start();
        fixture.enqueue_all(&["deploy"]).await;
        fixture.wait_idle().await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(8), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(9), "elapsed {elapsed:?}");
        assert_eq!(fixture.connector.runs().len(), 2);
        assert_eq!(fixture.connector.successes().len(), 1);
        assert_eq!(fixture.connector.connects(), 2);
        assert!(fixture.connector.closes() >= 1);

        let lines = fixture.tab_lines(0);
        assert!(lines.iter().any(|l| l == "partial output"));
        assert!(lines.iter().any(|l| l.contains("Connection lost")));
        assert!(lines.iter().any(|l| l.ends_with("Disconnected, reconnecting in 8s")));
        fixture.pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pool_host_whose_sessions_keep_breaking_reconnects_at_backoff_pace() {
        let connector = ScriptedConnector::new(|_, _, _| Scripted::Disconnect);
        let fixture = Fixture::new(&["flaky"], connector, PoolConfig::default());

        fixture.pool.start();
        fixture.enqueue_all(&["deploy"]).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        // Every connect succeeds and resets the backoff, so each broken
        // session costs 8s: connects at 0, 8, 16, ..., 56
        assert_eq!(fixture.connector.connects(), 8);
        assert_eq!(fixture.connector.runs().len(), 8);
        assert_eq!(fixture.queue.pending(), 1);
        fixture.pool.shutdown().await;
    }

    #[tokio::test]
    async fn pool_panicking_worker_requeues_task_before_stopping() {
        let connector = ScriptedConnector::new(|_, command, attempt| {
            if attempt == 0 {
                Scripted::Panic
            } else {
                Scripted::ok(command)
            }
        });
        let fixture = Fixture::new(&["a", "b"], connector, PoolConfig::default());

        fixture.pool.start();
        fixture.enqueue_all(&["explode"]).await;
        fixture.wait_idle().await;

        assert_eq!(fixture.connector.runs().len(), 2);
        assert_eq!(fixture.connector.successes().len(), 1);
        fixture.pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pool_connect_backoff_doubles_between_attempts() {
        let connector = ScriptedConnector::echo().failing_connects("a", 3);
        let fixture = Fixture::new(&["a"], connector, PoolConfig::default());
        let started = Instant::now();

        fixture.pool.start();
        fixture.enqueue_all(&["hostname"]).await;
        fixture.wait_idle().await;

        // 8 + 16 + 32 seconds of backoff before the fourth attempt connects
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(56), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(57), "elapsed {elapsed:?}");

        let lines = fixture.tab_lines(0);
        for delay in ["8s", "16s", "32s"] {
            assert!(lines.iter().any(|l| l.ends_with(&format!("Retrying in {delay}"))));
        }
        fixture.pool.shutdown().await;
    }

    #[tokio::test]
    async fn pool_shutdown_closes_session_blocked_on_remote_io() {
        let connector = ScriptedConnector::new(|_, _, _| Scripted::Hang);
        let fixture = Fixture::new(&["a"], connector, PoolConfig::default());

        fixture.pool.start();
        fixture.enqueue_all(&["sleep infinity"]).await;
        fixture.wait_for_runs(1).await;
        assert_eq!(fixture.pool.open_sessions(), 1);

        tokio::time::timeout(Duration::from_secs(1), fixture.pool.shutdown())
            .await
            .expect("shutdown should not wait for the hung command");

        assert_eq!(fixture.connector.closes(), 1);
        assert_eq!(fixture.pool.open_sessions(), 0);
        // The interrupted attempt is put back, not lost
        assert_eq!(fixture.queue.len(), 1);
        assert_eq!(fixture.queue.pending(), 1);
    }

    #[tokio::test]
    async fn pool_shutdown_interrupts_connect_backoff() {
        let connector = ScriptedConnector::echo().failing_connects("a", usize::MAX);
        let fixture = Fixture::new(&["a"], connector, PoolConfig::default());

        fixture.pool.start();
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), fixture.pool.shutdown())
            .await
            .expect("shutdown should not wait out the backoff");
        assert_eq!(fixture.connector.connects(), 0);
    }

    #[tokio::test]
    async fn pool_shutdown_is_idempotent() {
        let fixture = Fixture::new(&["a", "b"], ScriptedConnector::echo(), PoolConfig::default());
        fixture.pool.start();
        fixture.enqueue_all(&["x"]).await;
        fixture.wait_idle().await;

        let (first, second) = tokio::join!(fixture.pool.shutdown(), fixture.pool.shutdown());
        let _ = (first, second);
        fixture.pool.shutdown().await;

        assert!(fixture.pool.is_shut_down());
        assert!(fixture.pool.cancellation_token().is_cancelled());
        assert_eq!(fixture.connector.closes(), fixture.connector.connects());
    }

    #[tokio::test]
    async fn pool_accounting_fault_cancels_every_worker() {
        let fixture = Fixture::new(&["a", "b"], ScriptedConnector::echo(), PoolConfig::default());
        fixture.enqueue_all(&["x"]).await;
        // Finalize the attempt behind the workers' back
        fixture.queue.mark_done().unwrap();

        fixture.pool.start();
        tokio::time::timeout(
            Duration::from_secs(5),
            fixture.pool.cancellation_token().cancelled(),
        )
        .await
        .expect("the fault should stop the pool");
        fixture.pool.shutdown().await;
    }
}
