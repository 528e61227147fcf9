use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::OutputKind;
use crate::config::{Host, PoolConfig};
use crate::error::SessionError;
use crate::queue::{Task, TaskQueue};
use crate::session::{Connector, ExecHandle, RemoteSession};
use crate::tui::{Dashboard, TabHandle};
use crate::worker::backoff::Backoff;
use crate::worker::line_buffer::LineBuffer;
use crate::worker::registry::SessionRegistry;

/// Bytes read from a remote stream per call
const READ_CHUNK: usize = 4096;

/// Stderr kept for the report of a failed command; older output is dropped
const STDERR_TAIL: usize = 16 * 1024;

/// State every worker of a pool shares
pub(crate) struct WorkerContext {
    pub queue: Arc<TaskQueue>,
    pub connector: Arc<dyn Connector>,
    pub registry: Arc<SessionRegistry>,
    pub dashboard: Dashboard,
    pub cancel: CancellationToken,
    pub config: PoolConfig,
}

/// What the worker does once a session is given up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Reconnect,
    Terminate,
}

/// How one attempt at a task ended
#[derive(Debug)]
enum Outcome {
    Succeeded,
    /// Ran to completion with a non-zero exit code
    Failed(i32),
    /// The session broke while the task was running
    TransportFault(SessionError),
}

/// Drives one host connection: connect, take tasks off the queue, run them,
/// reconnect when the transport breaks.
///
/// Every dequeued task is finalized with exactly one `mark_done`, and a task
/// that has to run again is requeued before that happens, so the queue never
/// looks idle while a retry is on its way.
pub(crate) struct HostWorker {
    host: Host,
    tab: TabHandle,
    ctx: Arc<WorkerContext>,
    connect_backoff: Backoff,
    penalty: Backoff,
}

impl HostWorker {
    pub fn new(host: Host, tab: TabHandle, ctx: Arc<WorkerContext>) -> Self {
        let connect_backoff = Backoff::new(ctx.config.connect_backoff);
        let penalty = Backoff::idle(ctx.config.failure_penalty);
        Self {
            host,
            tab,
            ctx,
            connect_backoff,
            penalty,
        }
    }

    pub async fn run(mut self) {
        debug!(host = %self.host, "worker started");
        loop {
            let connected = tokio::select! {
                _ = self.ctx.cancel.cancelled() => break,
                result = self.ctx.connector.connect(&self.host) => result,
            };

            let mut session = match connected {
                Ok(session) => session,
                Err(err) => {
                    let delay = self.connect_backoff.next_delay();
                    warn!(host = %self.host, error = %err, retry_in = ?delay, "connection failed");
                    self.narrate(&format!(
                        "Connection failed: {err}. Retrying in {}s",
                        delay.as_secs()
                    ));
                    if !self.sleep(delay).await {
                        break;
                    }
                    continue;
                }
            };

            self.connect_backoff.reset();
            info!(host = %self.host, "connected");
            self.narrate("Connected");

            let closer = CancellationToken::new();
            let id = self.ctx.registry.register(closer.clone());
            let flow = self.serve(session.as_mut(), &closer).await;
            session.close().await;
            self.ctx.registry.unregister(id);

            if flow == Flow::Terminate || self.ctx.cancel.is_cancelled() {
                break;
            }
            let delay = self.connect_backoff.next_delay();
            self.narrate(&format!(
                "Disconnected, reconnecting in {}s",
                delay.as_secs()
            ));
            if !self.sleep(delay).await {
                break;
            }
        }
        debug!(host = %self.host, "worker stopped");
    }

    /// Run tasks over one session until it breaks or the pool stops
    async fn serve(&mut self, session: &mut dyn RemoteSession, closer: &CancellationToken) -> Flow {
        loop {
            let task = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => return Flow::Terminate,
                _ = closer.cancelled() => return Flow::Reconnect,
                task = self.ctx.queue.dequeue() => match task {
                    Some(task) => task,
                    None => return Flow::Terminate,
                },
            };

            info!(host = %self.host, command = %task, "running task");
            self.narrate(&format!("$ {task}"));

            let outcome = AssertUnwindSafe(self.execute(session, closer, &task))
                .catch_unwind()
                .await;

            let flow = match outcome {
                Err(_) => {
                    error!(host = %self.host, command = %task, "task execution panicked, worker stopping");
                    self.narrate("Internal error, task requeued");
                    self.requeue(task);
                    self.finish_attempt();
                    return Flow::Terminate;
                }
                Ok(Outcome::Succeeded) => {
                    self.penalty.clear();
                    None
                }
                Ok(Outcome::Failed(code)) => {
                    error!(host = %self.host, command = %task, code, "task failed");
                    self.narrate(&format!("Command exited with status {code}"));
                    if self.ctx.config.persistent {
                        self.requeue(task);
                        let pause = self.penalty.escalate();
                        warn!(host = %self.host, pause = ?pause, "task requeued");
                        self.narrate(&format!("Requeued, pausing {}s", pause.as_secs()));
                    }
                    None
                }
                Ok(Outcome::TransportFault(err)) => {
                    warn!(host = %self.host, command = %task, error = %err, "connection lost during task");
                    self.narrate(&format!("Connection lost: {err}. Task requeued"));
                    self.requeue(task);
                    Some(Flow::Reconnect)
                }
            };

            if !self.finish_attempt() {
                return Flow::Terminate;
            }
            if let Some(flow) = flow {
                return flow;
            }
            if !self.penalty.current().is_zero() && !self.sleep(self.penalty.current()).await {
                return Flow::Terminate;
            }
        }
    }

    /// Run one task to completion, forwarding its output to the host's tab
    async fn execute(
        &self,
        session: &mut dyn RemoteSession,
        closer: &CancellationToken,
        task: &Task,
    ) -> Outcome {
        let attempt = async {
            let ExecHandle {
                stdout,
                stderr,
                exit,
            } = session.exec(task.command()).await?;

            let (_, errors) =
                tokio::try_join!(self.pump_stdout(stdout), read_tail(stderr, STDERR_TAIL))?;
            let code = exit.await?;
            Ok::<_, SessionError>((code, errors))
        };

        // A closed session drops the attempt and with it the remote streams
        let result = tokio::select! {
            _ = closer.cancelled() => Err(SessionError::Closed),
            result = attempt => result,
        };

        match result {
            Ok((0, _)) => Outcome::Succeeded,
            Ok((code, errors)) => {
                let errors = String::from_utf8_lossy(&errors);
                let errors = errors.trim_end();
                if !errors.is_empty() {
                    self.ctx
                        .dashboard
                        .append(self.tab, OutputKind::Stderr, errors);
                }
                Outcome::Failed(code)
            }
            Err(err) => Outcome::TransportFault(err),
        }
    }

    /// Forward stdout to the tab whenever a full line is available
    async fn pump_stdout(&self, mut stdout: impl AsyncRead + Unpin) -> io::Result<()> {
        let mut lines = LineBuffer::default();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = stdout.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            if let Some(text) = lines.push(&chunk[..read]) {
                self.ctx.dashboard.append_text(self.tab, &text);
            }
        }
        if let Some(rest) = lines.finish() {
            self.ctx.dashboard.append_text(self.tab, &rest);
        }
        Ok(())
    }

    fn requeue(&self, task: Task) {
        if let Err(err) = self.ctx.queue.requeue(task) {
            error!(host = %self.host, error = %err, "failed to requeue task");
        }
    }

    /// Finalize the current attempt; a broken count stops the whole pool
    fn finish_attempt(&self) -> bool {
        match self.ctx.queue.mark_done() {
            Ok(()) => true,
            Err(err) => {
                error!(host = %self.host, error = %err, "stopping all workers");
                self.ctx.cancel.cancel();
                false
            }
        }
    }

    /// Sleep unless the pool stops first; returns false if it did
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn narrate(&self, message: &str) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.ctx
            .dashboard
            .append(self.tab, OutputKind::Log, &format!("[{stamp}] {message}"));
    }
}

/// Read `reader` to the end, keeping at most its last `limit` bytes.
///
/// Once something was dropped, the leading partial line goes too.
async fn read_tail(mut reader: impl AsyncRead + Unpin, limit: usize) -> io::Result<Vec<u8>> {
    let mut tail = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        tail.extend_from_slice(&chunk[..read]);
        if tail.len() > limit {
            tail.drain(..tail.len() - limit);
            truncated = true;
        }
    }
    if truncated {
        let start = tail.iter().position(|&b| b == b'\n').map_or(0, |i| i + 1);
        tail.drain(..start);
    }
    Ok(tail)
}
