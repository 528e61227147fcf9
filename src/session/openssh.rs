use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::{Connector, ExecHandle, RemoteSession};
use crate::config::Host;
use crate::error::SessionError;

/// Exit code the OpenSSH client uses for its own failures
const SSH_CLIENT_FAILURE: i32 = 255;

/// Interval between control-socket readiness checks while connecting
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(0);

/// Opens sessions through the system `ssh` client.
///
/// Each session is an OpenSSH control master (`ssh -M -N`); commands are
/// multiplexed over its socket so a task does not pay for a new handshake.
/// Authentication is whatever the client does non-interactively (agent,
/// keys, `~/.ssh/config`).
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    program: PathBuf,
    connect_timeout: Duration,
    socket_dir: PathBuf,
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            connect_timeout: Duration::from_secs(20),
            socket_dir: std::env::temp_dir(),
        }
    }
}

impl OpenSshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another client binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn next_socket(&self) -> PathBuf {
        let id = NEXT_SOCKET.fetch_add(1, Ordering::Relaxed);
        self.socket_dir
            .join(format!("sshq-{}-{}.sock", std::process::id(), id))
    }
}

#[async_trait]
impl Connector for OpenSshConnector {
    async fn connect(&self, host: &Host) -> Result<Box<dyn RemoteSession>, SessionError> {
        let socket = self.next_socket();
        let mut master = Command::new(&self.program)
            .args(["-M", "-N", "-o", "BatchMode=yes", "-o", "ServerAliveInterval=15"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-S")
            .arg(&socket)
            .arg("-l")
            .arg(&host.user)
            .arg(&host.address)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let deadline = Instant::now() + self.connect_timeout;
        loop {
            if let Some(status) = master.try_wait()? {
                let mut detail = String::new();
                if let Some(mut stderr) = master.stderr.take() {
                    stderr.read_to_string(&mut detail).await?;
                }
                return Err(classify_connect_failure(host, status, detail.trim()));
            }
            if control_check(&self.program, &socket, host).await {
                break;
            }
            if Instant::now() >= deadline {
                terminate(&mut master).await;
                return Err(SessionError::Protocol {
                    host: host.to_string(),
                    detail: "timed out waiting for the control socket".into(),
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        Ok(Box::new(OpenSshSession {
            program: self.program.clone(),
            host: host.clone(),
            socket,
            master: Some(master),
        }))
    }
}

struct OpenSshSession {
    program: PathBuf,
    host: Host,
    socket: PathBuf,
    master: Option<Child>,
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn exec(&mut self, command: &str) -> Result<ExecHandle, SessionError> {
        if self.master.is_none() {
            return Err(SessionError::Closed);
        }

        let mut child = Command::new(&self.program)
            .args(["-o", "BatchMode=yes", "-S"])
            .arg(&self.socket)
            .arg("-l")
            .arg(&self.host.user)
            .arg(&self.host.address)
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or(SessionError::Closed)?;
        let stderr = child.stderr.take().ok_or(SessionError::Closed)?;

        let program = self.program.clone();
        let socket = self.socket.clone();
        let host = self.host.clone();
        let exit = async move {
            let status = child.wait().await?;
            match status.code() {
                // 255 is either the remote command's own code or a dead transport
                Some(SSH_CLIENT_FAILURE) if !control_check(&program, &socket, &host).await => {
                    Err(SessionError::Disconnected {
                        host: host.to_string(),
                    })
                }
                Some(code) => Ok(code),
                None => Err(SessionError::Disconnected {
                    host: host.to_string(),
                }),
            }
        }
        .boxed();

        Ok(ExecHandle {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit,
        })
    }

    async fn close(&mut self) {
        let Some(mut master) = self.master.take() else {
            return;
        };
        let _ = Command::new(&self.program)
            .arg("-S")
            .arg(&self.socket)
            .args(["-O", "exit"])
            .arg(&self.host.address)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        terminate(&mut master).await;
        let _ = tokio::fs::remove_file(&self.socket).await;
    }
}

/// Ask the master whether its control socket is up
async fn control_check(program: &Path, socket: &Path, host: &Host) -> bool {
    Command::new(program)
        .arg("-S")
        .arg(socket)
        .args(["-O", "check"])
        .arg(&host.address)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|status| status.success())
}

/// SIGTERM the master so it removes its socket, SIGKILL if it lingers
async fn terminate(master: &mut Child) {
    if let Some(pid) = master.id().and_then(|pid| i32::try_from(pid).ok()) {
        let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
    }
    if tokio::time::timeout(Duration::from_secs(2), master.wait())
        .await
        .is_err()
    {
        let _ = master.kill().await;
    }
}

fn classify_connect_failure(host: &Host, status: ExitStatus, detail: &str) -> SessionError {
    let lower = detail.to_lowercase();
    let host = host.to_string();
    let detail = if detail.is_empty() {
        format!("ssh exited with {status}")
    } else {
        detail.to_string()
    };

    if lower.contains("permission denied")
        || lower.contains("authentication")
        || lower.contains("host key verification failed")
    {
        SessionError::Auth { host, detail }
    } else if [
        "no route to host",
        "could not resolve",
        "connection refused",
        "connection timed out",
        "network is unreachable",
        "name or service not known",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
    {
        SessionError::NoRoute { host, detail }
    } else {
        SessionError::Protocol { host, detail }
    }
}
