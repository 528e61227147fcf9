use std::process::Stdio;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::process::Command;

use super::{Connector, ExecHandle, RemoteSession};
use crate::config::Host;
use crate::error::SessionError;

/// Runs every task on this machine instead of over ssh
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, _host: &Host) -> Result<Box<dyn RemoteSession>, SessionError> {
        Ok(Box::new(LocalSession))
    }
}

struct LocalSession;

#[async_trait]
impl RemoteSession for LocalSession {
    /// Executes the command using `sh -c "command"` format,
    /// capturing stdout/stderr asynchronously.
    async fn exec(&mut self, command: &str) -> Result<ExecHandle, SessionError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or(SessionError::Closed)?;
        let stderr = child.stderr.take().ok_or(SessionError::Closed)?;

        let exit = async move {
            let status = child.wait().await?;
            // Killed by a signal: report it the way a shell would
            Ok(status.code().unwrap_or(-1))
        }
        .boxed();

        Ok(ExecHandle {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit,
        })
    }

    async fn close(&mut self) {}
}
