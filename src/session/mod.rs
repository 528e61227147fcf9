//! Remote-execution sessions.
//!
//! A [`Connector`] opens one [`RemoteSession`] per host; the session runs one
//! command at a time and hands back its output streams and exit status as an
//! [`ExecHandle`]. The worker owns the session and is the only one that talks
//! to it. Aborting blocked I/O from another task goes through the worker's
//! per-session cancellation token, not through the session itself.

mod local;
#[cfg(test)]
pub(crate) mod mock;
mod openssh;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::AsyncRead;

use crate::config::Host;
use crate::error::SessionError;

pub use local::LocalConnector;
pub use openssh::OpenSshConnector;

/// A running remote command
pub struct ExecHandle {
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    /// Resolves to the exit code once the remote process is gone.
    ///
    /// An error here means the transport broke, not that the command failed.
    pub exit: BoxFuture<'static, Result<i32, SessionError>>,
}

/// One open connection to a host
#[async_trait]
pub trait RemoteSession: Send {
    /// Start `command` on the remote side
    async fn exec(&mut self, command: &str) -> Result<ExecHandle, SessionError>;

    /// Tear the connection down. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &Host) -> Result<Box<dyn RemoteSession>, SessionError>;
}
