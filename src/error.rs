use std::path::PathBuf;

use thiserror::Error;

/// Failures of a remote-execution session.
///
/// Every variant is a connectivity problem: the worker recovers from all of
/// them by dropping the session and reconnecting with backoff.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication to {host} failed: {detail}")]
    Auth { host: String, detail: String },

    #[error("no route to {host}: {detail}")]
    NoRoute { host: String, detail: String },

    #[error("protocol error talking to {host}: {detail}")]
    Protocol { host: String, detail: String },

    #[error("connection to {host} dropped")]
    Disconnected { host: String },

    #[error("session closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Violations of the pending-counter bookkeeping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task accounting fault: completion signalled with no pending attempt")]
    AccountingFault,

    #[error("task queue is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("failed to initialize the terminal: {0}")]
    Init(#[source] std::io::Error),

    #[error("render thread exited before drawing the first frame")]
    RenderThreadGone,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid hosts file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("hosts file {path} lists no hosts")]
    NoHosts { path: PathBuf },

    #[error("cannot determine the login user; set $USER or give `user` in the hosts file")]
    NoUser,
}
