use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::queue::Task;
use crate::worker::BackoffPolicy;

/// Default scrollback lines kept per dashboard tab
pub const DEFAULT_SCROLLBACK: usize = 1024;

/// Waiting tasks allowed per host before `enqueue` applies backpressure
pub const QUEUE_SLOTS_PER_HOST: usize = 16;

/// One remote login a worker connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub address: String,
    pub user: String,
    label: String,
}

impl Host {
    pub fn new(address: impl Into<String>, user: impl Into<String>) -> Self {
        let address = address.into();
        let user = user.into();
        let label = format!("{user}@{address}");
        Self {
            address,
            user,
            label,
        }
    }

    /// Distinguish parallel connections to the same login
    fn with_slot(mut self, slot: usize) -> Self {
        self.label = format!("{}#{}", self.label, slot);
        self
    }

    /// Name shown in the dashboard tab list
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostsFile {
    #[serde(default, rename = "host")]
    hosts: Vec<HostEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostEntry {
    address: String,
    user: Option<String>,
    #[serde(default = "one_connection")]
    connections: usize,
}

fn one_connection() -> usize {
    1
}

/// Login name of the invoking user
pub fn current_user() -> Option<String> {
    ["USER", "LOGNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.is_empty())
}

/// Hosts used when no hosts file is given: localhost as the current user
pub fn default_hosts() -> Result<Vec<Host>, ConfigError> {
    let user = current_user().ok_or(ConfigError::NoUser)?;
    Ok(vec![Host::new("localhost", user)])
}

/// Read a TOML hosts file
///
/// ```toml
/// [[host]]
/// address = "node1"
/// user = "alice"      # defaults to $USER
/// connections = 2     # defaults to 1
/// ```
pub fn load_hosts(path: &Path) -> Result<Vec<Host>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_hosts(&contents, path, current_user().as_deref())
}

fn parse_hosts(
    contents: &str,
    path: &Path,
    default_user: Option<&str>,
) -> Result<Vec<Host>, ConfigError> {
    let file: HostsFile = toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hosts = Vec::new();
    for entry in file.hosts {
        let user = match entry.user.as_deref().or(default_user) {
            Some(user) => user.to_string(),
            None => return Err(ConfigError::NoUser),
        };
        let host = Host::new(entry.address, user);
        // Several connections to one machine mean several workers competing for tasks
        if entry.connections > 1 {
            hosts.extend((1..=entry.connections).map(|slot| host.clone().with_slot(slot)));
        } else if entry.connections == 1 {
            hosts.push(host);
        }
    }

    if hosts.is_empty() {
        return Err(ConfigError::NoHosts {
            path: path.to_path_buf(),
        });
    }
    Ok(hosts)
}

/// Read a command file: one shell command per line, blank lines skipped
pub fn load_commands(path: &Path) -> Result<Vec<Task>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_commands(&contents))
}

fn parse_commands(contents: &str) -> Vec<Task> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(Task::from)
        .collect()
}

/// Tuning of the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Requeue tasks that exit non-zero instead of dropping them
    pub persistent: bool,
    /// Delay before reconnecting after a failed connect or a broken session
    pub connect_backoff: BackoffPolicy,
    /// Pause a worker takes after one of its tasks failed
    pub failure_penalty: BackoffPolicy,
    /// How long `shutdown` waits for workers to wind down
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            persistent: true,
            connect_backoff: BackoffPolicy::new(Duration::from_secs(8), Duration::from_secs(600)),
            failure_penalty: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(600)),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Wrapped lines kept per tab
    pub scrollback: usize,
    /// How long `stop` waits for the render thread
    pub stop_timeout: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            scrollback: DEFAULT_SCROLLBACK,
            stop_timeout: Duration::from_secs(5),
        }
    }
}
