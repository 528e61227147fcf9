//! In-memory connector whose hosts behave however a test scripts them.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;

use super::{Connector, ExecHandle, RemoteSession};
use crate::config::Host;
use crate::error::SessionError;

/// What a scripted host does when asked to run a command
#[derive(Debug, Clone)]
pub enum Scripted {
    Exit {
        stdout: String,
        stderr: String,
        code: i32,
    },
    /// The transport breaks after the command started
    Disconnect,
    Panic,
    /// Never finishes
    Hang,
}

impl Scripted {
    pub fn ok(stdout: &str) -> Self {
        Self::Exit {
            stdout: stdout.to_string(),
            stderr: String::new(),
            code: 0,
        }
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        Self::Exit {
            stdout: String::new(),
            stderr: stderr.to_string(),
            code,
        }
    }
}

type Script = dyn Fn(&Host, &str, usize) -> Scripted + Send + Sync;

struct Inner {
    /// Host, command and how many times this command was attempted before
    script: Box<Script>,
    connect_failures: Mutex<HashMap<String, usize>>,
    attempts: Mutex<HashMap<String, usize>>,
    runs: Mutex<Vec<(String, String, Scripted)>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

#[derive(Clone)]
pub struct ScriptedConnector {
    inner: Arc<Inner>,
}

impl ScriptedConnector {
    pub fn new(script: impl Fn(&Host, &str, usize) -> Scripted + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                script: Box::new(script),
                connect_failures: Mutex::new(HashMap::new()),
                attempts: Mutex::new(HashMap::new()),
                runs: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Every command succeeds with its own text as output
    pub fn echo() -> Self {
        Self::new(|_, command, _| Scripted::ok(command))
    }

    /// Refuse the first `count` connection attempts to `address`
    pub fn failing_connects(self, address: &str, count: usize) -> Self {
        self.inner
            .connect_failures
            .lock()
            .unwrap()
            .insert(address.to_string(), count);
        self
    }

    /// Host label, command and scripted behaviour of every attempt so far
    pub fn runs(&self) -> Vec<(String, String, Scripted)> {
        self.inner.runs.lock().unwrap().clone()
    }

    /// Commands that exited 0, with the host label that ran them
    pub fn successes(&self) -> Vec<(String, String)> {
        self.runs()
            .into_iter()
            .filter(|(_, _, outcome)| matches!(outcome, Scripted::Exit { code: 0, .. }))
            .map(|(host, command, _)| (host, command))
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, host: &Host) -> Result<Box<dyn RemoteSession>, SessionError> {
        {
            let mut failures = self.inner.connect_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&host.address)
                && *left > 0
            {
                *left -= 1;
                return Err(SessionError::NoRoute {
                    host: host.to_string(),
                    detail: "scripted refusal".into(),
                });
            }
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            host: host.clone(),
            inner: Arc::clone(&self.inner),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    host: Host,
    inner: Arc<Inner>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn exec(&mut self, command: &str) -> Result<ExecHandle, SessionError> {
        let attempt = {
            let mut attempts = self.inner.attempts.lock().unwrap();
            let count = attempts.entry(command.to_string()).or_default();
            *count += 1;
            *count - 1
        };
        let outcome = (self.inner.script)(&self.host, command, attempt);
        self.inner.runs.lock().unwrap().push((
            self.host.label().to_string(),
            command.to_string(),
            outcome.clone(),
        ));

        let host = self.host.to_string();
        let handle = match outcome {
            Scripted::Exit {
                stdout,
                stderr,
                code,
            } => ExecHandle {
                stdout: Box::new(Cursor::new(stdout.into_bytes())),
                stderr: Box::new(Cursor::new(stderr.into_bytes())),
                exit: async move { Ok(code) }.boxed(),
            },
            Scripted::Disconnect => ExecHandle {
                stdout: Box::new(Cursor::new(b"partial output\n".to_vec())),
                stderr: Box::new(Cursor::new(Vec::new())),
                exit: async move { Err(SessionError::Disconnected { host }) }.boxed(),
            },
            Scripted::Panic => panic!("scripted panic running {command}"),
            Scripted::Hang => ExecHandle {
                stdout: Box::new(Cursor::new(Vec::new())),
                stderr: Box::new(Cursor::new(Vec::new())),
                exit: futures::future::pending().boxed(),
            },
        };
        Ok(handle)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
