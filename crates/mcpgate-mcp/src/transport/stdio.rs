//! Stdio transport: a child process speaking newline-delimited JSON-RPC.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ClientTransport, ConnectionInfo};
use crate::config::TransportKind;
use crate::error::{McpError, TransportError};
use crate::protocol::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, RequestId};

/// How often a blocked read checks whether the child is still alive.
const READ_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 50;

/// A running server process.
struct ChildSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
}

/// Standard I/O transport for MCP servers.
///
/// Requests are serialized: the session lock is held from writing a request
/// until its response line is read, so at most one request is in flight.
/// Lines carrying other ids, and server notifications, are logged and
/// skipped.
pub struct StdioTransport {
    server: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    shutdown_timeout: Duration,
    session: Mutex<Option<ChildSession>>,
    stderr_tail: Arc<parking_lot::Mutex<VecDeque<String>>>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Create a transport for `command`. Nothing is spawned until
    /// [`ClientTransport::connect`].
    pub fn new(server: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            shutdown_timeout: Duration::from_secs(5),
            session: Mutex::new(None),
            stderr_tail: Arc::new(parking_lot::Mutex::new(VecDeque::new())),
            connected: AtomicBool::new(false),
        }
    }

    /// Set command arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Environment merged over the parent's.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Grace period between SIGTERM and kill on disconnect.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Recent stderr output of the server process.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn spawn(&self) -> Result<ChildSession, TransportError> {
        debug!(
            server = %self.server,
            command = %self.command,
            args = ?self.args,
            "Spawning MCP server process"
        );

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdout"))
        })?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| self.drain_stderr(stderr));

        Ok(ChildSession {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr_task,
        })
    }

    /// Forward stderr to debug logs and keep a bounded tail for diagnostics.
    fn drain_stderr(&self, stderr: ChildStderr) -> JoinHandle<()> {
        let server = self.server.clone();
        let tail = Arc::clone(&self.stderr_tail);
        tail.lock().clear();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(server = %server, "stderr: {}", line);
                let mut tail = tail.lock();
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        })
    }

    async fn write_line(session: &mut ChildSession, line: &str) -> Result<(), TransportError> {
        session
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;
        session
            .stdin
            .write_all(b"\n")
            .await
            .map_err(TransportError::WriteError)?;
        session
            .stdin
            .flush()
            .await
            .map_err(TransportError::WriteError)
    }

    /// Build the error for a server that stopped responding.
    fn exited(&self, session: &mut ChildSession) -> TransportError {
        match session.child.try_wait() {
            Ok(Some(status)) => TransportError::ProcessExited {
                status: status.to_string(),
                stderr: self.stderr_tail(),
            },
            _ => TransportError::ConnectionClosed,
        }
    }

    async fn read_response(
        &self,
        session: &mut ChildSession,
        id: &RequestId,
    ) -> Result<Value, McpError> {
        loop {
            let line = match tokio::time::timeout(READ_POLL_INTERVAL, session.stdout.next_line())
                .await
            {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => return Err(self.exited(session).into()),
                Ok(Err(e)) => return Err(TransportError::ReadError(e).into()),
                Err(_) => {
                    if let Ok(Some(status)) = session.child.try_wait() {
                        return Err(TransportError::ProcessExited {
                            status: status.to_string(),
                            stderr: self.stderr_tail(),
                        }
                        .into());
                    }
                    continue;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message = match IncomingMessage::parse(line) {
                Ok(message) => message,
                Err(e) => {
                    warn!(server = %self.server, error = %e, "Ignoring non-JSON line on stdout");
                    continue;
                }
            };

            if !message.is_response() {
                debug!(
                    server = %self.server,
                    method = message.method.as_deref().unwrap_or("-"),
                    "Ignoring server-initiated message"
                );
                continue;
            }

            if message.id.as_ref() != Some(id) {
                warn!(
                    server = %self.server,
                    expected = %id,
                    received = ?message.id,
                    "Dropping response with unexpected id"
                );
                continue;
            }

            return message.into_result();
        }
    }

    fn mark_lost(&self, err: &McpError) {
        if err.is_connection_lost() {
            self.connected.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ClientTransport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&self) -> Result<ConnectionInfo, TransportError> {
        let mut guard = self.session.lock().await;
        if guard.is_some() && self.connected.load(Ordering::SeqCst) {
            return Ok(ConnectionInfo {
                pid: guard.as_ref().and_then(|s| s.child.id()),
                ..Default::default()
            });
        }

        let session = self.spawn()?;
        let pid = session.child.id();
        *guard = Some(session);
        self.connected.store(true, Ordering::SeqCst);

        debug!(server = %self.server, pid = ?pid, "MCP server process spawned");
        Ok(ConnectionInfo {
            pid,
            ..Default::default()
        })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        self.connected.store(false, Ordering::SeqCst);

        let ChildSession {
            mut child,
            stdin,
            stderr_task,
            ..
        } = session;

        // Closing stdin is the polite shutdown request for stdio servers.
        drop(stdin);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                debug!(server = %self.server, pid, "Sending SIGTERM to MCP server");
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => debug!(server = %self.server, %status, "MCP server exited"),
            Ok(Err(e)) => warn!(server = %self.server, error = %e, "Failed to wait for MCP server"),
            Err(_) => {
                warn!(
                    server = %self.server,
                    timeout = ?self.shutdown_timeout,
                    "MCP server did not exit in time, killing"
                );
                child.kill().await.map_err(TransportError::TerminateFailed)?;
            }
        }

        if let Some(task) = stderr_task {
            task.abort();
        }
        Ok(())
    }

    async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let request = JsonRpcRequest::new(id.clone(), method, params);
        let line = serde_json::to_string(&request)?;

        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or(McpError::Transport(TransportError::NotConnected))?;

        debug!(server = %self.server, id = %id, method, "Sending request");
        if let Err(e) = Self::write_line(session, &line).await {
            let err = match e {
                TransportError::WriteError(_) => McpError::from(self.exited(session)),
                other => other.into(),
            };
            self.mark_lost(&err);
            return Err(err);
        }

        let result = self.read_response(session, &id).await;
        if let Err(e) = &result {
            self.mark_lost(e);
        }
        result
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let line = serde_json::to_string(&notification)?;

        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or(McpError::Transport(TransportError::NotConnected))?;
        Self::write_line(session, &line).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
