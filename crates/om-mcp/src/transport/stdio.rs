//! Stdio transport for upstream MCP servers
//!
//! Spawns the configured command and speaks line-delimited JSON-RPC
//! over its stdin/stdout. Stderr is drained into the log and never
//! delivered as a message.

use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;

use om_types::{AppError, AppResult, UpstreamServerConfig};

use super::{MessageCallback, ReadyCallback, Transport};

/// Shell metacharacters rejected in the command and every argument.
const FORBIDDEN_CHARS: &[char] = &[
    ';', '|', '&', '>', '<', '$', '(', ')', '!', '`', '*', '?', '[', ']', '{', '}', '~', '\\',
    '"', '\'', '\n', '\r',
];

/// Reject commands or arguments containing shell metacharacters.
///
/// The command is handed to the OS directly (never a shell), but
/// admin-supplied strings are still refused wholesale so a config
/// can't smuggle expansion syntax into downstream tooling.
pub fn validate_command(command: &str, args: &[String]) -> AppResult<()> {
    if command.is_empty() {
        return Err(AppError::Config("command is empty".to_string()));
    }
    if command.contains(FORBIDDEN_CHARS) {
        return Err(AppError::Config(
            "malicious characters in command".to_string(),
        ));
    }
    for arg in args {
        if arg.contains(FORBIDDEN_CHARS) {
            return Err(AppError::Config(format!(
                "malicious characters in argument: {}",
                arg
            )));
        }
    }
    Ok(())
}

/// Child-process transport speaking newline-delimited JSON-RPC.
pub struct StdioTransport {
    config: UpstreamServerConfig,

    child: Arc<Mutex<Option<Child>>>,

    /// Behind a tokio Mutex so concurrent senders serialize writes.
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,

    /// Fired by `close` to force `start` to return.
    closed: CancellationToken,
}

impl StdioTransport {
    pub fn new(config: UpstreamServerConfig) -> Self {
        Self {
            config,
            child: Arc::new(Mutex::new(None)),
            stdin: Arc::new(tokio::sync::Mutex::new(None)),
            closed: CancellationToken::new(),
        }
    }

    fn kill_child(&self) {
        if let Some(mut child) = self.child.lock().take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(upstream = %self.config.name, "kill failed: {}", e);
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn start(
        &self,
        cancel: CancellationToken,
        on_message: MessageCallback,
        on_ready: ReadyCallback,
    ) -> AppResult<()> {
        let args = self.config.parsed_args()?;
        validate_command(&self.config.command, &args)?;
        let env = self.config.parsed_env()?;

        tracing::info!(
            upstream = %self.config.name,
            command = %self.config.command,
            ?args,
            "stdio transport spawning"
        );

        let mut child = Command::new(&self.config.command)
            .args(&args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Transport(format!(
                    "failed to spawn '{}': {}",
                    self.config.command, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture stderr".to_string()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock() = Some(child);

        // Drain stderr into the log; it is informational only.
        let stderr_name = self.config.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(upstream = %stderr_name, "stderr: {}", line);
            }
        });

        // Ready as soon as the process exists, before any stdout byte.
        on_ready();

        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.closed.cancelled() => return Ok(()),
                read = reader.read_line(&mut line) => read,
            };

            match read {
                Ok(0) => break, // EOF, process is gone
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        on_message(trimmed.as_bytes().to_vec());
                    }
                }
                Err(e) => {
                    self.kill_child();
                    return Err(AppError::Transport(format!("stdout read error: {}", e)));
                }
            }
        }

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            match child.wait().await {
                Ok(status) if status.success() => {
                    tracing::info!(upstream = %self.config.name, "process exited cleanly");
                    Ok(())
                }
                Ok(status) => Err(AppError::Transport(format!(
                    "process exited with {}",
                    status
                ))),
                Err(e) => Err(AppError::Transport(format!("wait failed: {}", e))),
            }
        } else {
            // close() already reaped it
            Ok(())
        }
    }

    async fn send(&self, payload: &[u8]) -> AppResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| AppError::Transport("stdin not open".to_string()))?;

        // JSON-RPC over stdio is line-delimited
        stdin
            .write_all(payload)
            .await
            .map_err(|e| AppError::Transport(format!("stdin write failed: {}", e)))?;
        if payload.last() != Some(&b'\n') {
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| AppError::Transport(format!("stdin write failed: {}", e)))?;
        }
        stdin
            .flush()
            .await
            .map_err(|e| AppError::Transport(format!("stdin flush failed: {}", e)))
    }

    async fn close(&self) {
        self.closed.cancel();
        self.kill_child();
    }
}
