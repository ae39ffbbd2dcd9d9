//! Child-process transport.
//!
//! Owns at most one tool server process and hands its stdio to the JSON-RPC
//! client. Stderr is kept back for diagnostics when a handshake fails.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::errors::McpError;
use super::types::ServerConfig;

/// How long to wait for stderr output after a failure.
const STDERR_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Longest stderr excerpt attached to an error.
const STDERR_MAX_CHARS: usize = 2000;

/// Streams of a freshly started process.
pub struct ProcessStreams {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// One tool server child process.
pub struct ProcessTransport {
    name: String,
    config: ServerConfig,
    working_dir: Option<String>,
    child: Option<Child>,
    stderr: Option<ChildStderr>,
}

impl ProcessTransport {
    pub fn new(name: &str, config: ServerConfig, working_dir: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            config,
            working_dir,
            child: None,
            stderr: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the configured command and return its stdin/stdout.
    ///
    /// Errors if a previously started process is still alive.
    pub fn start(&mut self) -> Result<ProcessStreams, McpError> {
        if self.is_alive() {
            return Err(McpError::AlreadyRunning {
                name: self.name.clone(),
            });
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);

        // Environment overrides on top of the inherited environment
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        // Per-tool cwd overrides the global working_dir
        let effective_dir = self.config.cwd.as_deref().or(self.working_dir.as_deref());
        if let Some(dir) = effective_dir {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: self.name.clone(),
            reason: format!("{}: {e}", self.config.command),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: self.name.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: self.name.clone(),
            reason: "failed to capture stdout".into(),
        })?;

        tracing::debug!(
            server = %self.name,
            command = %self.config.command,
            pid = child.id(),
            "spawned tool server"
        );

        self.stderr = child.stderr.take();
        self.child = Some(child);

        Ok(ProcessStreams { stdin, stdout })
    }

    /// Whether the process has been started and has not exited.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | Some(Err(_)) | None => false,
        }
    }

    /// OS process id, when started and not yet reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Wait up to `grace` for the process to exit on its own.
    pub async fn wait_for_exit(&mut self, grace: Duration) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        matches!(tokio::time::timeout(grace, child.wait()).await, Ok(Ok(_)))
    }

    /// Terminate the process and release its streams. Idempotent.
    pub async fn kill(&mut self) {
        self.stderr = None;
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.kill().await {
            // Already exited and reaped is the common cause; nothing is left running.
            tracing::debug!(server = %self.name, error = %e, "kill failed");
        }
    }

    /// Read whatever the process wrote to stderr, bounded in time and size.
    pub async fn stderr_excerpt(&mut self) -> String {
        let Some(stderr) = self.stderr.as_mut() else {
            return String::new();
        };

        let mut buf = String::new();
        match tokio::time::timeout(STDERR_READ_TIMEOUT, stderr.read_to_string(&mut buf)).await {
            Ok(Ok(_)) => truncate_chars(buf.trim(), STDERR_MAX_CHARS),
            // Timed out mid-read: keep what arrived.
            Err(_) => truncate_chars(buf.trim(), STDERR_MAX_CHARS),
            Ok(Err(_)) => String::new(),
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...(truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

/// Whether `command` resolves to an existing file, directly or via `PATH`.
///
/// Used to answer health checks without spawning anything.
pub fn command_available(command: &str) -> bool {
    let path = std::path::Path::new(command);
    if path.components().count() > 1 {
        return path.is_file();
    }

    let Some(search) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&search).any(|dir| {
        let candidate = dir.join(command);
        candidate.is_file()
            || (cfg!(target_os = "windows") && candidate.with_extension("exe").is_file())
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
