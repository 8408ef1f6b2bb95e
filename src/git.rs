//! Git subprocess plumbing.
//!
//! Every invocation streams its output through [`Progress`] tagged with a
//! human-readable label, never prompts for credentials, and is terminated
//! when the request's cancellation token fires (SIGTERM to the process group,
//! then SIGKILL after a grace period).

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cancel;
use crate::error::{CensusError, Result};
use crate::progress::{GitStream, Progress};

pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct GitCommand {
    label: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    stream_stdout: bool,
}

impl GitCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let label = std::iter::once("git")
            .chain(args.iter().take(2).map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            label,
            args,
            cwd: None,
            stream_stdout: true,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Capture stdout without forwarding it as progress (for bulky query output).
    pub fn capture_stdout(mut self) -> Self {
        self.stream_stdout = false;
        self
    }

    pub fn label_str(&self) -> &str {
        &self.label
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[derive(Debug, Clone)]
pub struct GitRunner {
    kill_grace: Duration,
}

impl Default for GitRunner {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_GRACE)
    }
}

impl GitRunner {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Run the command to completion and return its stdout.
    ///
    /// A non-zero exit is a [`CensusError::Sync`]; cancellation kills the
    /// process and yields [`CensusError::Cancelled`].
    pub async fn run(
        &self,
        cmd: &GitCommand,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<String> {
        cancel::check(cancel)?;
        tracing::debug!(command = %cmd.label, args = ?cmd.args, "spawning git");

        let mut command = Command::new("git");
        command
            .args(&cmd.args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GCM_INTERACTIVE", "never")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| CensusError::Sync {
            command: cmd.label.clone(),
            code: None,
            stderr: format!("failed to start git: {e}"),
        })?;

        let stdout_task = spawn_pump(
            child.stdout.take(),
            &cmd.label,
            GitStream::Stdout,
            cmd.stream_stdout.then(|| progress.clone()),
        );
        let stderr_task = spawn_pump(
            child.stderr.take(),
            &cmd.label,
            GitStream::Stderr,
            Some(progress.clone()),
        );

        let status: std::io::Result<ExitStatus> = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                tracing::debug!(command = %cmd.label, "cancelling git");
                terminate(&mut child, self.kill_grace).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(CensusError::Cancelled);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let status = status.map_err(|e| CensusError::Sync {
            command: cmd.label.clone(),
            code: None,
            stderr: format!("failed waiting for git: {e}"),
        })?;

        if !status.success() {
            return Err(CensusError::Sync {
                command: cmd.label.clone(),
                code: status.code(),
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            });
        }
        Ok(stdout)
    }
}

fn spawn_pump<R>(
    reader: Option<R>,
    label: &str,
    stream: GitStream,
    progress: Option<Progress>,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let label = label.to_string();
    tokio::spawn(async move {
        let Some(reader) = reader else {
            return String::new();
        };
        let mut reader = BufReader::new(reader);
        let mut captured = String::new();
        let mut chunk = Vec::new();
        loop {
            chunk.clear();
            match reader.read_until(b'\n', &mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let text = String::from_utf8_lossy(&chunk);
            if let Some(progress) = &progress {
                // git redraws progress meters with bare carriage returns
                for piece in text.split(['\r', '\n']).filter(|p| !p.trim().is_empty()) {
                    progress.git(&label, stream, piece);
                }
            }
            captured.push_str(&text);
        }
        captured
    })
}

/// SIGTERM the child's process group, then SIGKILL once `grace` elapses.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        #[allow(clippy::cast_possible_wrap)]
        let group = Pid::from_raw(pid as i32);
        let _ = killpg(group, Signal::SIGTERM);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        tracing::warn!(pid, "git ignored SIGTERM, killing");
        let _ = killpg(group, Signal::SIGKILL);
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn tail(text: &str, lines: usize) -> String {
    let collected: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join("\n")
}

// =============================================================================
// Queries
// =============================================================================

/// Most recent commit (across all refs) authored by `email`.
pub async fn find_commit_by_author(
    runner: &GitRunner,
    repo: &Path,
    email: &str,
    progress: &Progress,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    let cmd = GitCommand::new([
        "log".to_string(),
        "--all".to_string(),
        "-n".to_string(),
        "1".to_string(),
        "--format=%H".to_string(),
        "--fixed-strings".to_string(),
        format!("--author=<{email}>"),
    ])
    .label("git log --author")
    .current_dir(repo)
    .capture_stdout();

    let out = runner.run(&cmd, progress, cancel).await?;
    Ok(out
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string))
}

/// Number of commits reachable from any ref.
pub async fn commit_count(
    runner: &GitRunner,
    repo: &Path,
    progress: &Progress,
    cancel: &CancellationToken,
) -> Result<u64> {
    let cmd = GitCommand::new(["rev-list", "--count", "--all"])
        .current_dir(repo)
        .capture_stdout();
    let out = runner.run(&cmd, progress, cancel).await?;
    out.trim().parse::<u64>().map_err(|e| CensusError::Sync {
        command: cmd.label_str().to_string(),
        code: Some(0),
        stderr: format!("unexpected rev-list output `{}`: {e}", out.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_label_uses_subcommand() {
        let cmd = GitCommand::new(["fetch", "--all", "--tags"]);
        assert_eq!(cmd.label_str(), "git fetch --all");
        assert_eq!(cmd.args().len(), 3);

        let cmd = GitCommand::new(["pull", "--ff-only"]).label("git pull (fast-forward)");
        assert_eq!(cmd.label_str(), "git pull (fast-forward)");
    }

    #[test]
    fn tail_keeps_last_non_empty_lines() {
        let text = "a\n\nb\nc\n\n";
        assert_eq!(tail(text, 2), "b\nc");
        assert_eq!(tail(text, 10), "a\nb\nc");
        assert_eq!(tail("", 3), "");
    }
}
