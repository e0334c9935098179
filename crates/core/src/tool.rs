//! External poppler tool invocation.
//!
//! Every tool run goes through [`ToolProcess`], which owns the child process
//! for its whole life. A process is either drained to completion, or killed
//! and reaped before the caller sees an error. A guard that is dropped
//! without either still kills its child (`kill_on_drop`), and async-process
//! reaps it in the background.

use crate::cancel::Cancellation;
use crate::config::ToolConfig;
use crate::error::{PipelineError, Result};
use async_process::{Child, Command, ExitStatus, Stdio};
use futures::io::{AsyncRead, AsyncReadExt};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The three poppler binaries this crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// `pdfinfo`: document metadata as `key: value` lines.
    Info,
    /// `pdftoppm`: concatenated PPM stream on stdout.
    StreamRasterizer,
    /// `pdftocairo`: one PNG file per page.
    FileRasterizer,
}

impl ToolKind {
    pub fn binary_name(self) -> &'static str {
        match self {
            ToolKind::Info => "pdfinfo",
            ToolKind::StreamRasterizer => "pdftoppm",
            ToolKind::FileRasterizer => "pdftocairo",
        }
    }
}

/// Full path (or bare name, for `PATH` lookup) of a tool binary.
pub fn command_path(kind: ToolKind, tool_dir: Option<&Path>) -> PathBuf {
    let mut name = kind.binary_name().to_string();
    if cfg!(windows) {
        name.push_str(".exe");
    }
    match tool_dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Environment overrides for one tool call.
///
/// On POSIX the tool directory is prepended to `LD_LIBRARY_PATH` so a
/// bundled poppler finds its shared libraries. The override is applied to
/// the child only; this process's environment is never touched.
pub fn tool_env(tool_dir: Option<&Path>) -> Vec<(OsString, OsString)> {
    let Some(dir) = tool_dir else {
        return Vec::new();
    };
    if !cfg!(unix) {
        return Vec::new();
    }
    let mut value = OsString::from(dir.as_os_str());
    if let Some(existing) = std::env::var_os("LD_LIBRARY_PATH") {
        if !existing.is_empty() {
            value.push(":");
            value.push(existing);
        }
    }
    vec![(OsString::from("LD_LIBRARY_PATH"), value)]
}

/// One immutable tool invocation.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub tool: ToolKind,
    pub command: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    pub timeout: Duration,
}

impl RenderJob {
    fn base(tool: ToolKind, config: &ToolConfig, timeout: Duration) -> Self {
        let tool_dir = config.resolved_tool_dir();
        Self {
            tool,
            command: command_path(tool, tool_dir),
            args: Vec::new(),
            env: tool_env(tool_dir),
            timeout,
        }
    }

    fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    fn page_args(self, dpi: u32, first: u32, last: Option<u32>) -> Self {
        let job = self
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(first.to_string());
        match last {
            Some(last) => job.arg("-l").arg(last.to_string()),
            None => job,
        }
    }

    /// `pdfinfo <path>`
    pub fn info(path: &Path, config: &ToolConfig) -> Self {
        Self::base(ToolKind::Info, config, config.info_timeout).arg(path)
    }

    /// `pdftoppm -r <dpi> -f <first> [-l <last>] <path>`
    pub fn stream_pages(
        path: &Path,
        first: u32,
        last: Option<u32>,
        dpi: u32,
        config: &ToolConfig,
    ) -> Self {
        Self::base(ToolKind::StreamRasterizer, config, config.render_timeout)
            .page_args(dpi, first, last)
            .arg(path)
    }

    /// `pdftocairo -png -r <dpi> -f <first> [-l <last>] <path> <output_prefix>`
    pub fn file_pages(
        path: &Path,
        first: u32,
        last: Option<u32>,
        dpi: u32,
        output_prefix: &Path,
        config: &ToolConfig,
    ) -> Self {
        Self::base(ToolKind::FileRasterizer, config, config.render_timeout)
            .arg("-png")
            .page_args(dpi, first, last)
            .arg(path)
            .arg(output_prefix)
    }

    pub fn tool_name(&self) -> &'static str {
        self.tool.binary_name()
    }

    /// Start the process with piped output.
    pub fn spawn(&self) -> Result<ToolProcess> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        #[cfg(windows)]
        {
            use async_process::windows::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::ToolNotFound {
                    tool: self.command.display().to_string(),
                }
            } else {
                PipelineError::ProcessStartFailed(e)
            }
        })?;
        debug!("Spawned {} (pid {})", self.tool_name(), child.id());

        Ok(ToolProcess {
            tool: self.tool_name(),
            timeout: self.timeout,
            started: Instant::now(),
            child,
            reaped: false,
        })
    }
}

/// Captured result of a finished tool.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitStatus,
}

impl ToolOutput {
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Turn a non-zero exit into [`PipelineError::ToolFailed`].
    pub fn into_success(self, tool: &str) -> Result<Self> {
        if self.status.success() {
            return Ok(self);
        }
        Err(PipelineError::ToolFailed {
            tool: tool.to_string(),
            code: self.status.code(),
            stderr: self.stderr_text(),
        })
    }
}

enum Wait {
    Done(std::io::Result<(Vec<u8>, Vec<u8>, ExitStatus)>),
    TimedOut,
    Cancelled,
}

/// Owned handle to a running tool.
pub struct ToolProcess {
    tool: &'static str,
    timeout: Duration,
    started: Instant,
    child: Child,
    reaped: bool,
}

impl ToolProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Drain output and wait for exit.
    ///
    /// The wait ends at the job timeout, counted from spawn, and re-checks
    /// `cancel` every `poll` tick. On timeout or cancellation the process is
    /// killed and reaped before returning.
    pub async fn communicate(&mut self, cancel: &Cancellation, poll: Duration) -> Result<ToolOutput> {
        let deadline = self.started + self.timeout;
        let outcome = {
            let drain = drain(&mut self.child);
            tokio::pin!(drain);
            loop {
                if cancel.is_cancelled() {
                    break Wait::Cancelled;
                }
                let now = Instant::now();
                if now >= deadline {
                    break Wait::TimedOut;
                }
                let tick = poll.min(deadline - now);
                if let Ok(result) = tokio::time::timeout(tick, drain.as_mut()).await {
                    break Wait::Done(result);
                }
            }
        };

        match outcome {
            Wait::Done(Ok((stdout, stderr, status))) => {
                self.reaped = true;
                debug!("{} (pid {}) exited with {}", self.tool, self.id(), status);
                Ok(ToolOutput {
                    stdout,
                    stderr,
                    status,
                })
            }
            Wait::Done(Err(e)) => {
                self.kill_and_reap().await;
                Err(PipelineError::Io(e))
            }
            Wait::TimedOut => {
                warn!(
                    "{} (pid {}) timed out after {:?}, killing",
                    self.tool,
                    self.id(),
                    self.timeout
                );
                self.kill_and_reap().await;
                Err(PipelineError::ToolTimeout {
                    tool: self.tool.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Wait::Cancelled => {
                debug!("{} (pid {}) cancelled, killing", self.tool, self.id());
                self.kill_and_reap().await;
                Err(PipelineError::Cancelled {
                    operation: "Page rendering",
                })
            }
        }
    }

    /// Kill (if still running) and reap a process whose output is not wanted.
    pub async fn dispose(mut self) {
        self.kill_and_reap().await;
    }

    async fn kill_and_reap(&mut self) {
        if self.reaped {
            return;
        }
        // Fails harmlessly when the process already exited.
        if let Err(e) = self.child.kill() {
            debug!("kill {} (pid {}): {}", self.tool, self.id(), e);
        }
        if let Err(e) = self.child.status().await {
            warn!("Failed to reap {} (pid {}): {}", self.tool, self.id(), e);
        }
        self.reaped = true;
    }
}

impl Drop for ToolProcess {
    fn drop(&mut self) {
        if !self.reaped {
            debug!("Dropping live {} (pid {}), killing", self.tool, self.child.id());
        }
    }
}

async fn drain(child: &mut Child) -> std::io::Result<(Vec<u8>, Vec<u8>, ExitStatus)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out, err) = futures::try_join!(read_pipe(stdout), read_pipe(stderr))?;
    let status = child.status().await?;
    Ok((out, err, status))
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
