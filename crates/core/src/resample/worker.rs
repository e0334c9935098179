//! One resample job in its own process.
//!
//! The parent spawns `pagepipe-resample-worker`, writes one request frame to
//! its stdin and waits for one response frame on its stdout. The pipe I/O
//! runs on a separate task that reports through a one-shot channel, so the
//! parent's wait is a plain bounded poll that can give up at any tick.
//! Whatever happens, the worker is killed if still running and reaped before
//! the call returns.

use super::ops::{decode_file, thumbnail};
use super::protocol::{ResampleRequest, ResampleResponse, ResampleSource};
use crate::cancel::Cancellation;
use crate::config::ResampleConfig;
use crate::error::{PipelineError, Result};
use crate::raster::RawImageBuffer;
use async_process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use futures::io::{AsyncWriteExt, BufReader};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// File name of the worker binary, without platform suffix.
pub const WORKER_BIN: &str = "pagepipe-resample-worker";

/// How long a worker that already answered gets to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

/// Serve a single request from `input` and write the response to `output`.
///
/// Decode and resample failures are sent back as an error response. Only a
/// broken pipe or an unreadable request fails the worker itself. An empty
/// input is a parent that gave up before sending anything.
pub fn run_worker<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<()> {
    let Some(request) = ResampleRequest::read_from(&mut input)? else {
        debug!("No request received, exiting");
        return Ok(());
    };

    let response = match process_request(request) {
        Ok(image) => ResampleResponse::Image(image),
        Err(e) => ResampleResponse::Error(e.to_string()),
    };
    output.write_all(&response.encode()?)?;
    output.flush()?;
    Ok(())
}

/// Decode (for file sources), normalise and shrink.
pub fn process_request(request: ResampleRequest) -> Result<RawImageBuffer> {
    let image = match request.source {
        ResampleSource::Pixels(image) => image,
        ResampleSource::File(path) => decode_file(&path)?,
    };
    thumbnail(image, request.bounds, request.algorithm)
}

// ---------------------------------------------------------------------------
// Parent side
// ---------------------------------------------------------------------------

/// Find the worker binary.
///
/// Order: the configured path, the directory of the current executable (and
/// its parent, which covers test binaries under `target/*/deps`), then `PATH`.
pub fn locate_worker(config: &ResampleConfig) -> Result<PathBuf> {
    if let Some(path) = &config.worker_path {
        return Ok(path.clone());
    }

    let name = format!("{}{}", WORKER_BIN, std::env::consts::EXE_SUFFIX);
    if let Ok(exe) = std::env::current_exe() {
        for dir in exe.ancestors().skip(1).take(2) {
            let candidate = dir.join(&name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    which::which(&name).map_err(|_| PipelineError::ToolNotFound { tool: name })
}

/// Spawns resample worker processes.
#[derive(Debug, Clone)]
pub struct ResampleWorker {
    program: PathBuf,
    poll_interval: Duration,
}

enum Outcome {
    Received(Exchange),
    Cancelled,
}

impl ResampleWorker {
    pub fn new(program: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            program: program.into(),
            poll_interval,
        }
    }

    /// Locate the worker binary per [`locate_worker`].
    pub fn from_config(config: &ResampleConfig) -> Result<Self> {
        Ok(Self::new(locate_worker(config)?, config.poll_interval))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `request` in a fresh worker.
    ///
    /// `None` means no resampled image is available: the caller was
    /// cancelled, the pipe broke, or the worker could not start or reported
    /// an error. The caller is expected to fall back to the source image.
    pub async fn resample(
        &self,
        request: &ResampleRequest,
        cancel: &Cancellation,
    ) -> Option<RawImageBuffer> {
        match self.exchange(request, cancel).await {
            Ok(image) => image,
            Err(e) => {
                warn!("Resample worker failed: {}", e);
                None
            }
        }
    }

    /// Like [`resample`](Self::resample), but keeps errors reported by the
    /// worker and spawn failures. Cancellation and pipe failures are still
    /// `Ok(None)`.
    pub async fn exchange(
        &self,
        request: &ResampleRequest,
        cancel: &Cancellation,
    ) -> Result<Option<RawImageBuffer>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let frame = request.encode()?;

        let mut process = self.spawn()?;
        let stdin = process.child.stdin.take();
        let stdout = process.child.stdout.take();

        let (tx, rx) = async_channel::bounded(1);
        let io_task = tokio::spawn(async move {
            let result = talk(stdin, stdout, frame).await;
            // The receiver is gone when the parent already gave up.
            let _ = tx.send(result).await;
        });

        let outcome = loop {
            if cancel.is_cancelled() {
                break Outcome::Cancelled;
            }
            match tokio::time::timeout(self.poll_interval, receive(&rx)).await {
                Ok(received) => break Outcome::Received(received),
                Err(_) => continue,
            }
        };
        rx.close();
        io_task.abort();

        match outcome {
            Outcome::Received(Ok(Some(ResampleResponse::Image(image)))) => {
                process.finish().await;
                Ok(Some(image))
            }
            Outcome::Received(Ok(Some(ResampleResponse::Error(message)))) => {
                process.finish().await;
                Err(PipelineError::ResampleFailed(message))
            }
            Outcome::Received(Ok(None)) => {
                debug!("Worker (pid {}) exited without a response", process.id());
                process.kill_and_reap().await;
                Ok(None)
            }
            Outcome::Received(Err(e)) => {
                debug!("Worker (pid {}) channel failed: {}", process.id(), e);
                process.kill_and_reap().await;
                Ok(None)
            }
            Outcome::Cancelled => {
                debug!("Resample cancelled, killing worker (pid {})", process.id());
                process.kill_and_reap().await;
                Ok(None)
            }
        }
    }

    fn spawn(&self) -> Result<WorkerProcess> {
        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        #[cfg(windows)]
        {
            use async_process::windows::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::ToolNotFound {
                    tool: self.program.display().to_string(),
                }
            } else {
                PipelineError::ProcessStartFailed(e)
            }
        })?;
        debug!("Spawned resample worker (pid {})", child.id());
        Ok(WorkerProcess {
            child,
            reaped: false,
        })
    }
}

type Exchange = Result<Option<ResampleResponse>>;

/// Next result from the I/O task. A closed channel is a `ChannelError`.
async fn receive(rx: &async_channel::Receiver<Exchange>) -> Exchange {
    rx.recv().await?
}

/// Write the request, close stdin, read the response.
async fn talk(
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    frame: Vec<u8>,
) -> Result<Option<ResampleResponse>> {
    let (Some(mut stdin), Some(stdout)) = (stdin, stdout) else {
        return Err(PipelineError::ChannelError(
            "worker pipes unavailable".to_string(),
        ));
    };
    stdin.write_all(&frame).await?;
    stdin.close().await?;
    drop(stdin);

    let mut reader = BufReader::new(stdout);
    ResampleResponse::read_from_async(&mut reader).await
}

struct WorkerProcess {
    child: Child,
    reaped: bool,
}

impl WorkerProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    /// Wait briefly for a worker that has answered, then kill it.
    async fn finish(&mut self) {
        match tokio::time::timeout(EXIT_GRACE, self.child.status()).await {
            Ok(Ok(status)) => {
                debug!("Worker (pid {}) exited with {}", self.id(), status);
                self.reaped = true;
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for worker (pid {}): {}", self.id(), e);
                self.kill_and_reap().await;
            }
            Err(_) => {
                debug!("Worker (pid {}) lingering after response", self.id());
                self.kill_and_reap().await;
            }
        }
    }

    async fn kill_and_reap(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.child.kill() {
            debug!("kill worker (pid {}): {}", self.id(), e);
        }
        if let Err(e) = self.child.status().await {
            warn!("Failed to reap worker (pid {}): {}", self.id(), e);
        }
        self.reaped = true;
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if !self.reaped {
            debug!("Dropping live worker (pid {}), killing", self.child.id());
        }
    }
}

/// Resample `source` to the configured bounds in an isolated worker.
///
/// Returns `None` on cancellation or any worker failure, after logging it.
pub async fn resample_image(
    source: ResampleSource,
    config: &ResampleConfig,
    cancel: &Cancellation,
) -> Option<RawImageBuffer> {
    let worker = match ResampleWorker::from_config(config) {
        Ok(worker) => worker,
        Err(e) => {
            warn!("Resample worker unavailable: {}", e);
            return None;
        }
    };
    let request = ResampleRequest::new(source, config.bounds(), config.algorithm);
    worker.resample(&request, cancel).await
}

/// [`resample_image`] for an image file the worker decodes itself.
pub async fn resample_file(
    path: &Path,
    config: &ResampleConfig,
    cancel: &Cancellation,
) -> Option<RawImageBuffer> {
    resample_image(ResampleSource::File(path.to_path_buf()), config, cancel).await
}
