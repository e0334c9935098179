//! Page rendering through external rasterizer processes.
//!
//! A page range is split into chunks, one rasterizer process per chunk, all
//! running and read at once. Pages are returned in chunk order. The first
//! chunk to fail stops the render: every process still running is killed
//! and reaped, its output dropped, and that first error is returned.

use crate::cancel::{CancelFlag, Cancellation};
use crate::config::{RenderConfig, RenderStrategy, ToolConfig};
use crate::error::{PipelineError, Result};
use crate::folder::load_images_from_dir;
use crate::partition::{partition, PageRange};
use crate::ppm::parse_ppm_stream;
use crate::raster::RawImageBuffer;
use crate::tool::{RenderJob, ToolOutput, ToolProcess};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Filename prefix for the single-process file-based path.
const SINGLE_PREFIX: &str = "page";

/// Renders document pages to raw RGB buffers with poppler.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    tools: ToolConfig,
    config: RenderConfig,
}

impl PageRenderer {
    /// Create a new page renderer.
    pub fn new(tools: ToolConfig, config: RenderConfig) -> Result<Self> {
        tools.validate()?;
        config.validate()?;
        Ok(Self { tools, config })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Number of rasterizer processes used for `range`.
    ///
    /// A range running to the end of the document has no known size and is
    /// always rendered by one process.
    pub fn worker_count_for(&self, range: PageRange) -> usize {
        match range.page_count() {
            Some(count) => self
                .config
                .effective_workers()
                .min(count as usize)
                .max(1),
            None => 1,
        }
    }

    /// Render `range` of the document at `path`, in page order.
    ///
    /// An empty range (`first > last`) returns an empty list without
    /// starting any process.
    pub async fn render_pages(
        &self,
        path: &Path,
        range: PageRange,
        cancel: &Cancellation,
    ) -> Result<Vec<RawImageBuffer>> {
        if !self.config.enabled {
            return Err(PipelineError::Disabled);
        }
        if range.is_empty() {
            debug!("Empty page range {:?}, nothing to render", range);
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                operation: "Page rendering",
            });
        }

        let start = Instant::now();
        let workers = self.worker_count_for(range);
        info!(
            "Rendering pages {}..={:?} of {:?} with {} {:?} worker(s)",
            range.first(), range.last(), path, workers, self.config.strategy
        );

        let pages = match self.config.strategy {
            RenderStrategy::Streamed => self.render_streamed(path, range, workers, cancel).await?,
            RenderStrategy::FileBased => self.render_file_based(path, range, workers, cancel).await?,
        };

        debug!("Rendered {} pages in {:?}", pages.len(), start.elapsed());
        Ok(pages)
    }

    /// Page sub-ranges, one per process.
    fn chunk_ranges(&self, range: PageRange, workers: usize) -> Vec<(u32, Option<u32>)> {
        match range.page_count() {
            Some(count) if workers > 1 => partition(range.first(), count, workers)
                .into_iter()
                .map(|chunk| (chunk.start_page, Some(chunk.end_page)))
                .collect(),
            _ => vec![(range.first(), range.last())],
        }
    }

    async fn render_streamed(
        &self,
        path: &Path,
        range: PageRange,
        workers: usize,
        cancel: &Cancellation,
    ) -> Result<Vec<RawImageBuffer>> {
        let jobs: Vec<RenderJob> = self
            .chunk_ranges(range, workers)
            .into_iter()
            .map(|(first, last)| {
                RenderJob::stream_pages(path, first, last, self.config.dpi, &self.tools)
            })
            .collect();

        self.run_chunks(jobs, cancel, |_, output| parse_ppm_stream(&output.stdout))
            .await
    }

    async fn render_file_based(
        &self,
        path: &Path,
        range: PageRange,
        workers: usize,
        cancel: &Cancellation,
    ) -> Result<Vec<RawImageBuffer>> {
        // Removed on drop, on every exit path.
        let output_dir = TempDir::with_prefix("pagepipe-render-")?;
        let chunks = self.chunk_ranges(range, workers);
        let prefixes: Vec<String> = if chunks.len() == 1 {
            vec![SINGLE_PREFIX.to_string()]
        } else {
            (0..chunks.len()).map(|i| format!("chunk{}", i)).collect()
        };

        let jobs: Vec<RenderJob> = chunks
            .iter()
            .zip(&prefixes)
            .map(|(&(first, last), prefix)| {
                RenderJob::file_pages(
                    path,
                    first,
                    last,
                    self.config.dpi,
                    &output_dir.path().join(prefix),
                    &self.tools,
                )
            })
            .collect();

        let dir = output_dir.path();
        // The trailing '-' keeps "chunk1" from matching "chunk10-01.png".
        let pages = self
            .run_chunks(jobs, cancel, |index, _| {
                load_images_from_dir(dir, &format!("{}-", prefixes[index]), "png")
            })
            .await;

        if let Err(e) = output_dir.close() {
            debug!("Failed to remove render directory: {}", e);
        }
        pages
    }

    /// Spawn every job and drain them all at once.
    ///
    /// Output is read from every process concurrently, so no chunk stalls
    /// on a full pipe while an earlier one is still being read. Pages come
    /// back in job order regardless of completion order.
    async fn run_chunks<F>(
        &self,
        jobs: Vec<RenderJob>,
        cancel: &Cancellation,
        mut collect: F,
    ) -> Result<Vec<RawImageBuffer>>
    where
        F: FnMut(usize, ToolOutput) -> Result<Vec<RawImageBuffer>>,
    {
        let mut processes = Vec::with_capacity(jobs.len());
        for job in &jobs {
            match job.spawn() {
                Ok(process) => processes.push(process),
                Err(e) => {
                    dispose_all(processes).await;
                    return Err(e);
                }
            }
        }

        // Fired on the first failure: every sibling still running is killed
        // and reaped by its own communicate call.
        let abandon = CancelFlag::new();
        let chunk_cancel = cancel.any(&abandon.handle());
        let chunk_cancel = &chunk_cancel;
        let poll = self.tools.poll_interval;

        let mut running: FuturesUnordered<_> = processes
            .into_iter()
            .enumerate()
            .map(move |(index, mut process)| async move {
                (index, process.communicate(chunk_cancel, poll).await)
            })
            .collect();

        let mut slots: Vec<Option<Vec<RawImageBuffer>>> = jobs.iter().map(|_| None).collect();
        let mut failure: Option<PipelineError> = None;
        while let Some((index, output)) = running.next().await {
            if failure.is_some() {
                // Stopped by the abandon flag, or failed on its own; either
                // way only the first error is reported.
                continue;
            }
            let chunk_pages = output
                .and_then(|output| output.into_success(jobs[index].tool_name()))
                .and_then(|output| collect(index, output));
            match chunk_pages {
                Ok(chunk_pages) => {
                    debug!("Chunk {} produced {} pages", index, chunk_pages.len());
                    slots[index] = Some(chunk_pages);
                }
                Err(e) => {
                    warn!("Chunk {} failed, abandoning the rest: {}", index, e);
                    abandon.cancel();
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(slots.into_iter().flatten().flatten().collect()),
        }
    }
}

async fn dispose_all(processes: Vec<ToolProcess>) {
    for process in processes {
        process.dispose().await;
    }
}
