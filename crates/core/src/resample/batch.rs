//! Batch resampling over a bounded pool of workers.

use super::protocol::{ResampleRequest, ResampleSource};
use super::worker::ResampleWorker;
use crate::cancel::{CancelFlag, Cancellation};
use crate::config::{ResampleAlgorithm, ResampleConfig};
use crate::error::{PipelineError, Result};
use crate::raster::{MaxBounds, RawImageBuffer};
use futures::future::BoxFuture;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A single resample unit run by [`BatchResampler`].
///
/// `Ok(None)` means the job produced nothing; the pool treats that as a
/// lost result unless it was cancelled.
pub trait ResampleJob: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        request: ResampleRequest,
        cancel: &'a Cancellation,
    ) -> BoxFuture<'a, Result<Option<RawImageBuffer>>>;
}

/// Runs each job in its own worker process.
#[derive(Debug, Clone)]
pub struct ProcessResampler {
    worker: ResampleWorker,
}

impl ProcessResampler {
    pub fn new(worker: ResampleWorker) -> Self {
        Self { worker }
    }

    pub fn from_config(config: &ResampleConfig) -> Result<Self> {
        Ok(Self::new(ResampleWorker::from_config(config)?))
    }
}

impl ResampleJob for ProcessResampler {
    fn run<'a>(
        &'a self,
        request: ResampleRequest,
        cancel: &'a Cancellation,
    ) -> BoxFuture<'a, Result<Option<RawImageBuffer>>> {
        Box::pin(async move { self.worker.exchange(&request, cancel).await })
    }
}

/// Resamples a list of images concurrently, returning them in input order.
pub struct BatchResampler<J: ResampleJob = ProcessResampler> {
    job: Arc<J>,
    bounds: MaxBounds,
    algorithm: ResampleAlgorithm,
    thread_budget: usize,
    poll_interval: Duration,
}

impl BatchResampler<ProcessResampler> {
    /// Create a batch resampler backed by worker processes.
    pub fn new(config: &ResampleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_job(ProcessResampler::from_config(config)?, config))
    }
}

impl<J: ResampleJob> BatchResampler<J> {
    /// Create a batch resampler around any job implementation.
    pub fn with_job(job: J, config: &ResampleConfig) -> Self {
        Self {
            job: Arc::new(job),
            bounds: config.bounds(),
            algorithm: config.algorithm,
            thread_budget: config.thread_budget,
            poll_interval: config.poll_interval,
        }
    }

    /// Number of concurrent jobs for a batch of `batch_len` images.
    pub fn pool_size(&self, batch_len: usize) -> usize {
        let cpus = num_cpus::get();
        let budget = if self.thread_budget == 0 {
            cpus
        } else {
            self.thread_budget
        };
        batch_len.min(budget).min(cpus).max(1)
    }

    /// Resample every image to the configured bounds.
    ///
    /// `output[i]` always corresponds to `images[i]`. Cancellation, a job
    /// error or a missing result fails the whole batch; in every case all
    /// running jobs have finished (and their workers are reaped) by the
    /// time this returns.
    pub async fn resample_batch(
        &self,
        images: Vec<RawImageBuffer>,
        cancel: &Cancellation,
    ) -> Result<Vec<RawImageBuffer>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                operation: "Image resampling",
            });
        }

        let start = Instant::now();
        let total = images.len();
        let pool_size = self.pool_size(total);
        info!("Resampling {} images with {} workers", total, pool_size);

        let images = tokio::task::spawn_blocking(move || {
            images
                .into_par_iter()
                .map(RawImageBuffer::depalette)
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| PipelineError::ChannelError(format!("normalise task failed: {}", e)))?;

        let semaphore = Arc::new(Semaphore::new(pool_size));
        let shutdown = CancelFlag::new();
        let job_cancel = cancel.any(&shutdown.handle());

        let mut tasks = JoinSet::new();
        for (index, image) in images.into_iter().enumerate() {
            let job = Arc::clone(&self.job);
            let semaphore = Arc::clone(&semaphore);
            let cancel = job_cancel.clone();
            let request =
                ResampleRequest::new(ResampleSource::Pixels(image), self.bounds, self.algorithm);
            tasks.spawn(async move {
                // A closed semaphore or a fired flag means the pool is
                // shutting down; jobs that never started just report back.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Ok(None));
                };
                if cancel.is_cancelled() {
                    return (index, Ok(None));
                }
                (index, job.run(request, &cancel).await)
            });
        }

        let mut slots: Vec<Option<RawImageBuffer>> = vec![None; total];
        let failure = loop {
            if cancel.is_cancelled() {
                break Some(PipelineError::Cancelled {
                    operation: "Image resampling",
                });
            }
            match tokio::time::timeout(self.poll_interval, tasks.join_next()).await {
                Err(_) => continue,
                Ok(None) => break None,
                Ok(Some(Ok((index, Ok(Some(image)))))) => slots[index] = Some(image),
                Ok(Some(Ok((index, Ok(None))))) => {
                    debug!("Resample job {} returned no image", index);
                }
                Ok(Some(Ok((index, Err(e))))) => {
                    warn!("Resample job {} failed: {}", index, e);
                    break Some(e);
                }
                Ok(Some(Err(e))) => {
                    break Some(PipelineError::ChannelError(format!(
                        "resample task failed: {}",
                        e
                    )));
                }
            }
        };

        if let Some(e) = failure {
            shutdown.cancel();
            semaphore.close();
            let mut abandoned = 0;
            while tasks.join_next().await.is_some() {
                abandoned += 1;
            }
            debug!("Pool shut down, {} outstanding jobs drained", abandoned);
            return Err(e);
        }

        let missing = slots.iter().filter(|slot| slot.is_none()).count();
        if missing > 0 && cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                operation: "Image resampling",
            });
        }
        if missing > 0 {
            return Err(PipelineError::IncompleteBatch { missing, total });
        }

        debug!("Resampled {} images in {:?}", total, start.elapsed());
        Ok(slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ColorMode;
    use crate::resample::ops::thumbnail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rgb(width: u32, height: u32) -> RawImageBuffer {
        RawImageBuffer::new(
            vec![0; width as usize * height as usize * 3],
            ColorMode::Rgb,
            width,
            height,
        )
        .unwrap()
    }

    fn pixels(request: ResampleRequest) -> RawImageBuffer {
        match request.source {
            ResampleSource::Pixels(image) => image,
            ResampleSource::File(path) => panic!("unexpected file source {:?}", path),
        }
    }

    fn config(budget: usize) -> ResampleConfig {
        ResampleConfig::with_bounds(1000, 1000)
            .thread_budget(budget)
            .poll_interval(Duration::from_millis(10))
    }

    /// Returns the image unchanged after a delay shrinking with its width,
    /// so wider images finish first.
    struct ReverseJob {
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ReverseJob {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl ResampleJob for ReverseJob {
        fn run<'a>(
            &'a self,
            request: ResampleRequest,
            _cancel: &'a Cancellation,
        ) -> BoxFuture<'a, Result<Option<RawImageBuffer>>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                let image = pixels(request);
                let delay = 20 * (10 - image.width() as u64);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(image))
            })
        }
    }

    /// Runs until cancelled, counting how many jobs stopped.
    struct HangingJob {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl ResampleJob for HangingJob {
        fn run<'a>(
            &'a self,
            _request: ResampleRequest,
            cancel: &'a Cancellation,
        ) -> BoxFuture<'a, Result<Option<RawImageBuffer>>> {
            Box::pin(async move {
                self.started.fetch_add(1, Ordering::SeqCst);
                while !cancel.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                self.stopped.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
        }
    }

    /// Real in-process resampling; drops the image with height 13.
    struct LossyJob;

    impl ResampleJob for LossyJob {
        fn run<'a>(
            &'a self,
            request: ResampleRequest,
            _cancel: &'a Cancellation,
        ) -> BoxFuture<'a, Result<Option<RawImageBuffer>>> {
            Box::pin(async move {
                let (bounds, algorithm) = (request.bounds, request.algorithm);
                let image = pixels(request);
                if image.height() == 13 {
                    return Ok(None);
                }
                thumbnail(image, bounds, algorithm).map(Some)
            })
        }
    }

    struct FailingJob;

    impl ResampleJob for FailingJob {
        fn run<'a>(
            &'a self,
            _request: ResampleRequest,
            _cancel: &'a Cancellation,
        ) -> BoxFuture<'a, Result<Option<RawImageBuffer>>> {
            Box::pin(async { Err(PipelineError::ResampleFailed("decoder crashed".to_string())) })
        }
    }

    // ========== ordering tests ==========

    #[tokio::test]
    async fn test_output_follows_input_order() {
        let batch = BatchResampler::with_job(ReverseJob::new(), &config(5));
        let images: Vec<_> = (1..=5).map(|w| rgb(w, 10 + w)).collect();

        let out = batch.resample_batch(images, &Cancellation::never()).await.unwrap();
        let dims: Vec<(u32, u32)> = out.iter().map(|i| i.dimensions()).collect();
        assert_eq!(dims, vec![(1, 11), (2, 12), (3, 13), (4, 14), (5, 15)]);
    }

    #[tokio::test]
    async fn test_pool_width_respects_budget() {
        let batch = BatchResampler::with_job(ReverseJob::new(), &config(2));
        let images: Vec<_> = (1..=6).map(|w| rgb(w, 1)).collect();

        batch.resample_batch(images, &Cancellation::never()).await.unwrap();
        assert_eq!(batch.job.calls.load(Ordering::SeqCst), 6);
        assert!(batch.job.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_pool_size_formula() {
        let cpus = num_cpus::get();
        let batch = BatchResampler::with_job(ReverseJob::new(), &config(3));
        assert_eq!(batch.pool_size(1), 1);
        assert_eq!(batch.pool_size(10), 3.min(cpus));

        let unbounded = BatchResampler::with_job(ReverseJob::new(), &config(0));
        assert_eq!(unbounded.pool_size(1000), cpus);
    }

    // ========== empty and cancelled tests ==========

    #[tokio::test]
    async fn test_empty_batch_runs_nothing() {
        let batch = BatchResampler::with_job(ReverseJob::new(), &config(4));
        let out = batch.resample_batch(Vec::new(), &Cancellation::never()).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(batch.job.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_fast() {
        let batch = BatchResampler::with_job(ReverseJob::new(), &config(4));
        let result = batch
            .resample_batch(vec![rgb(2, 2)], &Cancellation::from_fn(|| true))
            .await;
        assert!(matches!(result, Err(PipelineError::Cancelled { .. })));
        assert_eq!(batch.job.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_stops_every_job() {
        let job = HangingJob {
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        };
        let batch = BatchResampler::with_job(job, &config(2));
        let flag = CancelFlag::new();
        let trigger = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        let images: Vec<_> = (1..=5).map(|w| rgb(w, 1)).collect();
        let result = batch.resample_batch(images, &flag.handle()).await;

        assert!(matches!(result, Err(PipelineError::Cancelled { .. })));
        let started = batch.job.started.load(Ordering::SeqCst);
        assert!(started >= 1 && started <= 2);
        assert_eq!(batch.job.stopped.load(Ordering::SeqCst), started);
    }

    // ========== failure tests ==========

    #[tokio::test]
    async fn test_lost_result_is_incomplete_batch() {
        let batch = BatchResampler::with_job(LossyJob, &config(3));
        let images = vec![rgb(4, 4), rgb(5, 13), rgb(6, 6)];
        match batch.resample_batch(images, &Cancellation::never()).await {
            Err(PipelineError::IncompleteBatch { missing, total }) => {
                assert_eq!((missing, total), (1, 3));
            }
            other => panic!("Expected IncompleteBatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_job_error_propagates() {
        let batch = BatchResampler::with_job(FailingJob, &config(2));
        let result = batch
            .resample_batch(vec![rgb(1, 1), rgb(2, 2)], &Cancellation::never())
            .await;
        assert!(matches!(result, Err(PipelineError::ResampleFailed(_))));
    }

    #[tokio::test]
    async fn test_indexed_images_reach_jobs_as_rgba() {
        let palette = vec![[9, 8, 7, 255]];
        let image = RawImageBuffer::indexed(vec![0; 4], ColorMode::P, 2, 2, palette).unwrap();
        let batch = BatchResampler::with_job(LossyJob, &config(1));

        let out = batch.resample_batch(vec![image], &Cancellation::never()).await.unwrap();
        assert_eq!(out[0].mode(), ColorMode::Rgba);
        assert_eq!(&out[0].pixels()[..4], &[9, 8, 7, 255]);
    }
}
