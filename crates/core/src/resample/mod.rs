//! Image resampling in isolated worker processes.
//!
//! - [`ops`]: the actual shrink, run inside a worker
//! - [`protocol`]: request/response framing on the worker pipes
//! - [`worker`]: the worker entry point and the parent-side process handle
//! - [`batch`]: a bounded pool resampling many images in order

pub mod batch;
pub mod ops;
pub mod protocol;
pub mod worker;

pub use batch::{BatchResampler, ProcessResampler, ResampleJob};
pub use ops::{decode_file, thumbnail};
pub use protocol::{ResampleRequest, ResampleResponse, ResampleSource};
pub use worker::{
    locate_worker, resample_file, resample_image, run_worker, ResampleWorker, WORKER_BIN,
};
