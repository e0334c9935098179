//! # pagepipe-core
//!
//! Cancellable, parallel document page rendering and image resampling.
//!
//! Heavy work never runs inside the calling process:
//!
//! - **poppler** tools (`pdfinfo`, `pdftoppm`, `pdftocairo`) read metadata
//!   and rasterize pages, several processes per document when asked to
//! - a dedicated **resample worker** binary shrinks each image, so a decoder
//!   that hangs or crashes can simply be killed
//!
//! Every wait is bounded and polls a caller-supplied [`Cancellation`]. A
//! process that is no longer wanted is killed and reaped before control
//! returns to the caller.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagepipe_core::{Cancellation, PageRange, PageRenderer, RenderConfig, ToolConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Four pdftoppm processes, rendering pages 1-12
//!     let renderer = PageRenderer::new(ToolConfig::default(), RenderConfig::with_workers(4))?;
//!     let pages = renderer
//!         .render_pages(Path::new("report.pdf"), PageRange::pages(1, 12), &Cancellation::never())
//!         .await?;
//!
//!     println!("Rendered {} pages", pages.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Previews with Cancellation
//!
//! ```rust,no_run
//! use pagepipe_core::{CancelFlag, PipelineConfig, PreviewPipeline};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = PreviewPipeline::new(PipelineConfig::default())?;
//!     let flag = CancelFlag::new();
//!
//!     // Another task may call flag.cancel() when the user moves on
//!     let batch = pipeline
//!         .load_batch(Path::new("report.pdf"), 1, &flag.handle())
//!         .await?;
//!
//!     println!("Pages {}..{:?} of {}", batch.first_page, batch.last_page(), batch.page_count);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod folder;
pub mod info;
pub mod partition;
pub mod pipeline;
pub mod ppm;
pub mod raster;
pub mod renderer;
pub mod resample;
pub mod tool;

// Re-export main types for convenience
pub use cancel::{CancelFlag, Cancellation};
pub use config::{
    PipelineConfig, PreviewConfig, RenderConfig, RenderStrategy, ResampleAlgorithm,
    ResampleConfig, ToolConfig,
};
pub use error::{PipelineError, Result};
pub use info::{get_document_info, DocumentInfo, InfoValue};
pub use partition::{partition, Chunk, PageRange};
pub use pipeline::{PreviewBatch, PreviewPipeline};
pub use ppm::parse_ppm_stream;
pub use raster::{ColorMode, MaxBounds, RawImageBuffer};
pub use renderer::PageRenderer;
pub use resample::{
    resample_file, resample_image, BatchResampler, ResampleJob, ResampleRequest, ResampleSource,
    ResampleWorker,
};

/// Initialize the library's logging.
/// Call this once at application startup if you want to see logs.
///
/// Output goes to stderr, which keeps stdout free for the worker protocol.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();
}
