//! Batched document previews: metadata, render, resample.

use crate::cancel::Cancellation;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::info::{get_document_info, DocumentInfo};
use crate::partition::PageRange;
use crate::raster::RawImageBuffer;
use crate::renderer::PageRenderer;
use crate::resample::BatchResampler;
use std::path::Path;
use tracing::{debug, info};

/// One batch of preview pages.
#[derive(Debug, Clone)]
pub struct PreviewBatch {
    /// First page in `pages` (1-based).
    pub first_page: u32,
    /// Total pages in the document.
    pub page_count: u32,
    /// Resampled pages, in page order.
    pub pages: Vec<RawImageBuffer>,
}

impl PreviewBatch {
    /// Last page in the batch, or `None` for an empty batch.
    pub fn last_page(&self) -> Option<u32> {
        match self.pages.len() as u32 {
            0 => None,
            n => Some(self.first_page + n - 1),
        }
    }

    /// Whether pages remain after this batch.
    pub fn has_more(&self) -> bool {
        self.last_page().is_some_and(|last| last < self.page_count)
    }
}

/// Renders documents batch by batch for a previewer.
#[derive(Debug, Clone)]
pub struct PreviewPipeline {
    config: PipelineConfig,
    renderer: PageRenderer,
}

impl PreviewPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let renderer = PageRenderer::new(config.tools.clone(), config.render.clone())?;
        Ok(Self { config, renderer })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Full metadata of the document.
    pub async fn document_info(&self, path: &Path) -> Result<DocumentInfo> {
        get_document_info(path, &self.config.tools).await
    }

    pub async fn page_count(&self, path: &Path) -> Result<u32> {
        Ok(self.document_info(path).await?.page_count())
    }

    /// Render and resample up to `batch_size` pages starting at `start_page`.
    ///
    /// A start past the last page gives an empty batch.
    pub async fn load_batch(
        &self,
        path: &Path,
        start_page: u32,
        cancel: &Cancellation,
    ) -> Result<PreviewBatch> {
        let page_count = self.page_count(path).await?;
        let first_page = start_page.max(1);
        if first_page > page_count {
            debug!("Page {} is past the end of {:?}", first_page, path);
            return Ok(PreviewBatch {
                first_page,
                page_count,
                pages: Vec::new(),
            });
        }

        let last_page = first_page
            .saturating_add(self.config.preview.batch_size - 1)
            .min(page_count);
        info!(
            "Loading preview pages {}-{} of {} from {:?}",
            first_page, last_page, page_count, path
        );

        let rendered = self
            .renderer
            .render_pages(path, PageRange::pages(first_page, last_page), cancel)
            .await?;
        let pages = if rendered.is_empty() {
            rendered
        } else {
            BatchResampler::new(&self.config.resample)?
                .resample_batch(rendered, cancel)
                .await?
        };

        Ok(PreviewBatch {
            first_page,
            page_count,
            pages,
        })
    }
}
