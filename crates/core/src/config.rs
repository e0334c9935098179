//! Configuration types for page rendering and resampling.

use crate::error::{PipelineError, Result};
use crate::raster::MaxBounds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How pages are pulled out of the rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStrategy {
    /// `pdftoppm` writes a concatenated PPM stream to stdout.
    #[default]
    Streamed,
    /// `pdftocairo` writes one PNG per page into a temporary directory.
    FileBased,
}

/// Resampling filter used when shrinking an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResampleAlgorithm {
    #[default]
    Nearest,
    Lanczos,
    Bilinear,
    Bicubic,
    Box,
    Hamming,
}

impl ResampleAlgorithm {
    /// Parse a filter name. Unknown names fall back to nearest-neighbour.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "lanczos" => Self::Lanczos,
            "bilinear" => Self::Bilinear,
            "bicubic" => Self::Bicubic,
            "box" => Self::Box,
            "hamming" => Self::Hamming,
            _ => Self::Nearest,
        }
    }

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Lanczos => "lanczos",
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Box => "box",
            Self::Hamming => "hamming",
        }
    }
}

impl From<String> for ResampleAlgorithm {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ResampleAlgorithm> for String {
    fn from(algorithm: ResampleAlgorithm) -> Self {
        algorithm.name().to_string()
    }
}

/// Location and time budgets of the external poppler tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Directory holding the poppler binaries.
    /// `None`, `""` and `"PATH"` all mean the system search path.
    pub tool_dir: Option<PathBuf>,

    /// Hard timeout for the info tool.
    /// Default: 5 seconds.
    pub info_timeout: Duration,

    /// Hard timeout for each rasterizer invocation.
    /// Default: 15 seconds.
    pub render_timeout: Duration,

    /// How often a waiting call re-checks cancellation.
    /// Default: 200 milliseconds.
    pub poll_interval: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tool_dir: None,
            info_timeout: Duration::from_secs(5),
            render_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl ToolConfig {
    /// Create a tool config rooted at an installation directory.
    pub fn with_tool_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            tool_dir: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Set the info tool timeout.
    pub fn info_timeout(mut self, timeout: Duration) -> Self {
        self.info_timeout = timeout;
        self
    }

    /// Set the rasterizer timeout.
    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    /// Set the cancellation poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The tool directory with the "use PATH" spellings folded to `None`.
    pub fn resolved_tool_dir(&self) -> Option<&Path> {
        match self.tool_dir.as_deref() {
            None => None,
            Some(dir) if dir.as_os_str().is_empty() || dir == Path::new("PATH") => None,
            Some(dir) => Some(dir),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.info_timeout.is_zero() || self.render_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "tool timeouts must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "poll_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for page rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Whether rendering is allowed at all.
    /// Default: true.
    pub enabled: bool,

    /// Render resolution passed to the rasterizer.
    /// Default: 200.
    pub dpi: u32,

    /// Rasterizer strategy.
    /// Default: streamed.
    pub strategy: RenderStrategy,

    /// Number of concurrent rasterizer processes. 0 means one per CPU.
    /// Default: 1.
    pub worker_count: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dpi: 200,
            strategy: RenderStrategy::Streamed,
            worker_count: 1,
        }
    }
}

impl RenderConfig {
    /// Create a render config with a worker count.
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }

    /// Set the rasterizer strategy.
    pub fn strategy(mut self, strategy: RenderStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the render resolution.
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    /// Enable or disable rendering.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Worker count with 0 expanded to the CPU count.
    pub fn effective_workers(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dpi == 0 || self.dpi > 1200 {
            return Err(PipelineError::InvalidConfig(
                "dpi must be between 1 and 1200".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for image resampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    /// Largest width an output image may have.
    /// Default: 4000.
    pub max_width: u32,

    /// Largest height an output image may have.
    /// Default: 4000.
    pub max_height: u32,

    /// Filter used for shrinking.
    /// Default: nearest.
    pub algorithm: ResampleAlgorithm,

    /// Upper bound on concurrent resample workers. 0 means one per CPU.
    /// Default: 1.
    pub thread_budget: usize,

    /// Explicit path to the resample worker binary.
    pub worker_path: Option<PathBuf>,

    /// How often a waiting call re-checks cancellation.
    /// Default: 200 milliseconds.
    pub poll_interval: Duration,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            max_width: 4000,
            max_height: 4000,
            algorithm: ResampleAlgorithm::Nearest,
            thread_budget: 1,
            worker_path: None,
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl ResampleConfig {
    /// Create a resample config with target bounds.
    pub fn with_bounds(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
            ..Default::default()
        }
    }

    /// Set the resampling filter.
    pub fn algorithm(mut self, algorithm: ResampleAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the concurrent worker budget.
    pub fn thread_budget(mut self, budget: usize) -> Self {
        self.thread_budget = budget;
        self
    }

    /// Set the worker binary path.
    pub fn worker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(path.into());
        self
    }

    /// Set the cancellation poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Target bounds as a [`MaxBounds`].
    pub fn bounds(&self) -> MaxBounds {
        MaxBounds::new(self.max_width, self.max_height)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_width and max_height must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "poll_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for batched document previews.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Pages rendered per batch.
    /// Default: 2.
    pub batch_size: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { batch_size: 2 }
    }
}

/// Combined configuration for the whole pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tools: ToolConfig,
    pub render: RenderConfig,
    pub resample: ResampleConfig,
    pub preview: PreviewConfig,
}

impl PipelineConfig {
    /// Parse a JSON document. Missing sections and fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> Result<()> {
        self.tools.validate()?;
        self.render.validate()?;
        self.resample.validate()?;
        if self.preview.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
