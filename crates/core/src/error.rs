//! Error types for the render and resample pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the pagepipe library.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// External tool binary could not be found.
    #[error("External tool '{tool}' not found. Install poppler or set the tool directory")]
    ToolNotFound { tool: String },

    /// A process failed to start for a reason other than a missing binary.
    #[error("Failed to start process: {0}")]
    ProcessStartFailed(#[source] std::io::Error),

    /// External tool exited with a non-zero status.
    #[error("'{tool}' failed with exit code {code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    /// External tool exceeded its wall-clock budget and was killed.
    #[error("'{tool}' timed out after {timeout_secs} seconds")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    /// The info tool succeeded but reported no page count.
    #[error("Unable to get page count: {stderr}")]
    MissingPageCount { stderr: String },

    /// A concatenated image stream did not match the expected framing.
    #[error("Malformed image stream at byte offset {offset}: {dump}")]
    MalformedStream { offset: usize, dump: String },

    /// The caller's cancellation handle fired during an operation with no partial result.
    #[error("{operation} was cancelled")]
    Cancelled { operation: &'static str },

    /// A worker pool finished without a result for every submitted job.
    #[error("Failed to collect all resample results: {missing} of {total} missing")]
    IncompleteBatch { missing: usize, total: usize },

    /// Pixel data does not match the declared shape.
    #[error("Invalid image buffer: {0}")]
    InvalidImage(String),

    /// Decoding an image file failed.
    #[error("Failed to decode image '{path}': {message}")]
    ImageDecode { path: PathBuf, message: String },

    /// Resampling failed inside a worker.
    #[error("Resample failed: {0}")]
    ResampleFailed(String),

    /// The worker pipe carried something other than a valid frame.
    #[error("Worker protocol error: {0}")]
    WorkerProtocol(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Channel communication error.
    #[error("Internal channel error: {0}")]
    ChannelError(String),

    /// The renderer is switched off in configuration.
    #[error("Page rendering is disabled")]
    Disabled,
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Whether this error is a forced termination of an external process.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::ToolTimeout { .. })
    }

    /// Whether this error came from the cancellation handle.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }
}

impl From<async_channel::RecvError> for PipelineError {
    fn from(_: async_channel::RecvError) -> Self {
        PipelineError::ChannelError("Channel closed".to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::WorkerProtocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_tool_not_found() {
        let err = PipelineError::ToolNotFound {
            tool: "pdftoppm".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("pdftoppm"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_error_display_tool_failed() {
        let err = PipelineError::ToolFailed {
            tool: "pdfinfo".to_string(),
            code: Some(1),
            stderr: "Syntax Error: Couldn't find trailer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("pdfinfo"));
        assert!(msg.contains("Some(1)"));
        assert!(msg.contains("trailer"));
    }

    #[test]
    fn test_error_display_timeout() {
        let err = PipelineError::ToolTimeout {
            tool: "pdftoppm".to_string(),
            timeout_secs: 15,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("15 seconds"));
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_error_display_malformed_stream() {
        let err = PipelineError::MalformedStream {
            offset: 1024,
            dump: "50 35 0a".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1024"));
        assert!(msg.contains("50 35 0a"));
    }

    #[test]
    fn test_error_display_cancelled() {
        let err = PipelineError::Cancelled {
            operation: "PDF page resampling",
        };
        assert_eq!(format!("{}", err), "PDF page resampling was cancelled");
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_error_display_incomplete_batch() {
        let err = PipelineError::IncompleteBatch {
            missing: 2,
            total: 5,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("2 of 5"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PipelineError = io_err.into();
        match err {
            PipelineError::Io(_) => (),
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn test_error_from_recv_error() {
        let recv_err = async_channel::RecvError;
        let err: PipelineError = recv_err.into();
        match err {
            PipelineError::ChannelError(msg) => {
                assert!(msg.contains("closed"));
            }
            _ => panic!("Expected ChannelError"),
        }
    }

    #[test]
    fn test_error_from_json_error() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: PipelineError = json_err.into();
        assert!(matches!(err, PipelineError::WorkerProtocol(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);

        fn returns_error() -> Result<i32> {
            Err(PipelineError::Disabled)
        }
        assert!(returns_error().is_err());
    }
}
