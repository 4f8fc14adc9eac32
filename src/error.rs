//! Error types for PDF image normalization.

use std::fmt;
use std::time::Duration;

use lopdf::ObjectId;
use thiserror::Error;

use crate::NormalizeReport;

/// Result type alias for normalization operations.
pub type Result<T> = std::result::Result<T, NormalizeError>;

/// Machine-distinguishable failure kind, stable across message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidTarget,
    InvalidOption,
    MalformedDocument,
    UnsupportedEncoding,
    InvalidSourceImage,
    RewriteConflict,
    Serialize,
    PipelineFailure,
    Timeout,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTarget => "invalid_target",
            ErrorKind::InvalidOption => "invalid_option",
            ErrorKind::MalformedDocument => "malformed_document",
            ErrorKind::UnsupportedEncoding => "unsupported_encoding",
            ErrorKind::InvalidSourceImage => "invalid_source_image",
            ErrorKind::RewriteConflict => "rewrite_conflict",
            ErrorKind::Serialize => "serialize",
            ErrorKind::PipelineFailure => "pipeline_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
        }
    }

    /// Per-image kinds are recovered locally; everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnsupportedEncoding | ErrorKind::InvalidSourceImage
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for PDF normalization operations
#[derive(Error, Debug)]
pub enum NormalizeError {
    /// Requested canvas size is outside the accepted range.
    #[error("Target size {width}x{height} is outside the allowed range {min}-{max}")]
    InvalidTarget {
        width: u32,
        height: u32,
        min: u32,
        max: u32,
    },

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Input is not a parsable PDF, even after xref reconstruction.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// An image's sample encoding, filter or color space cannot be decoded.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// A decoded image has degenerate dimensions or inconsistent sample data.
    #[error("Invalid source image: {0}")]
    InvalidSourceImage(String),

    /// A shared object cannot be updated without corrupting another reference.
    #[error("Rewrite conflict on object {} {}: {reason}", .object_id.0, .object_id.1)]
    RewriteConflict { object_id: ObjectId, reason: String },

    #[error("Failed to serialize PDF: {0}")]
    Serialize(String),

    /// A fatal condition raised mid-run, with what had been processed so far.
    #[error("Pipeline failed after {} of {} image(s): {cause}", .report.normalized_images, .report.total_images)]
    PipelineFailure {
        cause: Box<NormalizeError>,
        report: NormalizeReport,
    },

    #[error("Processing exceeded the wall-clock budget of {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NormalizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NormalizeError::InvalidTarget { .. } => ErrorKind::InvalidTarget,
            NormalizeError::InvalidOption(_) => ErrorKind::InvalidOption,
            NormalizeError::MalformedDocument(_) => ErrorKind::MalformedDocument,
            NormalizeError::UnsupportedEncoding(_) => ErrorKind::UnsupportedEncoding,
            NormalizeError::InvalidSourceImage(_) => ErrorKind::InvalidSourceImage,
            NormalizeError::RewriteConflict { .. } => ErrorKind::RewriteConflict,
            NormalizeError::Serialize(_) => ErrorKind::Serialize,
            NormalizeError::PipelineFailure { .. } => ErrorKind::PipelineFailure,
            NormalizeError::Timeout(_) => ErrorKind::Timeout,
            NormalizeError::Io(_) => ErrorKind::Io,
        }
    }

    /// Kind of the underlying condition, looking through `PipelineFailure`.
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            NormalizeError::PipelineFailure { cause, .. } => cause.root_kind(),
            other => other.kind(),
        }
    }

    /// Partial results carried by a `PipelineFailure`.
    pub fn partial_report(&self) -> Option<&NormalizeReport> {
        match self {
            NormalizeError::PipelineFailure { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Attach the report gathered so far to a fatal error.
    pub(crate) fn into_pipeline_failure(self, report: NormalizeReport) -> Self {
        match self {
            err @ NormalizeError::PipelineFailure { .. } => err,
            cause => NormalizeError::PipelineFailure {
                cause: Box::new(cause),
                report,
            },
        }
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        NormalizeError::UnsupportedEncoding(msg.into())
    }

    pub(crate) fn invalid_source(msg: impl Into<String>) -> Self {
        NormalizeError::InvalidSourceImage(msg.into())
    }

    pub(crate) fn conflict(object_id: ObjectId, reason: impl Into<String>) -> Self {
        NormalizeError::RewriteConflict {
            object_id,
            reason: reason.into(),
        }
    }
}

impl From<lopdf::Error> for NormalizeError {
    fn from(err: lopdf::Error) -> Self {
        NormalizeError::MalformedDocument(err.to_string())
    }
}
