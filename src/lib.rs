//! PDF Image Normalizer Library
//!
//! Fits every embedded raster image of a PDF onto a fixed-size canvas:
//! aspect-preserving resample, solid background padding, and reinsertion with
//! the page placement adjusted so the original content keeps its footprint.
//!
//! Images shared by several pages are processed once. Images that cannot be
//! decoded are left untouched and reported; the rest of the document is still
//! normalized.

pub mod canvas;
pub mod codec;
pub mod error;
pub mod filters;
pub mod inspect;
pub mod pipeline;
pub mod reader;
pub mod rewriter;
pub mod transform;

use std::str::FromStr;
use std::time::Duration;

use lopdf::ObjectId;

pub use canvas::{Anchor, CanvasOptions, ScalePolicy};
pub use error::{ErrorKind, NormalizeError, Result};
pub use inspect::{extract_pdf_images_info, ImageInfo, PageImages};
pub use pipeline::Deadline;

/// Canvas size every image is normalized to, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    width: u32,
    height: u32,
}

impl TargetSpec {
    pub const MIN_DIMENSION: u32 = 100;
    pub const MAX_DIMENSION: u32 = 5000;

    pub fn new(width: u32, height: u32) -> Result<Self> {
        let range = Self::MIN_DIMENSION..=Self::MAX_DIMENSION;
        if !range.contains(&width) || !range.contains(&height) {
            return Err(NormalizeError::InvalidTarget {
                width,
                height,
                min: Self::MIN_DIMENSION,
                max: Self::MAX_DIMENSION,
            });
        }
        Ok(TargetSpec { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Default for TargetSpec {
    fn default() -> Self {
        TargetSpec {
            width: 1200,
            height: 1200,
        }
    }
}

/// Stream encoding for normalized images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingPolicy {
    /// JPEG for opaque JPEG sources, Flate for everything else
    #[default]
    MatchSource,
    Lossless,
    Jpeg,
}

impl FromStr for EncodingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "matchsource" | "auto" => Ok(EncodingPolicy::MatchSource),
            "lossless" | "flate" => Ok(EncodingPolicy::Lossless),
            "jpeg" | "jpg" => Ok(EncodingPolicy::Jpeg),
            _ => Err(format!("unknown encoding policy '{}'", s)),
        }
    }
}

/// How a normalized image is placed on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FootprintPolicy {
    /// The whole canvas takes a canvas-proportioned footprint that keeps the
    /// longer edge of the original, centered on it.
    #[default]
    CanvasShaped,
    /// The original pixels keep their exact footprint; padding extends around it.
    PreserveContent,
}

impl FromStr for FootprintPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "preservecontent" | "content" => Ok(FootprintPolicy::PreserveContent),
            "canvasshaped" | "canvas" => Ok(FootprintPolicy::CanvasShaped),
            _ => Err(format!("unknown footprint policy '{}'", s)),
        }
    }
}

/// Options for PDF image normalization
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Canvas size for every image
    pub target: TargetSpec,
    /// Padding color (RGB)
    pub background: [u8; 3],
    pub anchor: Anchor,
    pub scale_policy: ScalePolicy,
    pub footprint: FootprintPolicy,
    pub encoding: EncodingPolicy,
    /// JPEG quality (1-100) when an image is written as JPEG
    pub jpeg_quality: u8,
    /// Compress the content streams that get edited
    pub compress_streams: bool,
    /// Worker threads for decode/resize/encode; 0 uses one per CPU
    pub max_workers: usize,
    /// Wall-clock budget for a run; `None` disables the timeout
    pub budget: Option<Duration>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            target: TargetSpec::default(),
            background: [255, 255, 255],
            anchor: Anchor::Center,
            scale_policy: ScalePolicy::Always,
            footprint: FootprintPolicy::CanvasShaped,
            encoding: EncodingPolicy::MatchSource,
            jpeg_quality: 95,
            compress_streams: true,
            max_workers: 0,
            budget: Some(Duration::from_secs(55)),
        }
    }
}

impl NormalizeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(NormalizeError::InvalidOption(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    pub fn canvas_options(&self) -> CanvasOptions {
        CanvasOptions {
            background: self.background,
            anchor: self.anchor,
            scale_policy: self.scale_policy,
        }
    }
}

/// An image left unmodified, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFailure {
    pub object_id: ObjectId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of PDF normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub total_images: usize,
    pub normalized_images: usize,
    pub skipped_images: usize,
    pub failures: Vec<ImageFailure>,
}

impl NormalizeReport {
    /// Every image was normalized.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.normalized_images == self.total_images
    }

    pub(crate) fn record_failure(&mut self, object_id: ObjectId, err: &NormalizeError) {
        log::warn!(
            "[Pipeline] Leaving image {} {} unchanged: {}",
            object_id.0,
            object_id.1,
            err
        );
        self.skipped_images += 1;
        self.failures.push(ImageFailure {
            object_id,
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// Normalize PDF from bytes and return normalized PDF bytes
///
/// No bytes are returned unless the whole run succeeds; per-image failures
/// are listed in the report.
pub fn normalize_pdf_bytes(
    input_bytes: &[u8],
    options: &NormalizeOptions,
) -> Result<(Vec<u8>, NormalizeReport)> {
    options.validate()?;
    let deadline = Deadline::start(options.budget);

    let mut doc = reader::parse(input_bytes)?;
    let report = pipeline::run_with_deadline(&mut doc, options, &deadline)?;

    deadline.check()?;
    let output_bytes = match pipeline::save(&mut doc) {
        Ok(bytes) => bytes,
        Err(e) => return Err(e.into_pipeline_failure(report)),
    };

    Ok((output_bytes, report))
}

#[cfg(not(target_arch = "wasm32"))]
pub mod file_ops {
    use super::*;
    use std::path::{Path, PathBuf};

    /// `scan.pdf` -> `scan_normalized.pdf`, next to the input.
    pub fn normalized_file_name(input_path: &Path) -> PathBuf {
        let stem = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let file_name = match input_path.extension() {
            Some(ext) => format!("{}_normalized.{}", stem, ext.to_string_lossy()),
            None => format!("{}_normalized", stem),
        };
        input_path.with_file_name(file_name)
    }

    /// Normalize PDF from file path to file path
    ///
    /// The output file is only created when normalization succeeds.
    pub fn normalize_pdf_file(
        input_path: &Path,
        output_path: &Path,
        options: &NormalizeOptions,
    ) -> Result<NormalizeReport> {
        let input_bytes = std::fs::read(input_path)?;
        let (output_bytes, report) = normalize_pdf_bytes(&input_bytes, options)?;
        std::fs::write(output_path, output_bytes)?;
        Ok(report)
    }
}
