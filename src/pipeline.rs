//! Pipeline orchestrator.
//!
//! Fan-out/fan-in over the distinct images of one document: decode, normalize
//! and encode run on a worker pool with no access to the document, then the
//! results are committed one at a time on the calling thread.

use std::time::{Duration, Instant};

use lopdf::{Document, ObjectId};
use rayon::prelude::*;

use crate::canvas::{self, CanvasPlacement};
use crate::codec::{self, EncodedImage, PreferredEncoding};
use crate::error::{NormalizeError, Result};
use crate::reader::{self, ImageCatalog, ImageObject};
use crate::rewriter::Rewriter;
use crate::{NormalizeOptions, NormalizeReport};

/// Wall-clock budget for one run.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn start(budget: Option<Duration>) -> Self {
        Deadline {
            started: Instant::now(),
            budget,
        }
    }

    pub fn unlimited() -> Self {
        Deadline::start(None)
    }

    pub fn expired(&self) -> bool {
        self.budget
            .map(|budget| self.started.elapsed() >= budget)
            .unwrap_or(false)
    }

    /// `Timeout` once the budget is spent.
    pub fn check(&self) -> Result<()> {
        match self.budget {
            Some(budget) if self.started.elapsed() >= budget => Err(NormalizeError::Timeout(budget)),
            _ => Ok(()),
        }
    }
}

/// Output of one worker job.
struct Prepared {
    canvas: CanvasPlacement,
    encoded: EncodedImage,
}

/// Normalize every image in `doc` under the options' budget.
pub fn run(doc: &mut Document, options: &NormalizeOptions) -> Result<NormalizeReport> {
    run_with_deadline(doc, options, &Deadline::start(options.budget))
}

/// Normalize every image in `doc`, sharing a deadline with the caller.
///
/// Per-image decode and encode failures are recorded in the report and leave
/// that image untouched. Rewrite conflicts abort the run as `PipelineFailure`.
/// On `Timeout` the document may be partially rewritten and must be dropped.
pub fn run_with_deadline(
    doc: &mut Document,
    options: &NormalizeOptions,
    deadline: &Deadline,
) -> Result<NormalizeReport> {
    options.validate()?;
    deadline.check()?;

    let catalog = ImageCatalog::scan(doc)?;
    let image_ids = catalog.all_image_objects();
    let mut report = NormalizeReport {
        total_images: image_ids.len(),
        ..NormalizeReport::default()
    };
    log::info!(
        "[Pipeline] {} distinct image(s) on {} page(s)",
        image_ids.len(),
        catalog.page_numbers().count()
    );

    let mut jobs = Vec::with_capacity(image_ids.len());
    for id in image_ids {
        match reader::read_image(doc, id) {
            Ok(image) => jobs.push(image),
            Err(e) if e.kind().is_recoverable() => report.record_failure(id, &e),
            Err(e) => return Err(e.into_pipeline_failure(report)),
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.max_workers)
        .build()
        .map_err(|e| NormalizeError::InvalidOption(format!("Failed to start worker pool: {}", e)))?;

    let results: Vec<(ObjectId, Result<Prepared>)> = pool.install(|| {
        jobs.into_par_iter()
            .map(|image| {
                let id = image.id;
                if let Err(e) = deadline.check() {
                    return (id, Err(e));
                }
                (id, prepare(&image, options))
            })
            .collect()
    });

    deadline.check()?;

    let mut rewriter = Rewriter::new(doc, options.footprint, options.compress_streams);
    for (id, result) in results {
        let prepared = match result {
            Ok(prepared) => prepared,
            Err(e) if e.kind().is_recoverable() => {
                report.record_failure(id, &e);
                continue;
            }
            Err(e @ NormalizeError::Timeout(_)) => return Err(e),
            Err(e) => return Err(e.into_pipeline_failure(report)),
        };

        let placements = catalog.placements_of(id);
        if let Err(e) = rewriter.rewrite(id, &prepared.canvas, &prepared.encoded, &placements) {
            return Err(e.into_pipeline_failure(report));
        }
        report.normalized_images += 1;
    }

    if let Err(e) = rewriter.finish() {
        return Err(e.into_pipeline_failure(report));
    }

    log::info!(
        "[Pipeline] Normalized {} of {} image(s), {} skipped",
        report.normalized_images,
        report.total_images,
        report.skipped_images
    );
    Ok(report)
}

/// Decode, normalize and encode one image. Runs on a worker.
fn prepare(image: &ImageObject, options: &NormalizeOptions) -> Result<Prepared> {
    let decoded = codec::decode(image)?;
    let normalized = canvas::normalize(
        &decoded.pixels,
        options.target.width(),
        options.target.height(),
        &options.canvas_options(),
    )?;
    let preferred = PreferredEncoding::choose(&decoded, options.encoding, options.jpeg_quality);
    let encoded = codec::encode(&normalized, preferred)?;

    log::debug!(
        "[Pipeline] Image {:?}: {}x{} {} -> {}x{} {}",
        image.id,
        image.width,
        image.height,
        image.filter_names().join("+"),
        encoded.width,
        encoded.height,
        preferred.filter_name()
    );

    Ok(Prepared {
        canvas: normalized.placement,
        encoded,
    })
}

/// Serialize a document, keeping its object numbering.
///
/// lopdf writes a fresh cross-reference stream after the highest id and drops
/// the one the document was loaded with.
pub fn save(doc: &mut Document) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| NormalizeError::Serialize(e.to_string()))?;
    Ok(output)
}
