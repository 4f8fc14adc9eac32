//! PDF object rewriter.
//!
//! Swaps normalized samples into image XObjects in place and wraps every
//! `Do` that draws a rewritten image in `q <M> cm ... Q` so the new canvas
//! lands where the page expects it. Object ids and order are never touched.

use std::collections::{BTreeMap, HashSet};

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};

use crate::canvas::CanvasPlacement;
use crate::codec::EncodedImage;
use crate::error::{NormalizeError, Result};
use crate::filters;
use crate::reader::Placement;
use crate::transform::Transform;
use crate::FootprintPolicy;

/// Entries that describe the old samples and must not survive the swap.
const STALE_IMAGE_KEYS: &[&[u8]] = &[
    b"DecodeParms",
    b"Decode",
    b"SMask",
    b"Mask",
    b"SMaskInData",
    b"ImageMask",
];

/// Matrices closer than this are the same placement adjustment.
const MATRIX_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone)]
struct SiteEdit {
    image_id: ObjectId,
    name: Vec<u8>,
    matrix: Transform,
}

/// Commits normalized images into a document, one at a time.
///
/// Image streams are replaced as `rewrite` is called; content stream edits
/// are collected and applied together by `finish`.
pub struct Rewriter<'a> {
    doc: &'a mut Document,
    footprint: FootprintPolicy,
    compress_streams: bool,
    rewritten: HashSet<ObjectId>,
    edits: BTreeMap<ObjectId, BTreeMap<usize, SiteEdit>>,
}

impl<'a> Rewriter<'a> {
    pub fn new(doc: &'a mut Document, footprint: FootprintPolicy, compress_streams: bool) -> Self {
        Rewriter {
            doc,
            footprint,
            compress_streams,
            rewritten: HashSet::new(),
            edits: BTreeMap::new(),
        }
    }

    /// Replace one image's samples and queue an adjustment for each of its placements.
    pub fn rewrite(
        &mut self,
        image_id: ObjectId,
        canvas: &CanvasPlacement,
        encoded: &EncodedImage,
        placements: &[&Placement],
    ) -> Result<()> {
        if !self.rewritten.insert(image_id) {
            return Err(NormalizeError::conflict(image_id, "image rewritten twice"));
        }

        for placement in placements {
            if placement.image_id != image_id {
                return Err(NormalizeError::conflict(
                    image_id,
                    format!(
                        "placement at operator {} draws object {} {}",
                        placement.site.op_index, placement.image_id.0, placement.image_id.1
                    ),
                ));
            }
            let matrix = self.adjustment(canvas, &placement.transform);
            self.queue_edit(placement, matrix)?;
        }

        let stream = match self.doc.get_object_mut(image_id) {
            Ok(Object::Stream(stream)) => stream,
            Ok(_) => return Err(NormalizeError::conflict(image_id, "object is not a stream")),
            Err(_) => return Err(NormalizeError::conflict(image_id, "object is missing")),
        };

        let dict = &mut stream.dict;
        dict.set("Width", Object::Integer(encoded.width as i64));
        dict.set("Height", Object::Integer(encoded.height as i64));
        dict.set("ColorSpace", Object::Name(encoded.color_space.as_bytes().to_vec()));
        dict.set("BitsPerComponent", Object::Integer(8));
        dict.set(
            "Filter",
            Object::Name(encoded.encoding.filter_name().as_bytes().to_vec()),
        );
        for key in STALE_IMAGE_KEYS {
            dict.remove(key);
        }
        stream.set_content(encoded.data.clone());
        stream.allows_compression = false;

        log::debug!(
            "[Rewriter] Object {:?} now {}x{} {} {} ({} bytes, {} placements)",
            image_id,
            encoded.width,
            encoded.height,
            encoded.color_space,
            encoded.encoding.filter_name(),
            encoded.data.len(),
            placements.len()
        );
        Ok(())
    }

    /// The matrix prepended to a placement's CTM.
    fn adjustment(&self, canvas: &CanvasPlacement, ctm: &Transform) -> Transform {
        match self.footprint {
            FootprintPolicy::PreserveContent => content_matrix(canvas),
            FootprintPolicy::CanvasShaped => canvas_shaped_matrix(canvas, ctm),
        }
    }

    fn queue_edit(&mut self, placement: &Placement, matrix: Transform) -> Result<()> {
        let site_edits = self.edits.entry(placement.site.stream_id).or_default();
        if let Some(existing) = site_edits.get(&placement.site.op_index) {
            if existing.image_id != placement.image_id
                || !existing.matrix.approx_eq(&matrix, MATRIX_TOLERANCE)
            {
                return Err(NormalizeError::conflict(
                    placement.image_id,
                    format!(
                        "operator {} of stream {:?} is drawn under conflicting transforms",
                        placement.site.op_index, placement.site.stream_id
                    ),
                ));
            }
            return Ok(());
        }
        site_edits.insert(
            placement.site.op_index,
            SiteEdit {
                image_id: placement.image_id,
                name: placement.name.clone(),
                matrix,
            },
        );
        Ok(())
    }

    /// Apply the queued placement adjustments to their content streams.
    pub fn finish(self) -> Result<()> {
        let Rewriter {
            doc,
            compress_streams,
            edits,
            ..
        } = self;

        for (stream_id, site_edits) in edits {
            let stream = match doc.get_object_mut(stream_id) {
                Ok(Object::Stream(stream)) => stream,
                _ => {
                    return Err(NormalizeError::conflict(
                        stream_id,
                        "content stream is missing",
                    ))
                }
            };

            let data = filters::decode_content_stream(stream)
                .map_err(|e| NormalizeError::conflict(stream_id, e.to_string()))?;
            let content = Content::decode(&data)
                .map_err(|e| NormalizeError::conflict(stream_id, e.to_string()))?;
            let operations = wrap_draws(stream_id, content.operations, &site_edits)?;
            let encoded = Content { operations }
                .encode()
                .map_err(|e| NormalizeError::Serialize(e.to_string()))?;

            stream.dict.remove(b"DecodeParms");
            if compress_streams {
                stream.dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
                stream.set_content(filters::deflate(&encoded)?);
            } else {
                stream.dict.remove(b"Filter");
                stream.set_content(encoded);
            }

            log::debug!(
                "[Rewriter] Adjusted {} placement(s) in stream {:?}",
                site_edits.len(),
                stream_id
            );
        }

        Ok(())
    }
}

/// Insert `q <M> cm` before and `Q` after each edited `Do`.
fn wrap_draws(
    stream_id: ObjectId,
    operations: Vec<Operation>,
    site_edits: &BTreeMap<usize, SiteEdit>,
) -> Result<Vec<Operation>> {
    if let Some((&last, _)) = site_edits.last_key_value() {
        if last >= operations.len() {
            return Err(NormalizeError::conflict(
                stream_id,
                format!("operator {} is past the end of the stream", last),
            ));
        }
    }

    let mut out = Vec::with_capacity(operations.len() + site_edits.len() * 3);
    for (index, op) in operations.into_iter().enumerate() {
        let Some(edit) = site_edits.get(&index) else {
            out.push(op);
            continue;
        };
        let draws_expected = op.operator == "Do"
            && matches!(op.operands.first(), Some(Object::Name(name)) if *name == edit.name);
        if !draws_expected {
            return Err(NormalizeError::conflict(
                edit.image_id,
                format!(
                    "operator {} of stream {} {} is not the expected Do",
                    index, stream_id.0, stream_id.1
                ),
            ));
        }
        out.push(Operation::new("q", vec![]));
        out.push(Operation::new("cm", edit.matrix.to_operands()));
        out.push(op);
        out.push(Operation::new("Q", vec![]));
    }
    Ok(out)
}

/// Maps the canvas' content rectangle onto the unit square, so the original
/// pixels keep their exact footprint and the padding extends past it.
///
/// Image space has row 0 at the top (`y = 1`).
pub fn content_matrix(canvas: &CanvasPlacement) -> Transform {
    let tw = canvas.target_width as f32;
    let th = canvas.target_height as f32;
    let sw = canvas.scaled_width as f32;
    let sh = canvas.scaled_height as f32;
    let ox = canvas.offset_x as f32;
    let oy = canvas.offset_y as f32;
    let bottom = th - oy - sh;
    Transform::new(tw / sw, 0.0, 0.0, th / sh, -ox / sw, -bottom / sh)
}

/// Gives the canvas a canvas-proportioned footprint whose longer edge equals
/// the longer edge of the original footprint, centered on it.
///
/// Only the footprint's proportions matter, so uniformly scaled draws of the
/// same image share one matrix.
pub fn canvas_shaped_matrix(canvas: &CanvasPlacement, ctm: &Transform) -> Transform {
    let footprint_w = ctm.scale_x();
    let footprint_h = ctm.scale_y();
    if footprint_w <= f32::EPSILON || footprint_h <= f32::EPSILON {
        return Transform::identity();
    }
    let longer = footprint_w.max(footprint_h);
    let aspect = canvas.target_width as f32 / canvas.target_height as f32;
    let (new_w, new_h) = if aspect >= 1.0 {
        (longer, longer / aspect)
    } else {
        (longer * aspect, longer)
    };
    let sx = new_w / footprint_w;
    let sy = new_h / footprint_h;
    Transform::new(sx, 0.0, 0.0, sy, (1.0 - sx) / 2.0, (1.0 - sy) / 2.0)
}
