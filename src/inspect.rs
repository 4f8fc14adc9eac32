//! Per-page image report.

use lopdf::{Document, ObjectId};

use crate::error::Result;
use crate::reader::{self, ImageCatalog, ImageObject};

/// Information about a single image in the PDF
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    /// Object ID (number, generation)
    pub object_id: ObjectId,
    /// Image type (image or smask)
    pub image_type: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    pub color_space: String,
    pub bits_per_component: u32,
    /// Filter chain, joined with `+`
    pub filter: String,
    /// Encoded stream size in bytes
    pub size_bytes: usize,
    /// Footprint on the page in points, from the first placement on the page
    pub footprint_points: Option<(f32, f32)>,
    /// Effective DPI X (if placed)
    pub dpi_x: Option<f32>,
    /// Effective DPI Y (if placed)
    pub dpi_y: Option<f32>,
}

/// Images grouped by page
#[derive(Debug, Clone, PartialEq)]
pub struct PageImages {
    pub page_number: u32,
    pub images: Vec<ImageInfo>,
}

/// Pixels per inch for a footprint of `points` on the page.
fn effective_dpi(pixels: u32, points: f32) -> Option<f32> {
    let inches = points / 72.0;
    (inches > 0.0).then(|| pixels as f32 / inches)
}

fn image_info(image: &ImageObject, image_type: &str, footprint: Option<(f32, f32)>) -> ImageInfo {
    let filters = image.filter_names();
    ImageInfo {
        object_id: image.id,
        image_type: image_type.to_string(),
        width: image.width,
        height: image.height,
        color_space: image.color_space.name(),
        bits_per_component: image.bits_per_component,
        filter: if filters.is_empty() {
            "None".to_string()
        } else {
            filters.join("+")
        },
        size_bytes: image.content.len(),
        footprint_points: footprint,
        dpi_x: footprint.and_then(|(w, _)| effective_dpi(image.width, w)),
        dpi_y: footprint.and_then(|(_, h)| effective_dpi(image.height, h)),
    }
}

/// Describe the images drawn on each page, in drawing order.
///
/// An image drawn several times on a page is listed once. Soft masks follow
/// the image they belong to.
pub fn extract_pdf_images_info(pdf_bytes: &[u8]) -> Result<Vec<PageImages>> {
    let doc = reader::parse(pdf_bytes)?;
    describe_document(&doc)
}

pub fn describe_document(doc: &Document) -> Result<Vec<PageImages>> {
    let catalog = ImageCatalog::scan(doc)?;
    let mut result = Vec::new();

    for page_number in catalog.page_numbers() {
        let mut seen: Vec<ObjectId> = Vec::new();
        let mut images = Vec::new();

        for placement in catalog.images_of(page_number) {
            if seen.contains(&placement.image_id) {
                continue;
            }
            seen.push(placement.image_id);

            let image = match reader::read_image(doc, placement.image_id) {
                Ok(image) => image,
                Err(e) => {
                    log::warn!("[Inspect] Skipping image {:?}: {}", placement.image_id, e);
                    continue;
                }
            };
            let footprint = Some((placement.transform.scale_x(), placement.transform.scale_y()));
            images.push(image_info(&image, "image", footprint));
            if let Some(mask) = image.soft_mask.as_deref() {
                images.push(image_info(mask, "smask", None));
            }
        }

        if !images.is_empty() {
            result.push(PageImages {
                page_number,
                images,
            });
        }
    }

    Ok(result)
}
