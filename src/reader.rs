//! PDF object reader.
//!
//! Parses input bytes into a `lopdf::Document` (falling back to a full-file
//! object scan when the cross-reference data is unusable), enumerates the image
//! XObjects each page references, and records every place a content stream
//! draws one of them together with the transform in effect at that point.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use regex::bytes::Regex;

use crate::codec::ColorSpace;
use crate::error::{NormalizeError, Result};
use crate::filters::{self, FilterOutput};
use crate::transform::{number, Transform};

/// Reference chains longer than this are treated as broken.
const MAX_REF_DEPTH: usize = 16;
/// Nesting limit for Form XObjects drawing Form XObjects.
const MAX_FORM_DEPTH: usize = 32;
/// The header may be preceded by junk, as long as it appears this early.
const HEADER_WINDOW: usize = 1024;

/// Parse PDF bytes into a document.
///
/// Fails fast when the bytes carry no PDF header. When lopdf cannot load the
/// file, or loads it without any reachable page, the cross-reference table is
/// rebuilt by scanning the file for object headers and the load is retried.
pub fn parse(bytes: &[u8]) -> Result<Document> {
    check_header(bytes)?;

    let first_error = match Document::load_mem(bytes) {
        Ok(doc) if !doc.get_pages().is_empty() => return Ok(doc),
        Ok(doc) => {
            log::warn!("[Reader] Document loaded without reachable pages, scanning for objects");
            match reload_with_rebuilt_xref(bytes) {
                Ok(rebuilt) if !rebuilt.get_pages().is_empty() => return Ok(rebuilt),
                _ => return Ok(doc),
            }
        }
        Err(e) => e,
    };

    log::warn!(
        "[Reader] Failed to load PDF ({}), rebuilding cross-reference table",
        first_error
    );
    reload_with_rebuilt_xref(bytes).map_err(|e| {
        NormalizeError::MalformedDocument(format!("{}; recovery failed: {}", first_error, e))
    })
}

fn check_header(bytes: &[u8]) -> Result<()> {
    let window = &bytes[..bytes.len().min(HEADER_WINDOW)];
    if window.windows(5).any(|w| w == b"%PDF-") {
        Ok(())
    } else {
        Err(NormalizeError::MalformedDocument(
            "Missing %PDF- header".to_string(),
        ))
    }
}

fn reload_with_rebuilt_xref(bytes: &[u8]) -> Result<Document> {
    let repaired = rebuild_xref(bytes).ok_or_else(|| {
        NormalizeError::MalformedDocument("No recoverable objects or catalog".to_string())
    })?;
    Document::load_mem(&repaired).map_err(NormalizeError::from)
}

/// Append a freshly computed xref table and trailer to `bytes`.
///
/// Returns `None` when no object headers or no catalog can be found. Later
/// definitions of an object number win, matching incremental-update order.
pub(crate) fn rebuild_xref(bytes: &[u8]) -> Option<Vec<u8>> {
    let header =
        Regex::new(r"(?-u)(?:^|[\r\n\t \x0c])(\d{1,10})[\r\n\t \x0c]+(\d{1,5})[\r\n\t \x0c]+obj\b")
            .ok()?;
    let root_ref =
        Regex::new(r"(?-u)/Root[\r\n\t \x0c]*(\d{1,10})[\r\n\t \x0c]+(\d{1,5})[\r\n\t \x0c]+R")
            .ok()?;
    let catalog = Regex::new(r"(?-u)/Type[\r\n\t \x0c]*/Catalog\b").ok()?;

    let mut objects: BTreeMap<u32, (u16, usize)> = BTreeMap::new();
    for caps in header.captures_iter(bytes) {
        let (Some(num), Some(gen)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let (Some(number), Some(generation)) = (
            ascii_number::<u32>(num.as_bytes()),
            ascii_number::<u16>(gen.as_bytes()),
        ) else {
            continue;
        };
        objects.insert(number, (generation, num.start()));
    }
    let max_number = *objects.keys().next_back()?;

    let root = root_ref
        .captures_iter(bytes)
        .filter_map(|caps| {
            let number = ascii_number::<u32>(caps.get(1)?.as_bytes())?;
            let generation = ascii_number::<u16>(caps.get(2)?.as_bytes())?;
            objects.contains_key(&number).then_some((number, generation))
        })
        .last()
        .or_else(|| {
            objects.iter().find_map(|(number, (generation, offset))| {
                let end = (*offset + 4096).min(bytes.len());
                let body = &bytes[*offset..end];
                let body = match find(body, b"endobj") {
                    Some(pos) => &body[..pos],
                    None => body,
                };
                catalog.is_match(body).then_some((*number, *generation))
            })
        })?;

    let mut out = bytes.to_vec();
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    let xref_offset = out.len();
    let size = max_number as usize + 1;
    write!(out, "xref\n0 {}\n", size).ok()?;
    for number in 0..=max_number {
        match objects.get(&number) {
            Some((generation, offset)) => {
                write!(out, "{:010} {:05} n\r\n", offset, generation).ok()?
            }
            None => out.extend_from_slice(b"0000000000 65535 f\r\n"),
        }
    }
    write!(
        out,
        "trailer\n<< /Size {} /Root {} {} R >>\nstartxref\n{}\n%%EOF\n",
        size, root.0, root.1, xref_offset
    )
    .ok()?;

    log::debug!(
        "[Reader] Rebuilt xref with {} objects, catalog {} {}",
        objects.len(),
        root.0,
        root.1
    );
    Some(out)
}

fn ascii_number<T: std::str::FromStr>(digits: &[u8]) -> Option<T> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Location of a `Do` operator: content stream object and operator index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawSite {
    pub stream_id: ObjectId,
    pub op_index: usize,
}

/// One drawing of an image XObject.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub image_id: ObjectId,
    /// Resource name the `Do` operator uses.
    pub name: Vec<u8>,
    /// Current transformation matrix at the `Do`; maps the unit square to the page.
    pub transform: Transform,
    pub site: DrawSite,
}

/// Images referenced by the document, with per-page placements.
#[derive(Debug, Default)]
pub struct ImageCatalog {
    pages: BTreeMap<u32, Vec<Placement>>,
    images: BTreeSet<ObjectId>,
}

impl ImageCatalog {
    /// Walk every page's resources and content streams.
    ///
    /// Images reachable through page or Form XObject resources are
    /// candidates even when no content stream draws them. Images used as
    /// another image's `/SMask` are excluded; they are consumed with their
    /// parent.
    pub fn scan(doc: &Document) -> Result<Self> {
        let soft_masks = collect_soft_masks(doc);
        let mut pages = BTreeMap::new();
        let mut images = BTreeSet::new();

        for (page_number, page_id) in doc.get_pages() {
            log::debug!("[Reader] Scanning page {}...", page_number);
            let resources = page_resources(doc, page_id);

            let mut seen_forms = HashSet::new();
            collect_resource_images(doc, resources, &mut images, &mut seen_forms);

            let mut scanner = PlacementScanner::new(doc);
            let mut stack = vec![Transform::identity()];
            for stream_id in page_content_streams(doc, page_id) {
                scanner.scan_stream(stream_id, resources, &mut stack)?;
            }

            images.extend(scanner.placements.iter().map(|p| p.image_id));
            pages.insert(page_number, scanner.placements);
        }

        images.retain(|id| !soft_masks.contains(id));

        Ok(ImageCatalog { pages, images })
    }

    pub fn page_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.keys().copied()
    }

    /// Placements on one page in drawing order, including those inside Form XObjects.
    pub fn images_of(&self, page_number: u32) -> &[Placement] {
        self.pages
            .get(&page_number)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Distinct image objects, deduplicated by object identity.
    pub fn all_image_objects(&self) -> Vec<ObjectId> {
        self.images.iter().copied().collect()
    }

    /// Every placement of one image across all pages.
    pub fn placements_of(&self, image_id: ObjectId) -> Vec<&Placement> {
        self.pages
            .values()
            .flatten()
            .filter(|p| p.image_id == image_id)
            .collect()
    }
}

/// Follow indirect references to a direct object.
pub(crate) fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> Option<&'a Object> {
    for _ in 0..MAX_REF_DEPTH {
        match obj {
            Object::Reference(id) => obj = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

fn int_entry(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<i64> {
    match resolve(doc, dict.get(key).ok()?)? {
        Object::Integer(n) => Some(*n),
        Object::Real(n) => Some(*n as i64),
        _ => None,
    }
}

fn name_entry<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key).ok()? {
        Object::Name(n) => Some(n.as_slice()),
        _ => None,
    }
}

fn xobject_subtype(doc: &Document, id: ObjectId) -> Option<&[u8]> {
    match doc.get_object(id).ok()? {
        Object::Stream(stream) => name_entry(&stream.dict, b"Subtype"),
        _ => None,
    }
}

/// Get resources for a page, walking up the page tree for inherited ones
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut current = match doc.get_object(page_id).ok()? {
        Object::Dictionary(d) => d,
        _ => return None,
    };
    for _ in 0..MAX_REF_DEPTH {
        if let Ok(resources) = current.get(b"Resources") {
            return resolve_dict(doc, resources);
        }
        current = resolve_dict(doc, current.get(b"Parent").ok()?)?;
    }
    None
}

/// Content stream object ids of a page, in order.
fn page_content_streams(doc: &Document, page_id: ObjectId) -> Vec<ObjectId> {
    let contents = match doc.get_object(page_id) {
        Ok(Object::Dictionary(d)) => d.get(b"Contents").ok(),
        _ => None,
    };

    match contents {
        Some(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Stream(_)) => vec![*id],
            Ok(Object::Array(arr)) => references(arr),
            _ => Vec::new(),
        },
        Some(Object::Array(arr)) => references(arr),
        Some(_) => {
            log::warn!(
                "[Reader] Page {:?} has direct content, placements there are not tracked",
                page_id
            );
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn references(arr: &[Object]) -> Vec<ObjectId> {
    arr.iter()
        .filter_map(|o| match o {
            Object::Reference(id) => Some(*id),
            _ => None,
        })
        .collect()
}

fn xobject_dict<'a>(doc: &'a Document, resources: Option<&'a Dictionary>) -> Option<&'a Dictionary> {
    resolve_dict(doc, resources?.get(b"XObject").ok()?)
}

/// Recursively collect images from a resource dictionary (handles Form XObjects)
fn collect_resource_images(
    doc: &Document,
    resources: Option<&Dictionary>,
    images: &mut BTreeSet<ObjectId>,
    seen_forms: &mut HashSet<ObjectId>,
) {
    let Some(xobjects) = xobject_dict(doc, resources) else {
        return;
    };

    for (_, value) in xobjects.iter() {
        let Object::Reference(id) = value else {
            continue;
        };
        match xobject_subtype(doc, *id) {
            Some(b"Image") => {
                images.insert(*id);
            }
            Some(b"Form") => {
                if !seen_forms.insert(*id) {
                    continue;
                }
                if let Ok(Object::Stream(form)) = doc.get_object(*id) {
                    let form_resources = form
                        .dict
                        .get(b"Resources")
                        .ok()
                        .and_then(|r| resolve_dict(doc, r));
                    collect_resource_images(doc, form_resources, images, seen_forms);
                }
            }
            _ => {}
        }
    }
}

/// Soft masks and explicit `/Mask` streams; they are folded into their parent image.
fn collect_soft_masks(doc: &Document) -> HashSet<ObjectId> {
    doc.objects
        .values()
        .filter_map(|object| match object {
            Object::Stream(stream) if matches!(name_entry(&stream.dict, b"Subtype"), Some(b"Image")) => {
                Some(stream)
            }
            _ => None,
        })
        .flat_map(|stream| {
            [b"SMask".as_slice(), b"Mask".as_slice()]
                .into_iter()
                .filter_map(move |key| match stream.dict.get(key) {
                    Ok(Object::Reference(id)) => Some(*id),
                    _ => None,
                })
        })
        .collect()
}

/// Tracks the graphics state through content streams and records image draws.
struct PlacementScanner<'a> {
    doc: &'a Document,
    /// Forms currently being scanned, to break cycles
    active_forms: Vec<ObjectId>,
    placements: Vec<Placement>,
}

impl<'a> PlacementScanner<'a> {
    fn new(doc: &'a Document) -> Self {
        PlacementScanner {
            doc,
            active_forms: Vec::new(),
            placements: Vec::new(),
        }
    }

    /// Scan one content stream; `stack` carries the graphics state between
    /// the streams of a page's `/Contents` array.
    fn scan_stream(
        &mut self,
        stream_id: ObjectId,
        resources: Option<&'a Dictionary>,
        stack: &mut Vec<Transform>,
    ) -> Result<()> {
        let doc = self.doc;
        let stream = doc.get_object(stream_id)?.as_stream()?;
        let data = filters::decode_content_stream(stream).map_err(|e| {
            NormalizeError::MalformedDocument(format!(
                "Content stream {} {}: {}",
                stream_id.0, stream_id.1, e
            ))
        })?;
        let content = Content::decode(&data)?;
        let xobjects = xobject_dict(doc, resources);

        for (op_index, op) in content.operations.iter().enumerate() {
            match op.operator.as_str() {
                "q" => {
                    let current = stack.last().copied().unwrap_or_default();
                    stack.push(current);
                }
                "Q" => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                "cm" => {
                    if let Some(m) = Transform::from_operands(&op.operands) {
                        if let Some(current) = stack.last_mut() {
                            *current = m.concat(current);
                        }
                    }
                }
                "Do" => {
                    let Some(Object::Name(name)) = op.operands.first() else {
                        continue;
                    };
                    let Some(Object::Reference(xobject_id)) =
                        xobjects.and_then(|x| x.get(name).ok())
                    else {
                        continue;
                    };
                    let ctm = stack.last().copied().unwrap_or_default();

                    match xobject_subtype(doc, *xobject_id) {
                        Some(b"Image") => self.placements.push(Placement {
                            image_id: *xobject_id,
                            name: name.clone(),
                            transform: ctm,
                            site: DrawSite {
                                stream_id,
                                op_index,
                            },
                        }),
                        Some(b"Form") => self.scan_form(*xobject_id, ctm, resources)?,
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Scan a Form XObject's content stream under the drawing CTM.
    fn scan_form(
        &mut self,
        form_id: ObjectId,
        ctm: Transform,
        parent_resources: Option<&'a Dictionary>,
    ) -> Result<()> {
        if self.active_forms.contains(&form_id) || self.active_forms.len() >= MAX_FORM_DEPTH {
            log::warn!("[Reader] Skipping recursive Form XObject {:?}", form_id);
            return Ok(());
        }

        let doc = self.doc;
        let Ok(Object::Stream(form)) = doc.get_object(form_id) else {
            return Ok(());
        };

        let form_matrix = form
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|m| match resolve(doc, m) {
                Some(Object::Array(arr)) => Transform::from_operands(arr),
                _ => None,
            })
            .unwrap_or_default();

        // Old producers omit form resources and rely on the caller's
        let resources = form
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|r| resolve_dict(doc, r))
            .or(parent_resources);

        self.active_forms.push(form_id);
        let mut stack = vec![form_matrix.concat(&ctm)];
        let result = self.scan_stream(form_id, resources, &mut stack);
        self.active_forms.pop();
        result
    }
}

/// An image XObject extracted from the document with everything needed to
/// decode it, so decoding does not touch the document.
#[derive(Debug, Clone)]
pub struct ImageObject {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u32,
    pub color_space: ColorSpace,
    pub image_mask: bool,
    /// Stream dictionary with `/Filter` and `/DecodeParms` made direct.
    pub dict: Dictionary,
    pub content: Vec<u8>,
    /// `/Decode` ranges, two per component
    pub decode: Option<Vec<f32>>,
    pub soft_mask: Option<Box<ImageObject>>,
    pub mask: Option<Mask>,
}

/// The `/Mask` entry of an image.
#[derive(Debug, Clone)]
pub enum Mask {
    /// Color-key ranges in raw sample values, two per component
    ColorKey(Vec<u32>),
    /// Explicit 1-bit mask; samples of 1 are masked out unless its Decode inverts them
    Stencil(Box<ImageObject>),
}

impl ImageObject {
    pub fn filter_names(&self) -> Vec<String> {
        filters::filter_chain(&self.dict)
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    pub fn is_dct(&self) -> bool {
        matches!(
            filters::filter_chain(&self.dict).last(),
            Some(filters::Filter::Dct)
        )
    }
}

/// Extract an image XObject and its soft mask.
pub fn read_image(doc: &Document, id: ObjectId) -> Result<ImageObject> {
    read_image_inner(doc, id, true)
}

fn read_image_inner(doc: &Document, id: ObjectId, with_mask: bool) -> Result<ImageObject> {
    let stream = match doc.get_object(id) {
        Ok(Object::Stream(s)) => s,
        _ => {
            return Err(NormalizeError::invalid_source(format!(
                "Object {} {} is not an image stream",
                id.0, id.1
            )))
        }
    };

    let width = int_entry(doc, &stream.dict, b"Width").unwrap_or(0).max(0) as u32;
    let height = int_entry(doc, &stream.dict, b"Height").unwrap_or(0).max(0) as u32;
    let bits_per_component = int_entry(doc, &stream.dict, b"BitsPerComponent")
        .unwrap_or(8)
        .max(0) as u32;
    let image_mask = matches!(
        stream.dict.get(b"ImageMask").ok().and_then(|o| resolve(doc, o)),
        Some(Object::Boolean(true))
    );

    let color_space = match stream.dict.get(b"ColorSpace") {
        Ok(cs) => resolve_color_space(doc, cs, 0),
        Err(_) => ColorSpace::Unspecified,
    };

    let mut dict = stream.dict.clone();
    for key in [b"Filter".as_slice(), b"DecodeParms".as_slice()] {
        let inlined = dict.get(key).ok().map(|v| inline_references(doc, v));
        if let Some(value) = inlined {
            dict.set(key.to_vec(), value);
        }
    }

    let decode = match stream.dict.get(b"Decode").ok().and_then(|o| resolve(doc, o)) {
        Some(Object::Array(arr)) => Some(
            arr.iter()
                .map(|o| resolve(doc, o).and_then(number))
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| {
                    NormalizeError::invalid_source(format!("Malformed Decode array on {} {}", id.0, id.1))
                })?,
        ),
        _ => None,
    };

    let soft_mask = match (with_mask, stream.dict.get(b"SMask")) {
        (true, Ok(Object::Reference(mask_id))) => {
            Some(Box::new(read_image_inner(doc, *mask_id, false)?))
        }
        _ => None,
    };

    let mask = match stream.dict.get(b"Mask") {
        Ok(entry) if with_mask => read_mask(doc, entry)?,
        _ => None,
    };

    Ok(ImageObject {
        id,
        width,
        height,
        bits_per_component,
        color_space,
        image_mask,
        dict,
        content: stream.content.clone(),
        decode,
        soft_mask,
        mask,
    })
}

fn read_mask(doc: &Document, entry: &Object) -> Result<Option<Mask>> {
    match (entry, resolve(doc, entry)) {
        (Object::Reference(mask_id), Some(Object::Stream(_))) => Ok(Some(Mask::Stencil(Box::new(
            read_image_inner(doc, *mask_id, false)?,
        )))),
        (_, Some(Object::Array(ranges))) => ranges
            .iter()
            .map(|o| match resolve(doc, o) {
                Some(Object::Integer(n)) if *n >= 0 => Some(*n as u32),
                _ => None,
            })
            .collect::<Option<Vec<u32>>>()
            .map(|ranges| Some(Mask::ColorKey(ranges)))
            .ok_or_else(|| NormalizeError::invalid_source("Malformed color-key Mask")),
        _ => Ok(None),
    }
}

/// Resolve a reference and the references directly inside an array or dictionary.
fn inline_references(doc: &Document, obj: &Object) -> Object {
    match resolve(doc, obj) {
        Some(Object::Array(arr)) => Object::Array(
            arr.iter()
                .map(|o| resolve(doc, o).cloned().unwrap_or(Object::Null))
                .collect(),
        ),
        Some(Object::Dictionary(d)) => {
            let mut inlined = Dictionary::new();
            for (k, v) in d.iter() {
                inlined.set(k.clone(), resolve(doc, v).cloned().unwrap_or(Object::Null));
            }
            Object::Dictionary(inlined)
        }
        Some(other) => other.clone(),
        None => Object::Null,
    }
}

fn device_space(name: &[u8]) -> ColorSpace {
    match name {
        b"DeviceGray" | b"G" | b"CalGray" => ColorSpace::Gray,
        b"DeviceRGB" | b"RGB" | b"CalRGB" => ColorSpace::Rgb,
        b"DeviceCMYK" | b"CMYK" => ColorSpace::Cmyk,
        other => ColorSpace::Unsupported(String::from_utf8_lossy(other).to_string()),
    }
}

/// Resolve an image `/ColorSpace` entry into something the codec can expand.
pub(crate) fn resolve_color_space(doc: &Document, obj: &Object, depth: usize) -> ColorSpace {
    if depth > 4 {
        return ColorSpace::Unsupported("nested color space".to_string());
    }

    let arr = match resolve(doc, obj) {
        Some(Object::Name(name)) => return device_space(name),
        Some(Object::Array(arr)) if !arr.is_empty() => arr,
        _ => return ColorSpace::Unsupported("malformed color space".to_string()),
    };

    let family = match &arr[0] {
        Object::Name(n) => n.as_slice(),
        _ => return ColorSpace::Unsupported("malformed color space".to_string()),
    };

    match family {
        b"ICCBased" => {
            let Some(Object::Stream(profile)) = arr.get(1).and_then(|o| resolve(doc, o)) else {
                return ColorSpace::Unsupported("ICCBased without profile".to_string());
            };
            match int_entry(doc, &profile.dict, b"N") {
                Some(1) => ColorSpace::Gray,
                Some(3) => ColorSpace::Rgb,
                Some(4) => ColorSpace::Cmyk,
                _ => match profile.dict.get(b"Alternate") {
                    Ok(alt) => resolve_color_space(doc, alt, depth + 1),
                    Err(_) => ColorSpace::Unsupported("ICCBased".to_string()),
                },
            }
        }
        b"Indexed" | b"I" => {
            let base = match arr.get(1) {
                Some(base) => resolve_color_space(doc, base, depth + 1),
                None => return ColorSpace::Unsupported("Indexed without base".to_string()),
            };
            if !matches!(base, ColorSpace::Gray | ColorSpace::Rgb | ColorSpace::Cmyk) {
                return ColorSpace::Unsupported(format!("Indexed over {}", base.name()));
            }
            let hival = match arr.get(2).and_then(|o| resolve(doc, o)) {
                Some(Object::Integer(n)) => (*n).clamp(0, 255) as u8,
                _ => return ColorSpace::Unsupported("Indexed without hival".to_string()),
            };
            let lookup = match arr.get(3).and_then(|o| resolve(doc, o)) {
                Some(Object::String(bytes, _)) => bytes.clone(),
                Some(Object::Stream(stream)) => {
                    match filters::apply_filters(&stream.dict, &stream.content) {
                        Ok(FilterOutput::Raw(data)) => data,
                        _ => return ColorSpace::Unsupported("Indexed lookup stream".to_string()),
                    }
                }
                _ => return ColorSpace::Unsupported("Indexed without lookup".to_string()),
            };
            ColorSpace::Indexed {
                base: Box::new(base),
                hival,
                lookup,
            }
        }
        b"CalRGB" | b"CalGray" | b"DeviceRGB" | b"DeviceGray" | b"DeviceCMYK" => {
            device_space(family)
        }
        other => ColorSpace::Unsupported(String::from_utf8_lossy(other).to_string()),
    }
}
