//! Shared fixtures: small PDFs built in memory with lopdf.

#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use normalize_pdf::filters;
use normalize_pdf::transform::Transform;

/// An image XObject to embed.
pub struct TestImage {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub bits_per_component: i64,
    pub filter: Option<&'static str>,
    pub data: Vec<u8>,
}

impl TestImage {
    /// Flate-compressed RGB filled with one color.
    pub fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> Self {
        let raw: Vec<u8> = (0..width * height).flat_map(|_| color).collect();
        TestImage {
            width,
            height,
            color_space: "DeviceRGB",
            bits_per_component: 8,
            filter: Some("FlateDecode"),
            data: filters::deflate(&raw).unwrap(),
        }
    }

    /// Uncompressed grayscale filled with one value.
    pub fn solid_gray(width: u32, height: u32, value: u8) -> Self {
        TestImage {
            width,
            height,
            color_space: "DeviceGray",
            bits_per_component: 8,
            filter: None,
            data: vec![value; (width * height) as usize],
        }
    }

    /// Uncompressed grayscale with `bits` per sample; rows are `data` as given.
    pub fn packed_gray(width: u32, height: u32, bits: i64, data: Vec<u8>) -> Self {
        TestImage {
            width,
            height,
            color_space: "DeviceGray",
            bits_per_component: bits,
            filter: None,
            data,
        }
    }

    /// Baseline JPEG filled with one color.
    pub fn jpeg(width: u32, height: u32, color: [u8; 3]) -> Self {
        let raw: Vec<u8> = (0..width * height).flat_map(|_| color).collect();
        let mut data = Vec::new();
        jpeg_encoder::Encoder::new(&mut data, 90)
            .encode(&raw, width as u16, height as u16, jpeg_encoder::ColorType::Rgb)
            .unwrap();
        TestImage {
            width,
            height,
            color_space: "DeviceRGB",
            bits_per_component: 8,
            filter: Some("DCTDecode"),
            data,
        }
    }

    /// Samples no supported filter can decode.
    pub fn jbig2(width: u32, height: u32) -> Self {
        TestImage {
            width,
            height,
            color_space: "DeviceGray",
            bits_per_component: 1,
            filter: Some("JBIG2Decode"),
            data: vec![0x97, 0x4a, 0x42, 0x32, 0x0d, 0x0a, 0x1a, 0x0a],
        }
    }

    fn dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(self.width as i64)),
            ("Height", Object::Integer(self.height as i64)),
            ("ColorSpace", Object::Name(self.color_space.as_bytes().to_vec())),
            ("BitsPerComponent", Object::Integer(self.bits_per_component)),
        ]);
        if let Some(filter) = self.filter {
            dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
        }
        dict
    }
}

/// One `Do` on a page, wrapped in `q <transform> cm ... Q`.
pub struct Draw {
    pub name: &'static str,
    pub image: ObjectId,
    pub transform: Transform,
}

pub fn draw(name: &'static str, image: ObjectId, transform: Transform) -> Draw {
    Draw {
        name,
        image,
        transform,
    }
}

/// Builds a document page by page.
pub struct PdfBuilder {
    pub doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        PdfBuilder {
            doc,
            pages_id,
            page_ids: Vec::new(),
        }
    }

    pub fn add_image(&mut self, image: &TestImage) -> ObjectId {
        self.doc
            .add_object(Stream::new(image.dictionary(), image.data.clone()))
    }

    /// Add an image with a soft mask filled with `alpha`.
    pub fn add_masked_image(&mut self, image: &TestImage, alpha: u8) -> (ObjectId, ObjectId) {
        let mask = TestImage::solid_gray(image.width, image.height, alpha);
        let mask_id = self.add_image(&mask);
        let mut dict = image.dictionary();
        dict.set("SMask", Object::Reference(mask_id));
        let image_id = self
            .doc
            .add_object(Stream::new(dict, image.data.clone()));
        (image_id, mask_id)
    }

    /// An 8-bit Indexed RGB image whose palette lives in a Flate stream.
    pub fn add_indexed_image(&mut self, width: u32, height: u32, palette: &[u8], index: u8) -> ObjectId {
        let lookup = Stream::new(
            Dictionary::from_iter(vec![("Filter", Object::Name(b"FlateDecode".to_vec()))]),
            filters::deflate(palette).unwrap(),
        );
        let lookup_id = self.doc.add_object(lookup);
        let color_space = Object::Array(vec![
            Object::Name(b"Indexed".to_vec()),
            Object::Name(b"DeviceRGB".to_vec()),
            Object::Integer(palette.len() as i64 / 3 - 1),
            Object::Reference(lookup_id),
        ]);
        let dict = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(width as i64)),
            ("Height", Object::Integer(height as i64)),
            ("ColorSpace", color_space),
            ("BitsPerComponent", Object::Integer(8)),
        ]);
        self.doc
            .add_object(Stream::new(dict, vec![index; (width * height) as usize]))
    }

    /// Set one entry of a stream's dictionary.
    pub fn set_entry(&mut self, id: ObjectId, key: &str, value: Object) {
        let stream = self.doc.get_object_mut(id).unwrap().as_stream_mut().unwrap();
        stream.dict.set(key, value);
    }

    /// Re-encode a page's content stream as ASCII85 over Flate.
    pub fn ascii85_contents(&mut self, page_id: ObjectId) {
        let content_id = page_content_id(&self.doc, page_id);
        let stream = self
            .doc
            .get_object_mut(content_id)
            .unwrap()
            .as_stream_mut()
            .unwrap();
        let encoded = ascii85(&filters::deflate(&stream.content).unwrap());
        stream.dict.set(
            "Filter",
            Object::Array(vec![
                Object::Name(b"ASCII85Decode".to_vec()),
                Object::Name(b"FlateDecode".to_vec()),
            ]),
        );
        stream.set_content(encoded);
    }

    /// A second page drawing from the same content stream and resources.
    pub fn add_page_sharing(&mut self, page_id: ObjectId) -> ObjectId {
        let page = self.doc.get_dictionary(page_id).unwrap().clone();
        let shared = self.doc.add_object(page);
        self.page_ids.push(shared);
        shared
    }

    /// A Form XObject that draws `draws` under its own resources.
    pub fn add_form(&mut self, draws: &[Draw]) -> ObjectId {
        let (content, resources) = content_and_resources(draws);
        let dict = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Form".to_vec())),
            (
                "BBox",
                Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
            ),
            ("Resources", Object::Dictionary(resources)),
        ]);
        self.doc.add_object(Stream::new(dict, content))
    }

    pub fn add_page(&mut self, draws: &[Draw]) -> ObjectId {
        let (content, resources) = content_and_resources(draws);
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content));
        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(self.pages_id)),
            (
                "MediaBox",
                Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
            ),
            ("Resources", Object::Dictionary(resources)),
            ("Contents", Object::Reference(content_id)),
        ]);
        let page_id = self.doc.add_object(page);
        self.page_ids.push(page_id);
        page_id
    }

    pub fn build(mut self) -> Vec<u8> {
        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(self.page_ids.len() as i64)),
            (
                "Kids",
                Object::Array(self.page_ids.iter().map(|id| Object::Reference(*id)).collect()),
            ),
        ]);
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let catalog = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(self.pages_id)),
        ]);
        let catalog_id = self.doc.add_object(catalog);
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes).unwrap();
        bytes
    }
}

fn content_and_resources(draws: &[Draw]) -> (Vec<u8>, Dictionary) {
    let mut operations = Vec::new();
    let mut xobjects = Dictionary::new();
    for d in draws {
        operations.push(Operation::new("q", vec![]));
        operations.push(Operation::new("cm", d.transform.to_operands()));
        operations.push(Operation::new(
            "Do",
            vec![Object::Name(d.name.as_bytes().to_vec())],
        ));
        operations.push(Operation::new("Q", vec![]));
        xobjects.set(d.name.as_bytes().to_vec(), Object::Reference(d.image));
    }
    let content = Content { operations }.encode().unwrap();
    let resources = Dictionary::from_iter(vec![("XObject", Object::Dictionary(xobjects))]);
    (content, resources)
}

/// ASCII85 with the `~>` terminator.
pub fn ascii85(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(4) {
        let mut group = [0u8; 4];
        group[..chunk.len()].copy_from_slice(chunk);
        let mut value = u32::from_be_bytes(group);
        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            *digit = (value % 85) as u8 + b'!';
            value /= 85;
        }
        out.extend_from_slice(&digits[..chunk.len() + 1]);
    }
    out.extend_from_slice(b"~>");
    out
}

/// The operators of a content stream, decoded.
pub fn operators(doc: &Document, stream_id: ObjectId) -> Vec<String> {
    let stream = doc.get_object(stream_id).unwrap().as_stream().unwrap();
    let data = filters::decode_content_stream(stream).unwrap();
    Content::decode(&data)
        .unwrap()
        .operations
        .into_iter()
        .map(|op| op.operator)
        .collect()
}

/// The `/Contents` stream of a page.
pub fn page_content_id(doc: &Document, page_id: ObjectId) -> ObjectId {
    let page = doc.get_dictionary(page_id).unwrap();
    page.get(b"Contents").unwrap().as_reference().unwrap()
}

pub fn int_entry(doc: &Document, id: ObjectId, key: &[u8]) -> i64 {
    let stream = doc.get_object(id).unwrap().as_stream().unwrap();
    stream.dict.get(key).unwrap().as_i64().unwrap()
}

pub fn assert_point(actual: (f32, f32), expected: (f32, f32)) {
    assert!(
        (actual.0 - expected.0).abs() < 0.01 && (actual.1 - expected.1).abs() < 0.01,
        "{:?} != {:?}",
        actual,
        expected
    );
}
