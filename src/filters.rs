//! Stream filter chain.
//!
//! Shared by the reader (content streams) and the codec (image samples).
//! Flate, LZW and ASCII85 are decompressed by lopdf one filter at a time;
//! predictors are undone here since lopdf skips the TIFF predictor and
//! sub-byte PNG rows. DCT stops the chain and hands the bitstream to the image
//! decoder. Anything else surfaces as `UnsupportedEncoding` so callers can
//! leave the object alone.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{Dictionary, Object, Stream};

use crate::error::{NormalizeError, Result};

/// Parameters of a `/DecodeParms` predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predictor {
    pub predictor: i64,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for Predictor {
    fn default() -> Self {
        Predictor {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

/// One entry of a stream's `/Filter` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Flate(Predictor),
    Lzw { predictor: Predictor, early_change: i64 },
    Ascii85,
    Dct,
    Other(String),
}

impl Filter {
    pub fn name(&self) -> &str {
        match self {
            Filter::Flate(_) => "FlateDecode",
            Filter::Lzw { .. } => "LZWDecode",
            Filter::Ascii85 => "ASCII85Decode",
            Filter::Dct => "DCTDecode",
            Filter::Other(name) => name,
        }
    }
}

/// Result of running the filter chain.
#[derive(Debug)]
pub enum FilterOutput {
    /// Plain sample or operator bytes.
    Raw(Vec<u8>),
    /// A complete JPEG bitstream left for the image decoder.
    Jpeg(Vec<u8>),
}

/// Read the `/Filter` and `/DecodeParms` entries of a stream dictionary.
///
/// Both entries may be a single value or an array; references must already
/// have been inlined by the reader.
pub fn filter_chain(dict: &Dictionary) -> Vec<Filter> {
    let names: Vec<String> = match dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![String::from_utf8_lossy(n).to_string()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|f| match f {
                Object::Name(n) => Some(String::from_utf8_lossy(n).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let params: Vec<Option<&Dictionary>> = match dict.get(b"DecodeParms") {
        Ok(Object::Dictionary(d)) => vec![Some(d)],
        Ok(Object::Array(arr)) => arr
            .iter()
            .map(|p| match p {
                Object::Dictionary(d) => Some(d),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let params = params.get(i).copied().flatten();
            let predictor = params.map(predictor_from_params).unwrap_or_default();
            match name.as_str() {
                "FlateDecode" | "Fl" => Filter::Flate(predictor),
                "LZWDecode" | "LZW" => Filter::Lzw {
                    predictor,
                    early_change: match params.map(|p| p.get(b"EarlyChange")) {
                        Some(Ok(Object::Integer(n))) => *n,
                        _ => 1,
                    },
                },
                "ASCII85Decode" | "A85" => Filter::Ascii85,
                "DCTDecode" | "DCT" => Filter::Dct,
                _ => Filter::Other(name),
            }
        })
        .collect()
}

fn predictor_from_params(params: &Dictionary) -> Predictor {
    let int = |key: &[u8], default: i64| -> i64 {
        match params.get(key) {
            Ok(Object::Integer(n)) => *n,
            _ => default,
        }
    };
    Predictor {
        predictor: int(b"Predictor", 1),
        colors: int(b"Colors", 1).max(1) as usize,
        bits_per_component: int(b"BitsPerComponent", 8).max(1) as usize,
        columns: int(b"Columns", 1).max(1) as usize,
    }
}

/// Run the filter chain of a stream dictionary over `content`.
pub fn apply_filters(dict: &Dictionary, content: &[u8]) -> Result<FilterOutput> {
    let chain = filter_chain(dict);
    let mut data = content.to_vec();

    for (i, filter) in chain.iter().enumerate() {
        match filter {
            Filter::Flate(predictor) => {
                data = decompress("FlateDecode", None, data)?;
                data = undo_predictor(data, predictor)?;
            }
            Filter::Lzw {
                predictor,
                early_change,
            } => {
                let mut params = Dictionary::new();
                params.set("EarlyChange", Object::Integer(*early_change));
                data = decompress("LZWDecode", Some(params), data)?;
                data = undo_predictor(data, predictor)?;
            }
            Filter::Ascii85 => {
                data = decompress("ASCII85Decode", None, data)?;
            }
            Filter::Dct => {
                if i + 1 != chain.len() {
                    return Err(NormalizeError::unsupported(
                        "DCTDecode followed by further filters",
                    ));
                }
                return Ok(FilterOutput::Jpeg(data));
            }
            Filter::Other(name) => {
                return Err(NormalizeError::unsupported(format!(
                    "Unsupported filter: {}",
                    name
                )));
            }
        }
    }

    Ok(FilterOutput::Raw(data))
}

/// Decode a content stream (page contents or a Form XObject body).
pub fn decode_content_stream(stream: &Stream) -> Result<Vec<u8>> {
    match apply_filters(&stream.dict, &stream.content)? {
        FilterOutput::Raw(data) => Ok(data),
        FilterOutput::Jpeg(_) => Err(NormalizeError::unsupported(
            "DCTDecode on a content stream",
        )),
    }
}

/// Run one lopdf-supported filter. Predictors are left in place.
fn decompress(name: &str, params: Option<Dictionary>, data: Vec<u8>) -> Result<Vec<u8>> {
    let mut dict = Dictionary::new();
    dict.set("Filter", Object::Name(name.as_bytes().to_vec()));
    if let Some(params) = params {
        dict.set("DecodeParms", Object::Dictionary(params));
    }
    Stream::new(dict, data)
        .decompressed_content()
        .map_err(|e| NormalizeError::unsupported(format!("Corrupt {} data: {}", name, e)))
}

pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| NormalizeError::Serialize(format!("Failed to compress data: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| NormalizeError::Serialize(format!("Failed to finish compression: {}", e)))
}

/// Reverse a TIFF (2) or PNG (10-15) predictor.
fn undo_predictor(data: Vec<u8>, p: &Predictor) -> Result<Vec<u8>> {
    match p.predictor {
        1 => Ok(data),
        2 => undo_tiff_predictor(data, p),
        10..=15 => Ok(undo_png_predictor(&data, p)),
        other => Err(NormalizeError::unsupported(format!(
            "Unsupported predictor: {}",
            other
        ))),
    }
}

fn undo_tiff_predictor(mut data: Vec<u8>, p: &Predictor) -> Result<Vec<u8>> {
    if p.bits_per_component != 8 {
        return Err(NormalizeError::unsupported(format!(
            "TIFF predictor with {} bits per component",
            p.bits_per_component
        )));
    }
    let row_len = p.colors * p.columns;
    for row in data.chunks_mut(row_len) {
        for i in p.colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - p.colors]);
        }
    }
    Ok(data)
}

fn undo_png_predictor(data: &[u8], p: &Predictor) -> Vec<u8> {
    let bpp = ((p.colors * p.bits_per_component + 7) / 8).max(1);
    let row_len = (p.colors * p.bits_per_component * p.columns + 7) / 8;
    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];

    for chunk in data.chunks(row_len + 1) {
        if chunk.len() < row_len + 1 {
            break;
        }
        let kind = chunk[0];
        let mut row = chunk[1..].to_vec();
        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            row[i] = match kind {
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                _ => row[i],
            };
        }
        out.extend_from_slice(&row);
        prev = row;
    }

    out
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flate_dict(params: Option<Dictionary>) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        if let Some(params) = params {
            dict.set("DecodeParms", Object::Dictionary(params));
        }
        dict
    }

    #[test]
    fn test_flate_without_predictor() {
        let raw = b"0 0 m 10 10 l S".to_vec();
        let compressed = deflate(&raw).unwrap();
        match apply_filters(&flate_dict(None), &compressed).unwrap() {
            FilterOutput::Raw(data) => assert_eq!(data, raw),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_png_up_and_sub_predictors() {
        // Two rows of 3 single-byte samples: [1,2,3] then [4,6,8]
        let encoded = vec![
            1, 1, 1, 1, // Sub: 1, 1+1, 2+1
            2, 3, 4, 5, // Up: 1+3, 2+4, 3+5
        ];
        let mut params = Dictionary::new();
        params.set("Predictor", Object::Integer(12));
        params.set("Columns", Object::Integer(3));
        let dict = flate_dict(Some(params));
        let compressed = deflate(&encoded).unwrap();
        match apply_filters(&dict, &compressed).unwrap() {
            FilterOutput::Raw(data) => assert_eq!(data, vec![1, 2, 3, 4, 6, 8]),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_png_paeth_predictor_rgb() {
        let p = Predictor {
            predictor: 15,
            colors: 3,
            bits_per_component: 8,
            columns: 2,
        };
        // Row 0 with filter None, row 1 with Paeth where every delta is zero.
        let data = vec![0, 10, 20, 30, 40, 50, 60, 4, 0, 0, 0, 0, 0, 0];
        let out = undo_png_predictor(&data, &p);
        assert_eq!(out, vec![10, 20, 30, 40, 50, 60, 10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_tiff_predictor() {
        let p = Predictor {
            predictor: 2,
            colors: 1,
            bits_per_component: 8,
            columns: 4,
        };
        let out = undo_tiff_predictor(vec![10, 1, 1, 1, 5, 5, 5, 5], &p).unwrap();
        assert_eq!(out, vec![10, 11, 12, 13, 5, 10, 15, 20]);
    }

    #[test]
    fn test_dct_must_be_last() {
        let mut dict = Dictionary::new();
        dict.set(
            "Filter",
            Object::Array(vec![
                Object::Name(b"DCTDecode".to_vec()),
                Object::Name(b"FlateDecode".to_vec()),
            ]),
        );
        let err = apply_filters(&dict, b"").unwrap_err();
        assert!(matches!(err, NormalizeError::UnsupportedEncoding(_)));
    }

    #[test]
    fn test_unknown_filter_is_unsupported() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"JBIG2Decode".to_vec()));
        let err = apply_filters(&dict, b"abc").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported encoding: Unsupported filter: JBIG2Decode");
    }

    #[test]
    fn test_ascii85_then_flate_chain() {
        let raw = b"q 1 0 0 1 0 0 cm /Im1 Do Q".to_vec();
        let compressed = deflate(&raw).unwrap();
        let mut dict = Dictionary::new();
        dict.set(
            "Filter",
            Object::Array(vec![
                Object::Name(b"ASCII85Decode".to_vec()),
                Object::Name(b"FlateDecode".to_vec()),
            ]),
        );
        let encoded = ascii85(&compressed);
        match apply_filters(&dict, &encoded).unwrap() {
            FilterOutput::Raw(data) => assert_eq!(data, raw),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_ascii85_content() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"A85".to_vec()));
        match apply_filters(&dict, b"0H`%lD'1Pe+>GPmC`lX~>").unwrap() {
            FilterOutput::Raw(data) => assert_eq!(data, b"0 0 m 10 10 l S"),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_lzw_with_early_change() {
        // Sample sequence from the LZWDecode description in the PDF reference
        let encoded = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"LZWDecode".to_vec()));
        assert!(matches!(
            filter_chain(&dict).as_slice(),
            [Filter::Lzw { early_change: 1, .. }]
        ));
        match apply_filters(&dict, &encoded).unwrap() {
            FilterOutput::Raw(data) => assert_eq!(data, b"-----A---B"),
            other => panic!("unexpected output {:?}", other),
        }
    }

    /// Minimal ASCII85 encoder for fixtures, with the `~>` terminator.
    fn ascii85(data: &[u8]) -> Vec<u8> {
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

    #[test]
    fn test_no_filter_passes_through() {
        match apply_filters(&Dictionary::new(), b"raw").unwrap() {
            FilterOutput::Raw(data) => assert_eq!(data, b"raw"),
            other => panic!("unexpected output {:?}", other),
        }
    }
}
