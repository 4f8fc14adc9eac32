//! Image codec adapter.
//!
//! Turns an extracted image XObject into a pixel buffer and a normalized
//! canvas back into stream bytes. Both directions are pure functions of their
//! inputs, so they can run on any worker.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};

use crate::canvas::NormalizedImage;
use crate::error::{NormalizeError, Result};
use crate::filters::{self, FilterOutput};
use crate::reader::{ImageObject, Mask};
use crate::EncodingPolicy;

/// Image color space, resolved against the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed {
        base: Box<ColorSpace>,
        hival: u8,
        lookup: Vec<u8>,
    },
    /// No `/ColorSpace` entry; only valid when the bitstream carries its own.
    Unspecified,
    Unsupported(String),
}

impl ColorSpace {
    /// Samples per pixel in the stream.
    pub fn components(&self) -> Option<usize> {
        match self {
            ColorSpace::Gray | ColorSpace::Indexed { .. } => Some(1),
            ColorSpace::Rgb => Some(3),
            ColorSpace::Cmyk => Some(4),
            ColorSpace::Unspecified | ColorSpace::Unsupported(_) => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ColorSpace::Gray => "DeviceGray".to_string(),
            ColorSpace::Rgb => "DeviceRGB".to_string(),
            ColorSpace::Cmyk => "DeviceCMYK".to_string(),
            ColorSpace::Indexed { base, .. } => format!("Indexed({})", base.name()),
            ColorSpace::Unspecified => "Unspecified".to_string(),
            ColorSpace::Unsupported(name) => name.clone(),
        }
    }
}

/// Compression class of the original samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Lossy,
    Lossless,
}

/// Pixels of one image XObject, with its soft mask or `/Mask` folded into alpha.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: DynamicImage,
    pub source_encoding: SourceEncoding,
    pub has_mask: bool,
}

/// Stream encoding to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredEncoding {
    Jpeg { quality: u8 },
    Flate,
}

impl PreferredEncoding {
    /// Pick the output encoding for a decoded image under a policy.
    ///
    /// `MatchSource` keeps JPEG for opaque JPEG sources and goes lossless for
    /// everything else, including anything that had a soft mask.
    pub fn choose(decoded: &DecodedImage, policy: EncodingPolicy, quality: u8) -> Self {
        match policy {
            EncodingPolicy::Lossless => PreferredEncoding::Flate,
            EncodingPolicy::Jpeg => PreferredEncoding::Jpeg { quality },
            EncodingPolicy::MatchSource => {
                if decoded.source_encoding == SourceEncoding::Lossy && !decoded.has_mask {
                    PreferredEncoding::Jpeg { quality }
                } else {
                    PreferredEncoding::Flate
                }
            }
        }
    }

    pub fn filter_name(&self) -> &'static str {
        match self {
            PreferredEncoding::Jpeg { .. } => "DCTDecode",
            PreferredEncoding::Flate => "FlateDecode",
        }
    }
}

/// Encoded samples ready to become an image stream.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub encoding: PreferredEncoding,
    /// `DeviceGray` or `DeviceRGB`
    pub color_space: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Decode an image XObject into pixels.
///
/// `/Decode` is applied to the samples, and a soft mask or `/Mask` becomes
/// alpha. A soft mask takes precedence over `/Mask`.
pub fn decode(image: &ImageObject) -> Result<DecodedImage> {
    if image.width == 0 || image.height == 0 {
        return Err(NormalizeError::invalid_source(format!(
            "Declared dimensions {}x{}",
            image.width, image.height
        )));
    }
    if image.image_mask {
        return Err(NormalizeError::unsupported("Stencil image masks"));
    }

    let (pixels, source_encoding) = decode_samples(image)?;
    let (width, height) = (pixels.width(), pixels.height());

    let alpha = match (image.soft_mask.as_deref(), &image.mask) {
        (Some(soft_mask), _) => Some(decode_soft_mask(soft_mask, width, height)?),
        (None, Some(Mask::Stencil(stencil))) => Some(decode_stencil_mask(stencil, width, height)?),
        (None, Some(Mask::ColorKey(ranges))) => Some(color_key_alpha(image, ranges)?),
        (None, None) => None,
    };

    Ok(match alpha {
        Some(alpha) => DecodedImage {
            pixels: with_alpha(pixels, &alpha),
            source_encoding,
            has_mask: true,
        },
        None => DecodedImage {
            pixels,
            source_encoding,
            has_mask: false,
        },
    })
}

fn decode_samples(image: &ImageObject) -> Result<(DynamicImage, SourceEncoding)> {
    match filters::apply_filters(&image.dict, &image.content)? {
        FilterOutput::Jpeg(data) => {
            let img = image::load_from_memory_with_format(&data, ImageFormat::Jpeg)
                .map_err(|e| NormalizeError::unsupported(format!("Failed to decode JPEG image: {}", e)))?;
            if (img.width(), img.height()) != (image.width, image.height) {
                log::debug!(
                    "[Codec] JPEG {:?} is {}x{}, dictionary declares {}x{}",
                    image.id,
                    img.width(),
                    img.height(),
                    image.width,
                    image.height
                );
            }
            let img = match non_default_decode(image) {
                Some(decode) => decode_jpeg_samples(img, &image.color_space, decode)?,
                None => img,
            };
            Ok((img, SourceEncoding::Lossy))
        }
        FilterOutput::Raw(data) => {
            let img = samples_to_image(
                &data,
                image.width,
                image.height,
                image.bits_per_component,
                &image.color_space,
                non_default_decode(image),
            )?;
            Ok((img, SourceEncoding::Lossless))
        }
    }
}

/// The image's `/Decode` array, unless it is absent or the identity mapping.
fn non_default_decode(image: &ImageObject) -> Option<&[f32]> {
    let decode = image.decode.as_deref()?;
    let default_max = match image.color_space {
        ColorSpace::Indexed { .. } => ((1u32 << image.bits_per_component.min(16)) - 1) as f32,
        _ => 1.0,
    };
    let identity = decode
        .chunks(2)
        .all(|range| range.len() == 2 && range[0] == 0.0 && range[1] == default_max);
    (!identity).then_some(decode)
}

/// Map 8-bit samples through `/Decode` ranges, component by component.
fn apply_decode(samples: &mut [u8], components: usize, decode: &[f32]) -> Result<()> {
    if decode.len() < components * 2 {
        return Err(NormalizeError::invalid_source(format!(
            "Decode array has {} entries for {} components",
            decode.len(),
            components
        )));
    }
    for pixel in samples.chunks_mut(components) {
        for (c, sample) in pixel.iter_mut().enumerate() {
            let (d_min, d_max) = (decode[2 * c], decode[2 * c + 1]);
            let value = d_min + (*sample as f32 / 255.0) * (d_max - d_min);
            *sample = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
    Ok(())
}

/// Apply `/Decode` to a decoded JPEG when its channels match the color space.
fn decode_jpeg_samples(img: DynamicImage, color_space: &ColorSpace, decode: &[f32]) -> Result<DynamicImage> {
    match color_space {
        ColorSpace::Gray => {
            let mut gray = img.to_luma8();
            apply_decode(&mut gray, 1, decode)?;
            Ok(DynamicImage::ImageLuma8(gray))
        }
        ColorSpace::Rgb => {
            let mut rgb = img.to_rgb8();
            apply_decode(&mut rgb, 3, decode)?;
            Ok(DynamicImage::ImageRgb8(rgb))
        }
        other => Err(NormalizeError::unsupported(format!(
            "Decode array on a {} JPEG",
            other.name()
        ))),
    }
}

/// Decode an SMask stream (grayscale alpha channel), resampled to the base size
fn decode_soft_mask(mask: &ImageObject, width: u32, height: u32) -> Result<GrayImage> {
    let mut mask = mask.clone();
    mask.color_space = ColorSpace::Gray;
    let (pixels, _) = decode_samples(&mask)
        .map_err(|e| NormalizeError::unsupported(format!("Soft mask {:?}: {}", mask.id, e)))?;
    Ok(fit_mask(pixels.to_luma8(), width, height))
}

/// Decode an explicit `/Mask` stream into alpha: painted samples are opaque.
fn decode_stencil_mask(mask: &ImageObject, width: u32, height: u32) -> Result<GrayImage> {
    let mut mask = mask.clone();
    mask.color_space = ColorSpace::Gray;
    mask.bits_per_component = 1;
    let (pixels, _) = decode_samples(&mask)
        .map_err(|e| NormalizeError::unsupported(format!("Mask {:?}: {}", mask.id, e)))?;
    let mut alpha = pixels.to_luma8();
    image::imageops::invert(&mut alpha);
    Ok(fit_mask(alpha, width, height))
}

fn fit_mask(alpha: GrayImage, width: u32, height: u32) -> GrayImage {
    if alpha.dimensions() == (width, height) {
        alpha
    } else {
        image::imageops::resize(
            &alpha,
            width,
            height,
            image::imageops::FilterType::Triangle,
        )
    }
}

/// Alpha from color-key ranges: pixels whose raw samples all fall inside the
/// ranges are transparent.
fn color_key_alpha(image: &ImageObject, ranges: &[u32]) -> Result<GrayImage> {
    let components = image.color_space.components().unwrap_or(1);
    if ranges.len() != components * 2 {
        return Err(NormalizeError::invalid_source(format!(
            "Color-key Mask has {} entries for {} components",
            ranges.len(),
            components
        )));
    }
    if image.bits_per_component > 8 {
        return Err(NormalizeError::unsupported(format!(
            "Color-key Mask on {} bits per component",
            image.bits_per_component
        )));
    }
    let FilterOutput::Raw(data) = filters::apply_filters(&image.dict, &image.content)? else {
        return Err(NormalizeError::unsupported("Color-key Mask on a DCTDecode image"));
    };
    let samples = unpack_samples(
        &data,
        image.width as usize,
        image.height as usize,
        components,
        image.bits_per_component,
        false,
    )?;
    let alpha = samples
        .chunks(components)
        .map(|pixel| {
            let keyed = pixel.iter().enumerate().all(|(c, sample)| {
                (ranges[2 * c]..=ranges[2 * c + 1]).contains(&(*sample as u32))
            });
            if keyed {
                0
            } else {
                255
            }
        })
        .collect();
    GrayImage::from_raw(image.width, image.height, alpha)
        .ok_or_else(|| NormalizeError::invalid_source("Color-key Mask size mismatch"))
}

fn with_alpha(pixels: DynamicImage, alpha: &GrayImage) -> DynamicImage {
    let rgb = pixels.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut rgba = RgbaImage::new(width, height);
    for ((out, pixel), a) in rgba.pixels_mut().zip(rgb.pixels()).zip(alpha.pixels()) {
        out.0 = [pixel[0], pixel[1], pixel[2], a[0]];
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Expand packed samples into 8-bit values, one row at a time.
///
/// Indexed samples keep their raw index; everything else is scaled to 0-255.
fn unpack_samples(
    data: &[u8],
    width: usize,
    height: usize,
    components: usize,
    bits: u32,
    scale: bool,
) -> Result<Vec<u8>> {
    let samples_per_row = width
        .checked_mul(components)
        .ok_or_else(|| NormalizeError::invalid_source("Image row too large"))?;
    let row_bytes = (samples_per_row * bits as usize + 7) / 8;
    let expected = row_bytes
        .checked_mul(height)
        .ok_or_else(|| NormalizeError::invalid_source("Image too large"))?;
    if data.len() < expected {
        return Err(NormalizeError::invalid_source(format!(
            "Sample data size mismatch: got {} expected {}",
            data.len(),
            expected
        )));
    }

    let mut out = Vec::with_capacity(samples_per_row * height);
    match bits {
        8 => {
            for row in data[..expected].chunks(row_bytes) {
                out.extend_from_slice(&row[..samples_per_row]);
            }
        }
        16 => {
            for row in data[..expected].chunks(row_bytes) {
                out.extend(row.chunks(2).take(samples_per_row).map(|pair| pair[0]));
            }
        }
        1 | 2 | 4 => {
            let max = (1u32 << bits) - 1;
            let per_byte = 8 / bits as usize;
            for row in data[..expected].chunks(row_bytes) {
                for i in 0..samples_per_row {
                    let byte = row[i / per_byte];
                    let shift = 8 - bits as usize * (i % per_byte + 1);
                    let value = (byte as u32 >> shift) & max;
                    out.push(if scale { (value * 255 / max) as u8 } else { value as u8 });
                }
            }
        }
        other => {
            return Err(NormalizeError::unsupported(format!(
                "{} bits per component",
                other
            )))
        }
    }
    Ok(out)
}

fn cmyk_to_rgb(chunk: &[u8]) -> [u8; 3] {
    let c = chunk[0] as f32 / 255.0;
    let m = chunk[1] as f32 / 255.0;
    let y = chunk[2] as f32 / 255.0;
    let k = chunk[3] as f32 / 255.0;
    [
        ((1.0 - c) * (1.0 - k) * 255.0).round() as u8,
        ((1.0 - m) * (1.0 - k) * 255.0).round() as u8,
        ((1.0 - y) * (1.0 - k) * 255.0).round() as u8,
    ]
}

/// Map raw palette indices through a `/Decode` range.
fn decode_indices(samples: &mut [u8], bits: u32, hival: u8, decode: &[f32]) -> Result<()> {
    let [d_min, d_max, ..] = decode else {
        return Err(NormalizeError::invalid_source("Decode array too short for Indexed"));
    };
    let max = ((1u32 << bits.min(8)) - 1) as f32;
    for index in samples.iter_mut() {
        let value = d_min + *index as f32 * (d_max - d_min) / max;
        *index = value.round().clamp(0.0, hival as f32) as u8;
    }
    Ok(())
}

/// Palette color for an index; out-of-range indices use the last entry.
fn palette_entry(lookup: &[u8], hival: u8, components: usize, index: u8) -> &[u8] {
    let start = index.min(hival) as usize * components;
    lookup.get(start..start + components).unwrap_or(&[])
}

/// Convert raw pixel data to a DynamicImage based on color space
fn samples_to_image(
    data: &[u8],
    width: u32,
    height: u32,
    bits: u32,
    color_space: &ColorSpace,
    decode: Option<&[f32]>,
) -> Result<DynamicImage> {
    let components = color_space.components().ok_or_else(|| {
        NormalizeError::unsupported(format!("Unsupported color space: {}", color_space.name()))
    })?;
    let indexed = matches!(color_space, ColorSpace::Indexed { .. });
    let mut samples = unpack_samples(
        data,
        width as usize,
        height as usize,
        components,
        bits,
        !indexed,
    )?;
    match (decode, color_space) {
        (None, _) => {}
        (Some(decode), ColorSpace::Indexed { hival, .. }) => {
            decode_indices(&mut samples, bits, *hival, decode)?
        }
        (Some(decode), _) => apply_decode(&mut samples, components, decode)?,
    }
    let size_error = || NormalizeError::invalid_source("Failed to create image from raw data");

    match color_space {
        ColorSpace::Gray => Ok(DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, samples).ok_or_else(size_error)?,
        )),
        ColorSpace::Rgb => Ok(DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, samples).ok_or_else(size_error)?,
        )),
        ColorSpace::Cmyk => {
            let rgb: Vec<u8> = samples.chunks(4).flat_map(cmyk_to_rgb).collect();
            Ok(DynamicImage::ImageRgb8(
                RgbImage::from_raw(width, height, rgb).ok_or_else(size_error)?,
            ))
        }
        ColorSpace::Indexed {
            base,
            hival,
            lookup,
        } => {
            let base_components = base.components().unwrap_or(1);
            let entry = |index: u8| palette_entry(lookup, *hival, base_components, index);
            match base.as_ref() {
                ColorSpace::Gray => {
                    let gray = samples
                        .iter()
                        .map(|i| entry(*i).first().copied().unwrap_or(0))
                        .collect();
                    Ok(DynamicImage::ImageLuma8(
                        GrayImage::from_raw(width, height, gray).ok_or_else(size_error)?,
                    ))
                }
                ColorSpace::Rgb | ColorSpace::Cmyk => {
                    let mut rgb = Vec::with_capacity(samples.len() * 3);
                    for index in &samples {
                        let color = entry(*index);
                        match (base.as_ref(), color.len()) {
                            (ColorSpace::Rgb, 3) => rgb.extend_from_slice(color),
                            (ColorSpace::Cmyk, 4) => rgb.extend_from_slice(&cmyk_to_rgb(color)),
                            _ => rgb.extend_from_slice(&[0, 0, 0]),
                        }
                    }
                    Ok(DynamicImage::ImageRgb8(
                        RgbImage::from_raw(width, height, rgb).ok_or_else(size_error)?,
                    ))
                }
                other => Err(NormalizeError::unsupported(format!(
                    "Indexed over {}",
                    other.name()
                ))),
            }
        }
        ColorSpace::Unspecified | ColorSpace::Unsupported(_) => Err(NormalizeError::unsupported(
            format!("Unsupported color space: {}", color_space.name()),
        )),
    }
}

/// Encode a normalized canvas as image stream bytes.
pub fn encode(image: &NormalizedImage, preferred: PreferredEncoding) -> Result<EncodedImage> {
    let (raw, width, height, color_space) = match &image.pixels {
        DynamicImage::ImageLuma8(gray) => {
            let (w, h) = gray.dimensions();
            (gray.as_raw().clone(), w, h, "DeviceGray")
        }
        other => {
            let rgb = other.to_rgb8();
            let (w, h) = rgb.dimensions();
            (rgb.into_raw(), w, h, "DeviceRGB")
        }
    };

    let data = match preferred {
        PreferredEncoding::Jpeg { quality } => {
            encode_jpeg(&raw, width, height, color_space == "DeviceGray", quality)?
        }
        PreferredEncoding::Flate => filters::deflate(&raw)
            .map_err(|e| NormalizeError::unsupported(format!("Failed to compress samples: {}", e)))?,
    };

    Ok(EncodedImage {
        data,
        encoding: preferred,
        color_space,
        width,
        height,
    })
}

fn encode_jpeg(raw: &[u8], width: u32, height: u32, gray: bool, quality: u8) -> Result<Vec<u8>> {
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(NormalizeError::unsupported(format!(
            "{}x{} exceeds the JPEG size limit",
            width, height
        )));
    };

    let mut jpeg_bytes = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
    let color_type = if gray {
        jpeg_encoder::ColorType::Luma
    } else {
        encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
        jpeg_encoder::ColorType::Rgb
    };
    encoder
        .encode(raw, w, h, color_type)
        .map_err(|e| NormalizeError::unsupported(format!("Failed to encode JPEG: {}", e)))?;
    Ok(jpeg_bytes)
}

/// Convenience for building a solid single-channel mask.
#[cfg(test)]
pub(crate) fn solid_mask(width: u32, height: u32, value: u8) -> GrayImage {
    GrayImage::from_pixel(width, height, image::Luma([value]))
}
