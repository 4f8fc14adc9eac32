//! Canvas normalizer.
//!
//! Fits a decoded image into a fixed-size canvas: aspect-preserving Lanczos
//! resample, solid background fill, anchored composite. Works on plain pixel
//! buffers and knows nothing about PDF.

use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};

use crate::error::{NormalizeError, Result};

/// Where the scaled image sits on the canvas when it does not fill it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl Anchor {
    /// Offsets from the top-left corner given the free space on each axis.
    pub fn offsets(&self, free_x: u32, free_y: u32) -> (u32, u32) {
        let x = match self {
            Anchor::TopLeft | Anchor::Left | Anchor::BottomLeft => 0,
            Anchor::Top | Anchor::Center | Anchor::Bottom => free_x / 2,
            Anchor::TopRight | Anchor::Right | Anchor::BottomRight => free_x,
        };
        let y = match self {
            Anchor::TopLeft | Anchor::Top | Anchor::TopRight => 0,
            Anchor::Left | Anchor::Center | Anchor::Right => free_y / 2,
            Anchor::BottomLeft | Anchor::Bottom | Anchor::BottomRight => free_y,
        };
        (x, y)
    }
}

impl FromStr for Anchor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "topleft" => Ok(Anchor::TopLeft),
            "top" => Ok(Anchor::Top),
            "topright" => Ok(Anchor::TopRight),
            "left" => Ok(Anchor::Left),
            "center" | "centre" => Ok(Anchor::Center),
            "right" => Ok(Anchor::Right),
            "bottomleft" => Ok(Anchor::BottomLeft),
            "bottom" => Ok(Anchor::Bottom),
            "bottomright" => Ok(Anchor::BottomRight),
            _ => Err(format!("unknown anchor '{}'", s)),
        }
    }
}

/// Whether images smaller than the canvas are enlarged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalePolicy {
    /// Always scale to touch the canvas edge.
    #[default]
    Always,
    /// Never enlarge; small images are only padded.
    ShrinkOnly,
}

impl FromStr for ScalePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "always" => Ok(ScalePolicy::Always),
            "shrinkonly" => Ok(ScalePolicy::ShrinkOnly),
            _ => Err(format!("unknown scale policy '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasOptions {
    /// Opaque fill color (RGB).
    pub background: [u8; 3],
    pub anchor: Anchor,
    pub scale_policy: ScalePolicy,
}

impl Default for CanvasOptions {
    fn default() -> Self {
        CanvasOptions {
            background: [255, 255, 255],
            anchor: Anchor::Center,
            scale_policy: ScalePolicy::Always,
        }
    }
}

/// Geometry of a normalized canvas: where the scaled source ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasPlacement {
    pub source_width: u32,
    pub source_height: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Distance from the canvas' left edge.
    pub offset_x: u32,
    /// Distance from the canvas' top edge.
    pub offset_y: u32,
}

impl CanvasPlacement {
    pub fn compute(
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        anchor: Anchor,
        scale_policy: ScalePolicy,
    ) -> Result<Self> {
        if source_width == 0 || source_height == 0 {
            return Err(NormalizeError::invalid_source(format!(
                "Source dimensions {}x{}",
                source_width, source_height
            )));
        }
        if target_width == 0 || target_height == 0 {
            return Err(NormalizeError::InvalidOption(format!(
                "Canvas dimensions {}x{}",
                target_width, target_height
            )));
        }

        let mut scale = f64::min(
            target_width as f64 / source_width as f64,
            target_height as f64 / source_height as f64,
        );
        if scale_policy == ScalePolicy::ShrinkOnly {
            scale = scale.min(1.0);
        }

        let scaled = |source: u32, limit: u32| -> u32 {
            ((source as f64 * scale).round() as u32).clamp(1, limit)
        };
        let scaled_width = scaled(source_width, target_width);
        let scaled_height = scaled(source_height, target_height);
        let (offset_x, offset_y) =
            anchor.offsets(target_width - scaled_width, target_height - scaled_height);

        Ok(CanvasPlacement {
            source_width,
            source_height,
            target_width,
            target_height,
            scaled_width,
            scaled_height,
            offset_x,
            offset_y,
        })
    }

    /// The source fills the canvas without resampling.
    pub fn is_identity(&self) -> bool {
        self.scaled_width == self.source_width
            && self.scaled_height == self.source_height
            && self.scaled_width == self.target_width
            && self.scaled_height == self.target_height
    }

    fn needs_resample(&self) -> bool {
        self.scaled_width != self.source_width || self.scaled_height != self.source_height
    }
}

/// An opaque canvas of exactly the target size.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// `ImageLuma8` or `ImageRgb8`
    pub pixels: DynamicImage,
    pub placement: CanvasPlacement,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[cfg(test)]
    pub(crate) fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        NormalizedImage {
            pixels: DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color))),
            placement: CanvasPlacement {
                source_width: width,
                source_height: height,
                target_width: width,
                target_height: height,
                scaled_width: width,
                scaled_height: height,
                offset_x: 0,
                offset_y: 0,
            },
        }
    }
}

/// Fit `source` into a `target_width` x `target_height` canvas.
///
/// Translucent pixels are blended onto the background before resampling.
/// The result is grayscale when the source has no color and the background is
/// neutral, RGB otherwise.
pub fn normalize(
    source: &DynamicImage,
    target_width: u32,
    target_height: u32,
    options: &CanvasOptions,
) -> Result<NormalizedImage> {
    let placement = CanvasPlacement::compute(
        source.width(),
        source.height(),
        target_width,
        target_height,
        options.anchor,
        options.scale_policy,
    )?;

    let [r, g, b] = options.background;
    let gray_output = !source.color().has_color() && r == g && g == b;

    let pixels = if gray_output {
        let flat = flatten_gray(source, r);
        DynamicImage::ImageLuma8(compose(&flat, &placement, Luma([r])))
    } else {
        let flat = flatten_rgb(source, options.background);
        DynamicImage::ImageRgb8(compose(&flat, &placement, Rgb(options.background)))
    };

    log::debug!(
        "[Canvas] {}x{} -> {}x{} at ({}, {}) on {}x{}",
        placement.source_width,
        placement.source_height,
        placement.scaled_width,
        placement.scaled_height,
        placement.offset_x,
        placement.offset_y,
        target_width,
        target_height
    );

    Ok(NormalizedImage { pixels, placement })
}

fn blend(color: u8, alpha: u8, background: u8) -> u8 {
    let a = alpha as u32;
    ((color as u32 * a + background as u32 * (255 - a) + 127) / 255) as u8
}

fn flatten_rgb(source: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if !source.color().has_alpha() {
        return source.to_rgb8();
    }
    let rgba = source.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        Rgb([
            blend(r, a, background[0]),
            blend(g, a, background[1]),
            blend(b, a, background[2]),
        ])
    })
}

fn flatten_gray(source: &DynamicImage, background: u8) -> GrayImage {
    if !source.color().has_alpha() {
        return source.to_luma8();
    }
    let la = source.to_luma_alpha8();
    GrayImage::from_fn(la.width(), la.height(), |x, y| {
        let [l, a] = la.get_pixel(x, y).0;
        Luma([blend(l, a, background)])
    })
}

fn compose<P>(
    source: &ImageBuffer<P, Vec<u8>>,
    placement: &CanvasPlacement,
    fill: P,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let scaled = if placement.needs_resample() {
        imageops::resize(
            source,
            placement.scaled_width,
            placement.scaled_height,
            FilterType::Lanczos3,
        )
    } else {
        source.clone()
    };

    if placement.scaled_width == placement.target_width
        && placement.scaled_height == placement.target_height
    {
        return scaled;
    }

    let mut canvas = ImageBuffer::from_pixel(placement.target_width, placement.target_height, fill);
    imageops::replace(
        &mut canvas,
        &scaled,
        placement.offset_x as i64,
        placement.offset_y as i64,
    );
    canvas
}
