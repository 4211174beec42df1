//! Image clean-up ahead of text recognition.
//!
//! Phone photos of receipts arrive rotated, oversized, unevenly lit and
//! noisy. The pipeline is: honour EXIF orientation, shrink to a bounded size,
//! then grayscale, blur lightly, stretch contrast and binarise with a local
//! (adaptive) mean threshold so shadows across the page do not swallow text.

use crate::error::Result;
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageFormat, ImageReader, Luma};
use std::io::Cursor;

pub const DEFAULT_MAX_DIMENSION: u32 = 2000;

const DENOISE_SIGMA: f32 = 0.8;
const THRESHOLD_BLOCK: u32 = 11;
const THRESHOLD_OFFSET: i64 = 2;
/// Share of darkest / brightest pixels clipped by the contrast stretch.
const STRETCH_CLIP: f64 = 0.01;

/// Decodes an uploaded image and rotates it upright according to its EXIF
/// orientation tag. Missing or unreadable EXIF data leaves the image as is.
pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder
        .orientation()
        .unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Scales the image down so neither side exceeds `max_dimension`, keeping the
/// aspect ratio. Images that already fit are returned untouched.
pub fn resize_to_fit(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width <= max_dimension && height <= max_dimension {
        return image;
    }

    let max = u64::from(max_dimension);
    let (new_width, new_height) = if width > height {
        (max, u64::from(height) * max / u64::from(width))
    } else {
        (u64::from(width) * max / u64::from(height), max)
    };

    image.resize_exact(
        new_width.max(1) as u32,
        new_height.max(1) as u32,
        FilterType::Lanczos3,
    )
}

/// Produces the binary image handed to the recogniser.
pub fn preprocess(image: &DynamicImage) -> GrayImage {
    let gray = image.to_luma8();
    let mut denoised = imageops::blur(&gray, DENOISE_SIGMA);
    stretch_contrast(&mut denoised);
    adaptive_threshold(&denoised, THRESHOLD_BLOCK, THRESHOLD_OFFSET)
}

/// Linearly maps the 1st..99th percentile of intensities onto 0..=255.
pub fn stretch_contrast(image: &mut GrayImage) {
    let total = u64::from(image.width()) * u64::from(image.height());
    if total == 0 {
        return;
    }

    let mut histogram = [0u64; 256];
    for Luma([value]) in image.pixels() {
        histogram[usize::from(*value)] += 1;
    }

    let clip = (total as f64 * STRETCH_CLIP) as u64;
    let low = percentile(&histogram, clip);
    let high = 255 - percentile_from_top(&histogram, clip);
    if high <= low {
        return;
    }

    let range = f64::from(high - low);
    for Luma([value]) in image.pixels_mut() {
        let clamped = (*value).clamp(low, high);
        *value = (f64::from(clamped - low) * 255.0 / range).round() as u8;
    }
}

fn percentile(histogram: &[u64; 256], clip: u64) -> u8 {
    let mut seen = 0;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen > clip {
            return value as u8;
        }
    }
    255
}

fn percentile_from_top(histogram: &[u64; 256], clip: u64) -> u8 {
    let mut seen = 0;
    for (offset, count) in histogram.iter().rev().enumerate() {
        seen += count;
        if seen > clip {
            return offset as u8;
        }
    }
    255
}

/// Marks a pixel white when it is brighter than the mean of its
/// `block`x`block` neighbourhood minus `offset`, black otherwise.
///
/// Neighbourhood sums come from a summed-area table, so the cost is constant
/// per pixel regardless of block size.
pub fn adaptive_threshold(image: &GrayImage, block: u32, offset: i64) -> GrayImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let radius = (block / 2) as usize;

    let stride = w + 1;
    let mut integral = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += u64::from(image.get_pixel(x as u32, y as u32)[0]);
            integral[(y + 1) * stride + (x + 1)] = integral[y * stride + (x + 1)] + row_sum;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let x0 = x.saturating_sub(radius);
        let y0 = y.saturating_sub(radius);
        let x1 = (x + radius + 1).min(w);
        let y1 = (y + radius + 1).min(h);

        let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
            - integral[y0 * stride + x1]
            - integral[y1 * stride + x0];
        let count = ((x1 - x0) * (y1 - y0)) as i64;
        let mean = sum as i64 / count;

        let value = i64::from(image.get_pixel(x as u32, y as u32)[0]);
        if value > mean - offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}
