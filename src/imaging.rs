//! Image downscaling.  Uploads are shrunk to bound provider cost and latency,
//! then re-encoded as JPEG regardless of the input format.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),
    #[error("image I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("image worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOptions {
    /// Upper bound for both width and height, in pixels.
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for ResizeOptions {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downscaled {
    pub source: (u32, u32),
    pub output: (u32, u32),
    pub bytes: usize,
}

/// Target size that fits `(width, height)` inside a `max`×`max` box while
/// keeping the aspect ratio.  Never grows the image.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = f64::from(max) / f64::from(width.max(height));
    let w = (f64::from(width) * scale).round().max(1.0) as u32;
    let h = (f64::from(height) * scale).round().max(1.0) as u32;
    (w.min(max), h.min(max))
}

/// Decode `input`, shrink it if needed and encode it as JPEG.
pub fn downscale_bytes(
    input: &[u8],
    opts: ResizeOptions,
) -> Result<(Vec<u8>, Downscaled), TransformError> {
    let img = ImageReader::new(Cursor::new(input))
        .with_guessed_format()?
        .decode()
        .map_err(TransformError::Decode)?;
    let source = img.dimensions();
    let target = fit_within(source.0, source.1, opts.max_dimension);
    let img = if target == source {
        img
    } else {
        img.resize_exact(target.0, target.1, FilterType::Lanczos3)
    };

    let jpeg = encode_jpeg(&img, opts.jpeg_quality)?;
    let info = Downscaled {
        source,
        output: img.dimensions(),
        bytes: jpeg.len(),
    };
    Ok((jpeg, info))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, TransformError> {
    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(TransformError::Encode)?;
    Ok(out)
}

/// File-to-file variant.  Blocking; callers on the runtime go through
/// [`crate::staging::StagedUpload::downscale`].  Returns the encoded bytes as
/// well so the caller does not need to read `dst` back.
pub fn downscale_file(
    src: &Path,
    dst: &Path,
    opts: ResizeOptions,
) -> Result<(Vec<u8>, Downscaled), TransformError> {
    let input = std::fs::read(src)?;
    let (jpeg, info) = downscale_bytes(&input, opts)?;
    std::fs::write(dst, &jpeg)?;
    Ok((jpeg, info))
}
