//! Client-side image downscaling.
//!
//! Shrinks oversized images to the configured pixel bounds and byte budget
//! before they are staged for upload. Non-image payloads pass through
//! unchanged. The byte budget is the sole trigger for recompression.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, Limits};
use thiserror::Error;

/// Maximum payload we will attempt to decode (20 MB).
const MAX_DECODABLE_SIZE: usize = 20 * 1024 * 1024;

/// Maximum source dimension (width or height) to prevent decompression bombs.
const MAX_IMAGE_DIMENSION: u32 = 16384;

/// JPEG quality for the first encode pass.
const INITIAL_JPEG_QUALITY: u8 = 90;

/// JPEG quality for the single byte-budget retry.
const RETRY_JPEG_QUALITY: u8 = 70;

/// Errors from one preprocessing run. Always scoped to a single file; a
/// failing file never aborts its siblings.
#[derive(Error, Debug)]
pub enum PreprocessError {
    /// Payload exceeds what we are willing to decode.
    #[error("File too large to decode: {0} bytes")]
    TooLarge(usize),
    /// MIME type has no decoder.
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    /// Source could not be decoded.
    #[error("Image decode failed: {0}")]
    DecodeFailed(String),
    /// Re-encoding the downscaled image failed.
    #[error("Image encoding failed: {0}")]
    EncodeFailed(String),
    /// The background preprocessing task died.
    #[error("Preprocessing task failed: {0}")]
    TaskFailed(String),
}

/// Pixel and byte budgets for one downscale run.
#[derive(Debug, Clone, Copy)]
pub struct ResizeTarget {
    /// Maximum output width in pixels.
    pub max_width: u32,
    /// Maximum output height in pixels.
    pub max_height: u32,
    /// Byte budget for the encoded output.
    pub max_bytes: u64,
}

/// Output of one preprocessing run.
#[derive(Debug, Clone)]
pub struct ProcessedBlob {
    /// Encoded payload, possibly identical to the input.
    pub data: Vec<u8>,
    /// Output MIME type (the source type is preserved).
    pub mime_type: String,
    /// Output dimensions, when the payload was decoded as an image.
    pub width: Option<u32>,
    /// See `width`.
    pub height: Option<u32>,
    /// Whether the payload was re-rendered.
    pub resized: bool,
}

/// Downscale and recompress one blob to fit `target`.
///
/// Non-image MIME types bypass unchanged, as do animated GIFs (re-rendering
/// would drop frames). Aspect ratio is preserved and images are never
/// upscaled. If the encoded output still exceeds the byte budget, a single
/// retry at [`RETRY_JPEG_QUALITY`] is made for formats with a quality knob;
/// the result is returned either way since the server check is authoritative.
///
/// This function is CPU-bound and should be called inside `spawn_blocking`.
pub fn process_blob(
    data: &[u8],
    mime_type: &str,
    target: ResizeTarget,
) -> Result<ProcessedBlob, PreprocessError> {
    if !mime_type.starts_with("image/") {
        return Ok(bypass(data, mime_type));
    }

    if data.len() > MAX_DECODABLE_SIZE {
        return Err(PreprocessError::TooLarge(data.len()));
    }

    let format = mime_to_format(mime_type)?;
    if format == ImageFormat::Gif {
        return Ok(bypass(data, mime_type));
    }

    // Enforce dimension limits during decode (a small compressed file can
    // expand to enormous RGBA buffers)
    let mut reader = ImageReader::with_format(Cursor::new(data), format);
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
    reader.limits(limits);

    let img = reader
        .decode()
        .map_err(|e| PreprocessError::DecodeFailed(e.to_string()))?;

    let (width, height) = img.dimensions();
    let within_bounds = width <= target.max_width && height <= target.max_height;

    if within_bounds && data.len() as u64 <= target.max_bytes {
        return Ok(ProcessedBlob {
            data: data.to_vec(),
            mime_type: mime_type.to_string(),
            width: Some(width),
            height: Some(height),
            resized: false,
        });
    }

    // Shrink the longer dimension to its bound; never upscale
    let scaled = if within_bounds {
        img
    } else {
        img.resize(target.max_width, target.max_height, FilterType::Lanczos3)
    };
    let (out_width, out_height) = scaled.dimensions();

    let mut encoded = encode(&scaled, format, INITIAL_JPEG_QUALITY)?;
    if encoded.len() as u64 > target.max_bytes && format == ImageFormat::Jpeg {
        encoded = encode(&scaled, format, RETRY_JPEG_QUALITY)?;
    }

    Ok(ProcessedBlob {
        data: encoded,
        mime_type: mime_type.to_string(),
        width: Some(out_width),
        height: Some(out_height),
        resized: true,
    })
}

fn bypass(data: &[u8], mime_type: &str) -> ProcessedBlob {
    ProcessedBlob {
        data: data.to_vec(),
        mime_type: mime_type.to_string(),
        width: None,
        height: None,
        resized: false,
    }
}

/// Map MIME type to `image` crate format.
fn mime_to_format(mime_type: &str) -> Result<ImageFormat, PreprocessError> {
    match mime_type {
        "image/png" => Ok(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Ok(ImageFormat::Jpeg),
        "image/gif" => Ok(ImageFormat::Gif),
        "image/webp" => Ok(ImageFormat::WebP),
        other => Err(PreprocessError::UnsupportedFormat(other.to_string())),
    }
}

/// Encode in the source format, applying `quality` where the format has one.
fn encode(
    img: &DynamicImage,
    format: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Cursor::new(Vec::new());
    if format == ImageFormat::Jpeg {
        let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        // JPEG has no alpha channel
        img.to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|e| PreprocessError::EncodeFailed(e.to_string()))?;
    } else {
        img.write_to(&mut buf, format)
            .map_err(|e| PreprocessError::EncodeFailed(e.to_string()))?;
    }
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a solid-color PNG in memory.
    fn create_test_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn wide_target() -> ResizeTarget {
        ResizeTarget {
            max_width: 800,
            max_height: 600,
            max_bytes: u64::MAX,
        }
    }

    fn decode_dimensions(data: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory(data).unwrap();
        img.dimensions()
    }

    #[test]
    fn test_matching_ratio_hits_bounds_exactly() {
        let data = create_test_png(4000, 3000);
        let result = process_blob(&data, "image/png", wide_target()).unwrap();

        assert!(result.resized);
        assert_eq!((result.width, result.height), (Some(800), Some(600)));
        assert_eq!(decode_dimensions(&result.data), (800, 600));
    }

    #[test]
    fn test_wide_image_preserves_aspect_ratio() {
        let data = create_test_png(4000, 2000);
        let result = process_blob(&data, "image/png", wide_target()).unwrap();

        assert_eq!((result.width, result.height), (Some(800), Some(400)));
        assert_eq!(decode_dimensions(&result.data), (800, 400));
    }

    #[test]
    fn test_small_image_never_upscaled() {
        let data = create_test_png(100, 50);
        let result = process_blob(&data, "image/png", wide_target()).unwrap();

        assert!(!result.resized);
        assert_eq!((result.width, result.height), (Some(100), Some(50)));
        assert_eq!(result.data, data);
    }

    #[test]
    fn test_non_image_bypasses_unchanged() {
        let data = b"%PDF-1.4 not an image".to_vec();
        let result = process_blob(&data, "application/pdf", wide_target()).unwrap();

        assert!(!result.resized);
        assert_eq!(result.data, data);
        assert_eq!(result.mime_type, "application/pdf");
        assert_eq!(result.width, None);
    }

    #[test]
    fn test_undecodable_image_fails() {
        let err = process_blob(b"not a png at all", "image/png", wide_target());
        assert!(matches!(err, Err(PreprocessError::DecodeFailed(_))));
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let err = process_blob(b"fake", "image/tiff", wide_target());
        assert!(matches!(err, Err(PreprocessError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_byte_budget_triggers_jpeg_retry() {
        // Noise compresses poorly, so the first pass overshoots a tiny budget
        let mut img = image::RgbImage::new(600, 600);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = image::Rgb([
                (x * 7 % 256) as u8,
                (y * 13 % 256) as u8,
                ((x + y) * 31 % 256) as u8,
            ]);
        }
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Jpeg)
            .unwrap();
        let data = buf.into_inner();

        let target = ResizeTarget {
            max_width: 400,
            max_height: 400,
            max_bytes: 1,
        };
        let lowq = process_blob(&data, "image/jpeg", target).unwrap();

        let generous = ResizeTarget {
            max_width: 400,
            max_height: 400,
            max_bytes: u64::MAX,
        };
        let highq = process_blob(&data, "image/jpeg", generous).unwrap();

        // Retry at lower quality must not grow the output
        assert!(lowq.data.len() <= highq.data.len());
        assert_eq!(decode_dimensions(&lowq.data), (400, 400));
    }
}
