//! Best-effort image re-encoding: JPEG compression and thumbnails.
//!
//! Decoding and encoding run on tokio's blocking pool and every attempt is
//! bounded by a timeout. A failed transform is logged with its
//! skip reason; `compress` then keeps the original and `make_thumbnail`
//! gives up.

use std::io::Cursor;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use thiserror::Error;

use crate::codec::{encode_to_binary, Binary};
use crate::config::ImageConfig;

pub const JPEG_MIME: &str = "image/jpeg";

/// Either form an image can arrive in.
#[derive(Debug, Clone, Copy)]
pub enum ImageInput<'a> {
    DataUri(&'a str),
    Binary(&'a Binary),
}

impl ImageInput<'_> {
    fn to_binary(self) -> Option<Binary> {
        match self {
            ImageInput::DataUri(uri) => encode_to_binary(uri),
            ImageInput::Binary(binary) => Some(binary.clone()),
        }
    }
}

impl<'a> From<&'a Binary> for ImageInput<'a> {
    fn from(binary: &'a Binary) -> Self {
        ImageInput::Binary(binary)
    }
}

impl<'a> From<&'a str> for ImageInput<'a> {
    fn from(uri: &'a str) -> Self {
        ImageInput::DataUri(uri)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
enum SkipReason {
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("image could not be encoded: {0}")]
    Encode(String),
    #[error("image transform timed out after {0:?}")]
    Timeout(Duration),
    #[error("image worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transform {
    Encoded(Binary),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy)]
struct Reencode {
    quality: u8,
    max_edge: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ImagePipeline {
    config: ImageConfig,
}

impl ImagePipeline {
    pub fn new(config: ImageConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Re-encode as JPEG at `quality`, optionally capping the longest edge.
    ///
    /// Falls back to the original image when it cannot be transformed;
    /// `None` only when the input is not an image payload at all.
    pub async fn compress(
        &self,
        input: ImageInput<'_>,
        quality: u8,
        max_edge: Option<u32>,
    ) -> Option<Binary> {
        let original = input.to_binary()?;
        match self
            .transform(original.clone(), Reencode { quality, max_edge })
            .await
        {
            Transform::Encoded(binary) => Some(binary),
            Transform::Skipped(reason) => {
                tracing::warn!(
                    target: "cuisto",
                    event = "image_transform_skipped",
                    op = "compress",
                    mime = %original.mime,
                    reason = %reason
                );
                Some(original)
            }
        }
    }

    /// Downscale so neither side exceeds `max_edge`; `None` on any failure.
    pub async fn make_thumbnail(&self, input: ImageInput<'_>, max_edge: u32) -> Option<Binary> {
        let original = input.to_binary()?;
        let op = Reencode {
            quality: self.config.thumbnail_quality,
            max_edge: Some(max_edge),
        };
        match self.transform(original, op).await {
            Transform::Encoded(binary) => Some(binary),
            Transform::Skipped(reason) => {
                tracing::warn!(
                    target: "cuisto",
                    event = "image_transform_skipped",
                    op = "thumbnail",
                    reason = %reason
                );
                None
            }
        }
    }

    async fn transform(&self, source: Binary, op: Reencode) -> Transform {
        let limit = self.config.decode_timeout();
        let work = tokio::task::spawn_blocking(move || reencode(&source.bytes, op));
        match tokio::time::timeout(limit, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Transform::Skipped(SkipReason::Worker(join_err.to_string())),
            Err(_) => Transform::Skipped(SkipReason::Timeout(limit)),
        }
    }
}

impl Default for ImagePipeline {
    fn default() -> Self {
        Self::new(ImageConfig::default())
    }
}

fn reencode(bytes: &[u8], op: Reencode) -> Transform {
    let decoded = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(err) => return Transform::Skipped(SkipReason::Decode(err.to_string())),
    };
    let resized = match op.max_edge {
        Some(max_edge) => {
            let (w, h) = fit_within(decoded.width(), decoded.height(), max_edge);
            if (w, h) == (decoded.width(), decoded.height()) {
                decoded
            } else {
                decoded.resize_exact(w, h, FilterType::Triangle)
            }
        }
        None => decoded,
    };
    match encode_jpeg(&resized, op.quality) {
        Ok(bytes) => Transform::Encoded(Binary::new(JPEG_MIME, bytes)),
        Err(err) => Transform::Skipped(SkipReason::Encode(err.to_string())),
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    // JPEG has no alpha channel; flatten to RGB first.
    let rgb = img.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(out.into_inner())
}

/// Largest size with the same aspect ratio where neither side exceeds
/// `max_edge`. Never upscales and never returns a zero dimension.
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let max_edge = max_edge.max(1);
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }
    let (w, h) = (u64::from(width), u64::from(height));
    let edge = u64::from(max_edge);
    if w >= h {
        let scaled = ((h * edge + w / 2) / w).max(1);
        (max_edge, scaled as u32)
    } else {
        let scaled = ((w * edge + h / 2) / h).max(1);
        (scaled as u32, max_edge)
    }
}
