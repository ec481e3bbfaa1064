//! # Avatars
//!
//! Profile photos shown on the dashboard and member card.
//!
//! ## Compression
//! - The payload must sniff as PNG, JPEG, WebP or GIF, whatever the declared type says
//! - Anything up to the limit ([`MAX_AVATAR_BYTES`] by default) is stored as uploaded
//! - Larger images are downscaled so the longer edge is at most [`MAX_EDGE`] pixels,
//!   never upscaled, then re-encoded as JPEG
//! - JPEG quality 70 first, 50 if that is still too large, otherwise rejected
//!
//! ## Storage
//! Blobs are written under `{user_id}-{unix_millis}.{ext}` and referenced by public URL.
use std::{collections::HashMap, io::Cursor, sync::RwLock};

use async_trait::async_trait;
use image::{
    DynamicImage, GenericImageView, ImageFormat, codecs::jpeg::JpegEncoder, imageops::FilterType,
};
use thiserror::Error;

pub const MAX_AVATAR_BYTES: usize = 300 * 1024;
pub const MAX_EDGE: u32 = 400;
const QUALITIES: [u8; 2] = [70, 50];

#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("Expected an image, got {0}")]
    NotAnImage(String),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image is {size} bytes after compression, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Blob storage failed: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avatar {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub extension: &'static str,
}

/// Stored content type and file extension for the formats accepted as avatars.
fn stored_as(format: ImageFormat) -> Option<(&'static str, &'static str)> {
    match format {
        ImageFormat::Png => Some(("image/png", "png")),
        ImageFormat::Jpeg => Some(("image/jpeg", "jpg")),
        ImageFormat::WebP => Some(("image/webp", "webp")),
        ImageFormat::Gif => Some(("image/gif", "gif")),
        _ => None,
    }
}

/// Scales so the longer edge fits `MAX_EDGE`, keeping the aspect ratio.
fn fit(image: DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();

    if width.max(height) <= MAX_EDGE {
        return image;
    }

    image.resize(MAX_EDGE, MAX_EDGE, FilterType::Triangle)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, AvatarError> {
    let rgb = image.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());

    JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(&rgb)?;

    Ok(buffer.into_inner())
}

pub fn compress(bytes: &[u8], content_type: &str, limit: usize) -> Result<Avatar, AvatarError> {
    if !content_type.starts_with("image/") {
        return Err(AvatarError::NotAnImage(content_type.to_string()));
    }

    let format = image::guess_format(bytes)?;
    let (stored_type, extension) =
        stored_as(format).ok_or_else(|| AvatarError::NotAnImage(format!("{format:?}")))?;

    if bytes.len() <= limit {
        return Ok(Avatar {
            bytes: bytes.to_vec(),
            content_type: stored_type.to_string(),
            extension,
        });
    }

    let image = fit(image::load_from_memory_with_format(bytes, format)?);

    let mut smallest = usize::MAX;
    for quality in QUALITIES {
        let encoded = encode_jpeg(&image, quality)?;

        if encoded.len() <= limit {
            return Ok(Avatar {
                bytes: encoded,
                content_type: "image/jpeg".to_string(),
                extension: "jpg",
            });
        }
        smallest = smallest.min(encoded.len());
    }

    Err(AvatarError::TooLarge {
        size: smallest,
        limit,
    })
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the blob and returns its public URL.
    async fn put(&self, name: &str, avatar: Avatar) -> Result<String, AvatarError>;
}

pub struct MemoryBlobStore {
    base_url: String,
    blobs: RwLock<HashMap<String, Avatar>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Avatar> {
        self.blobs.read().ok()?.get(name).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, name: &str, avatar: Avatar) -> Result<String, AvatarError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|e| AvatarError::Storage(e.to_string()))?;

        if blobs.contains_key(name) {
            return Err(AvatarError::Storage(format!("{name} already exists")));
        }
        blobs.insert(name.to_string(), avatar);

        Ok(format!("{}/{name}", self.base_url))
    }
}
