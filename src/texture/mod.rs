// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Texture images, cropping and atlas packing

mod atlas;
mod crop;
mod packer;

pub use atlas::{AtlasBuilder, AtlasOptions, AtlasReport};
pub use crop::crop_surface_textures;
pub use packer::{pack, PackResult, PackerOptions, PackingAlgorithm, Placement};

use crate::error::Result;
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use tracing::warn;

/// Texture content owned by an export context
#[derive(Debug, Clone)]
pub enum TextureImage {
    /// Decoded raster; `source` keeps the original encoding while untouched
    Decoded {
        image: RgbaImage,
        source: Option<Vec<u8>>,
    },
    /// Blob the image decoder could not read, exported as-is
    Unsupported(Vec<u8>),
}

impl TextureImage {
    /// Decode a blob, keeping it as pass-through when decoding fails.
    pub fn decode(bytes: Vec<u8>, uri: &str) -> Self {
        match image::load_from_memory(&bytes) {
            Ok(decoded) => TextureImage::Decoded {
                image: decoded.to_rgba8(),
                source: Some(bytes),
            },
            Err(err) => {
                warn!(uri, error = %err, "Texture is not decodable, exporting blob unchanged");
                TextureImage::Unsupported(bytes)
            }
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        TextureImage::Decoded {
            image,
            source: None,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, TextureImage::Decoded { .. })
    }

    pub fn image(&self) -> Option<&RgbaImage> {
        match self {
            TextureImage::Decoded { image, .. } => Some(image),
            TextureImage::Unsupported(_) => None,
        }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.image().map(|image| image.dimensions())
    }

    /// Bytes to write for a file called `name`.
    ///
    /// Untouched images keep their source encoding; generated ones are encoded
    /// from the file extension (JPEG or PNG).
    pub fn to_bytes(&self, name: &str) -> Result<Vec<u8>> {
        match self {
            TextureImage::Unsupported(bytes) => Ok(bytes.clone()),
            TextureImage::Decoded {
                source: Some(bytes),
                ..
            } => Ok(bytes.clone()),
            TextureImage::Decoded {
                image,
                source: None,
            } => encode(image, name),
        }
    }
}

fn encode(image: &RgbaImage, name: &str) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => {
            let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            rgb.write_to(&mut buffer, ImageFormat::Jpeg)?;
        }
        _ => image.write_to(&mut buffer, ImageFormat::Png)?,
    }
    Ok(buffer.into_inner())
}

/// File name component of a texture URI, reduced to portable characters.
pub fn sanitize_file_name(uri: &str) -> String {
    let base = uri.rsplit(['/', '\\']).next().unwrap_or(uri);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "texture".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undecodable_blob_is_kept() {
        let texture = TextureImage::decode(vec![1, 2, 3, 4], "broken.png");
        assert!(!texture.is_decoded());
        assert_eq!(texture.to_bytes("broken.png").unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_generated_image_encodes_as_png() {
        let texture = TextureImage::from_image(RgbaImage::new(2, 2));
        let bytes = texture.to_bytes("atlas.png").unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        let decoded = TextureImage::decode(bytes, "atlas.png");
        assert_eq!(decoded.dimensions(), Some((2, 2)));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("appearance/tex 01.jpg"), "tex_01.jpg");
        assert_eq!(sanitize_file_name("C:\\img\\a.png"), "a.png");
        assert_eq!(sanitize_file_name(""), "texture");
    }
}
