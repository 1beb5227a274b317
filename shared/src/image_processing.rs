//! Client-side encoding of files before upload.
//!
//! Images are downscaled so neither dimension exceeds
//! `MAX_UPLOAD_DIMENSION` and re-encoded as JPEG at a fixed quality; other
//! file kinds are base64-encoded as-is and size-policed by the endpoint.

use std::io::Cursor;

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageReader, Limits};
use thiserror::Error;

use crate::{MAX_IMAGE_ALLOC, MAX_IMAGE_BYTES, MAX_IMAGE_DIMENSION, MAX_UPLOAD_DIMENSION, UPLOAD_JPEG_QUALITY};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image size {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("failed to encode image: {0}")]
    EncodeFailed(String),
}

/// Wire-ready payload: base64 body plus the metadata the endpoint wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUpload {
    pub base64_data: String,
    pub file_name: String,
    pub mime_type: String,
}

pub fn prepare_upload(
    file_name: &str,
    mime_type: &str,
    bytes: &[u8],
) -> Result<EncodedUpload, ImageError> {
    if !mime_type.starts_with("image/") {
        return Ok(EncodedUpload {
            base64_data: base64::engine::general_purpose::STANDARD.encode(bytes),
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
        });
    }

    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ImageError::TooLarge {
            size: bytes.len(),
            max: MAX_IMAGE_BYTES,
        });
    }

    let encoded = encode_image(bytes)?;
    Ok(EncodedUpload {
        base64_data: base64::engine::general_purpose::STANDARD.encode(&encoded),
        file_name: jpeg_file_name(file_name),
        mime_type: "image/jpeg".to_string(),
    })
}

fn encode_image(bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
    limits.max_alloc = Some(MAX_IMAGE_ALLOC);

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;
    if reader.format().is_none() {
        return Err(ImageError::UnsupportedFormat);
    }
    reader.limits(limits);

    let img = reader
        .decode()
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;

    let img = if img.width() > MAX_UPLOAD_DIMENSION || img.height() > MAX_UPLOAD_DIMENSION {
        img.resize(
            MAX_UPLOAD_DIMENSION,
            MAX_UPLOAD_DIMENSION,
            FilterType::Lanczos3,
        )
    } else {
        img
    };

    let mut out = Vec::new();
    let mut cursor = Cursor::new(&mut out);
    let encoder = JpegEncoder::new_with_quality(&mut cursor, UPLOAD_JPEG_QUALITY);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| ImageError::EncodeFailed(e.to_string()))?;
    Ok(out)
}

fn jpeg_file_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.jpg"),
        _ => format!("{file_name}.jpg"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 80, 40]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn decode_result(upload: &EncodedUpload) -> image::DynamicImage {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&upload.base64_data)
            .unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn oversized_images_are_downscaled_preserving_aspect() {
        let upload = prepare_upload("wide.png", "image/png", &png_bytes(2000, 500)).unwrap();
        assert_eq!(upload.mime_type, "image/jpeg");
        assert_eq!(upload.file_name, "wide.jpg");

        let img = decode_result(&upload);
        assert_eq!((img.width(), img.height()), (1280, 320));
    }

    #[test]
    fn small_images_keep_their_dimensions() {
        let upload = prepare_upload("small.png", "image/png", &png_bytes(640, 480)).unwrap();
        let img = decode_result(&upload);
        assert_eq!((img.width(), img.height()), (640, 480));
    }

    #[test]
    fn non_image_files_pass_through_unencoded() {
        let bytes = b"%PDF-1.4 fake document";
        let upload = prepare_upload("manual.pdf", "application/pdf", bytes).unwrap();
        assert_eq!(upload.mime_type, "application/pdf");
        assert_eq!(upload.file_name, "manual.pdf");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&upload.base64_data)
            .unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn corrupt_images_fail_before_any_network_call() {
        let result = prepare_upload("broken.png", "image/png", &[0x89, 0x50, 0x4e, 0x47, 0x00]);
        assert!(matches!(
            result,
            Err(ImageError::DecodeFailed(_) | ImageError::UnsupportedFormat)
        ));
    }

    #[test]
    fn oversized_byte_payloads_are_rejected() {
        let bytes = vec![0u8; MAX_IMAGE_BYTES + 1];
        assert!(matches!(
            prepare_upload("big.jpg", "image/jpeg", &bytes),
            Err(ImageError::TooLarge { .. })
        ));
    }
}
