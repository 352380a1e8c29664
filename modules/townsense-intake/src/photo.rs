//! Upload preparation: decode, down-scale, re-encode, fingerprint.

use std::io::Cursor;

use image::imageops::FilterType;
use image::ImageFormat;
use sha2::{Digest, Sha256};

use townsense_common::IntakeError;

/// Stored images are never wider than this; taller-than-wide photos keep their ratio.
pub const MAX_WIDTH: u32 = 640;

#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Content address, `sha256:<hex of the PNG bytes>`.
    pub reference: String,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn prepare_image(bytes: &[u8]) -> Result<PreparedImage, IntakeError> {
    if bytes.is_empty() {
        return Err(IntakeError::InvalidImage("empty upload".into()));
    }
    let decoded =
        image::load_from_memory(bytes).map_err(|e| IntakeError::InvalidImage(e.to_string()))?;

    let (width, height) = (decoded.width(), decoded.height());
    let resized = if width > MAX_WIDTH {
        let scaled_height = (u64::from(height) * u64::from(MAX_WIDTH) / u64::from(width)).max(1);
        decoded.resize_exact(MAX_WIDTH, scaled_height as u32, FilterType::Lanczos3)
    } else {
        decoded
    };

    let mut png = Cursor::new(Vec::new());
    resized
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| IntakeError::InvalidImage(e.to_string()))?;
    let png = png.into_inner();

    Ok(PreparedImage {
        reference: format!("sha256:{}", hex::encode(Sha256::digest(&png))),
        width: resized.width(),
        height: resized.height(),
        png,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_png;

    #[test]
    fn wide_images_are_scaled_to_max_width() {
        let prepared = prepare_image(&sample_png(1280, 960)).unwrap();
        assert_eq!((prepared.width, prepared.height), (640, 480));
        assert!(prepared.reference.starts_with("sha256:"));
        assert_eq!(prepared.reference.len(), "sha256:".len() + 64);
    }

    #[test]
    fn narrow_images_keep_their_size() {
        let prepared = prepare_image(&sample_png(300, 500)).unwrap();
        assert_eq!((prepared.width, prepared.height), (300, 500));
    }

    #[test]
    fn same_bytes_same_reference() {
        let bytes = sample_png(800, 600);
        assert_eq!(
            prepare_image(&bytes).unwrap().reference,
            prepare_image(&bytes).unwrap().reference
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            prepare_image(b"definitely not an image"),
            Err(IntakeError::InvalidImage(_))
        ));
        assert!(matches!(prepare_image(&[]), Err(IntakeError::InvalidImage(_))));
    }
}
