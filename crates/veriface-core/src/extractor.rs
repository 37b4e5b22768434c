//! Embedding extraction capability.
//!
//! Extraction is a host concern: production deployments wire in a
//! model-backed implementation. This module defines the capability trait
//! and ships the crude pixel-fingerprint fallback selected at startup when
//! no recognition model is available.

use image::imageops::FilterType;
use thiserror::Error;

use crate::embedding::{Embedding, NORM_EPSILON};

/// Square thumbnail side the fingerprint is averaged down to.
const FINGERPRINT_SIDE: u32 = 16;

/// Half-width of the centre crop, in pixels.
const CROP_HALF: u32 = 100;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extractor backend failure: {0}")]
    Backend(String),
}

/// Produces a facial embedding from an encoded camera frame.
///
/// `Ok(None)` means no usable face was found in the frame — a normal
/// outcome, reported to the user as such. `Err` is an internal failure in
/// the extraction backend.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, frame: &[u8]) -> Result<Option<Embedding>, ExtractError>;
}

/// Fallback extractor: a normalized pixel fingerprint of the frame centre.
///
/// The centre region (up to 200×200 px) is resized to 16×16 and the RGB
/// bytes flattened into a unit-norm 768-component vector. Far cruder than
/// a trained recognizer; its output is compared by cosine similarity.
#[derive(Debug, Default, Clone, Copy)]
pub struct PixelFingerprint;

impl EmbeddingExtractor for PixelFingerprint {
    fn extract(&self, frame: &[u8]) -> Result<Option<Embedding>, ExtractError> {
        if frame.is_empty() {
            return Ok(None);
        }

        // An undecodable frame is "no face", not a failure.
        let decoded = match image::load_from_memory(frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::debug!(error = %err, "frame decode failed; treating as no face");
                return Ok(None);
            }
        };

        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }

        let (cx, cy) = (width / 2, height / 2);
        let left = cx.saturating_sub(CROP_HALF);
        let top = cy.saturating_sub(CROP_HALF);
        let crop_w = (cx + CROP_HALF).min(width) - left;
        let crop_h = (cy + CROP_HALF).min(height) - top;
        let crop = image::imageops::crop_imm(&rgb, left, top, crop_w, crop_h).to_image();

        let thumb = image::imageops::resize(
            &crop,
            FINGERPRINT_SIDE,
            FINGERPRINT_SIDE,
            FilterType::Triangle,
        );

        let mut values: Vec<f32> = thumb.into_raw().into_iter().map(f32::from).collect();
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        for v in &mut values {
            *v /= norm + NORM_EPSILON;
        }

        Ok(Some(Embedding::from_values(values)))
    }
}
