//! Image acquisition for the job pipeline
//!
//! Stock-media search is one more [`Provider`]; the chain's local stage
//! renders a fixed set of gradient placeholders so a job never leaves the
//! media stage without images.

mod pexels;

pub use pexels::PexelsSource;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Write as _;

use crate::encoder::Resolution;
use crate::provider::{LocalProvider, ProviderError};

/// Operation name used for metrics and resilience statistics
pub const OP_MEDIA: &str = "media";

/// Number of built-in placeholder images
pub const PLACEHOLDER_COUNT: usize = 3;

/// What images to look for
#[derive(Debug, Clone, PartialEq)]
pub struct MediaQuery {
    pub query: String,
    pub count: usize,
    pub resolution: Resolution,
}

/// One image held in memory until the pipeline writes it to its work dir
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub bytes: Bytes,
    /// File extension without the dot
    pub extension: String,
}

impl ImageAsset {
    pub fn new(bytes: impl Into<Bytes>, extension: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            extension: extension.into(),
        }
    }
}

// ============================================================================
// Placeholders
// ============================================================================

/// Base colours of the placeholder gradients
const PALETTE: [(u8, u8, u8); PLACEHOLDER_COUNT] = [(32, 64, 160), (160, 48, 96), (24, 128, 96)];

/// Local stage of the media chain
#[derive(Debug, Clone, Default)]
pub struct PlaceholderImages;

impl PlaceholderImages {
    pub fn new() -> Self {
        Self
    }

    /// Render the placeholder set at a tenth of `resolution`; the encoder scales up
    pub fn render(resolution: Resolution) -> Vec<ImageAsset> {
        let width = (resolution.width / 10).max(2);
        let height = (resolution.height / 10).max(2);
        PALETTE
            .iter()
            .map(|&base| ImageAsset::new(gradient_ppm(width, height, base), "ppm"))
            .collect()
    }
}

/// Binary PPM with a vertical gradient from `base` to near-white
fn gradient_ppm(width: u32, height: u32, base: (u8, u8, u8)) -> Vec<u8> {
    let mut header = String::new();
    let _ = write!(header, "P6\n{width} {height}\n255\n");

    let mut data = Vec::with_capacity(header.len() + (width * height * 3) as usize);
    data.extend_from_slice(header.as_bytes());

    let blend = |c: u8, t: f32| (f32::from(c) + (235.0 - f32::from(c)) * t) as u8;
    for y in 0..height {
        let t = y as f32 / (height - 1).max(1) as f32 * 0.6;
        let pixel = [blend(base.0, t), blend(base.1, t), blend(base.2, t)];
        for _ in 0..width {
            data.extend_from_slice(&pixel);
        }
    }
    data
}

#[async_trait]
impl LocalProvider<MediaQuery, Vec<ImageAsset>> for PlaceholderImages {
    fn name(&self) -> &str {
        "placeholder"
    }

    async fn generate(&self, input: &MediaQuery) -> Result<Vec<ImageAsset>, ProviderError> {
        Ok(Self::render(input.resolution))
    }

    fn minimal(&self, input: &MediaQuery) -> Vec<ImageAsset> {
        Self::render(input.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> MediaQuery {
        MediaQuery {
            query: "ocean".to_string(),
            count: 5,
            resolution: Resolution::VERTICAL_HD,
        }
    }

    #[test]
    fn test_placeholder_set() {
        let images = PlaceholderImages.minimal(&query());
        assert_eq!(images.len(), PLACEHOLDER_COUNT);
        assert!(images.iter().all(|i| i.extension == "ppm"));
        assert_ne!(images[0].bytes, images[1].bytes);
    }

    #[test]
    fn test_ppm_layout() {
        let ppm = gradient_ppm(4, 3, (0, 0, 0));
        let header = b"P6\n4 3\n255\n";
        assert!(ppm.starts_with(header));
        assert_eq!(ppm.len(), header.len() + 4 * 3 * 3);
        // first row keeps the base colour
        assert_eq!(&ppm[header.len()..header.len() + 3], &[0, 0, 0]);
    }

    #[tokio::test]
    async fn test_generate_matches_minimal() {
        let local = PlaceholderImages::new();
        let generated = local.generate(&query()).await.unwrap();
        assert_eq!(generated, local.minimal(&query()));
    }
}
