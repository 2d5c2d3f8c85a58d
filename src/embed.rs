use image::imageops::FilterType;
use image::DynamicImage;

use crate::model::EMBED_DIM;
use crate::vector::norm;

/// Image-to-vector capability. Implementations must be pure: the same
/// image always yields the same vector, unit-normalized, of length `dim()`.
///
/// Injected at startup so services can be exercised against a fake.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn extract(&self, img: &DynamicImage) -> Vec<f32>;
}

// Model input resolution; arbitrary source sizes are resampled to this.
const INPUT_SIZE: u32 = 224;
const GRID: usize = 16;
const CELL_FEATURES: usize = 5;

// The grid geometry must add up to the catalog's embedding width.
const _: () = assert!(GRID * GRID * CELL_FEATURES == EMBED_DIM);

/// Deterministic color-statistics embedder.
///
/// Resizes to 224x224, splits into a 16x16 cell grid and emits five
/// statistics per cell (mean R/G/B, mean luma, luma variance), then
/// L2-normalizes: 16 * 16 * 5 = 1280 features. Visually similar images
/// land close under Euclidean distance; it is a stand-in with the same
/// contract as a pretrained CNN feature extractor.
#[derive(Debug, Default)]
pub struct GridEmbedder;

impl GridEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Embedder for GridEmbedder {
    fn dim(&self) -> usize {
        EMBED_DIM
    }

    fn extract(&self, img: &DynamicImage) -> Vec<f32> {
        let resized = img
            .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
            .to_rgb8();

        let cell = INPUT_SIZE as usize / GRID;
        let mut features = Vec::with_capacity(self.dim());

        for cy in 0..GRID {
            for cx in 0..GRID {
                let mut sum_r = 0.0f32;
                let mut sum_g = 0.0f32;
                let mut sum_b = 0.0f32;
                let mut sum_luma = 0.0f32;
                let mut sum_luma_sq = 0.0f32;

                for y in 0..cell {
                    for x in 0..cell {
                        let px = resized.get_pixel((cx * cell + x) as u32, (cy * cell + y) as u32);
                        let r = px[0] as f32 / 255.0;
                        let g = px[1] as f32 / 255.0;
                        let b = px[2] as f32 / 255.0;
                        // Rec. 601 luma weights
                        let luma = 0.299 * r + 0.587 * g + 0.114 * b;

                        sum_r += r;
                        sum_g += g;
                        sum_b += b;
                        sum_luma += luma;
                        sum_luma_sq += luma * luma;
                    }
                }

                let n = (cell * cell) as f32;
                let mean_luma = sum_luma / n;
                features.push(sum_r / n);
                features.push(sum_g / n);
                features.push(sum_b / n);
                features.push(mean_luma);
                features.push((sum_luma_sq / n - mean_luma * mean_luma).max(0.0));
            }
        }

        let magnitude = norm(&features);
        if magnitude > f32::EPSILON {
            for f in &mut features {
                *f /= magnitude;
            }
        } else {
            // All-black input: fall back to a uniform unit vector so the
            // normalization invariant holds
            let uniform = 1.0 / (features.len() as f32).sqrt();
            features.iter_mut().for_each(|f| *f = uniform);
        }

        features
    }
}
