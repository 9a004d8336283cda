use crate::core::filters::{gradient_magnitude, resize_bilinear};
use crate::types::{ChangeError, ChangeResult, FeatureGrid, Image, SimilarityField};
use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Weight of the deep-feature cosine similarity
pub const DEEP_WEIGHT: f32 = 0.4;
/// Weight of the normalized spectral similarity
pub const SPECTRAL_WEIGHT: f32 = 0.2;
/// Weight of the normalized edge-strength similarity
pub const STRUCTURAL_WEIGHT: f32 = 0.4;
/// Guard added to normalization denominators
pub const NORMALIZATION_EPSILON: f32 = 1e-6;

const COSINE_EPSILON: f32 = 1e-8;

/// Fusion weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    pub deep_weight: f32,
    pub spectral_weight: f32,
    pub structural_weight: f32,
    pub epsilon: f32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            deep_weight: DEEP_WEIGHT,
            spectral_weight: SPECTRAL_WEIGHT,
            structural_weight: STRUCTURAL_WEIGHT,
            epsilon: NORMALIZATION_EPSILON,
        }
    }
}

/// The three contributing similarity signals and their weighted fusion,
/// all at full image resolution
#[derive(Debug, Clone)]
pub struct FusedSimilarity {
    pub deep: SimilarityField,
    pub spectral: SimilarityField,
    pub structural: SimilarityField,
    pub fused: SimilarityField,
}

/// Combines learned-feature, spectral and structural similarity into one field
#[derive(Debug, Clone, Default)]
pub struct DissimilarityFusion {
    params: FusionParams,
}

impl DissimilarityFusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: FusionParams) -> Self {
        Self { params }
    }

    /// Fuse the pair into a single similarity field
    pub fn fuse(
        &self,
        image1: &Image,
        image2: &Image,
        grid1: &FeatureGrid,
        grid2: &FeatureGrid,
    ) -> ChangeResult<SimilarityField> {
        Ok(self.fuse_components(image1, image2, grid1, grid2)?.fused)
    }

    /// Fuse the pair, keeping the component fields
    pub fn fuse_components(
        &self,
        image1: &Image,
        image2: &Image,
        grid1: &FeatureGrid,
        grid2: &FeatureGrid,
    ) -> ChangeResult<FusedSimilarity> {
        if image1.dim() != image2.dim() {
            return Err(ChangeError::ShapeMismatch {
                expected: image1.shape().to_vec(),
                actual: image2.shape().to_vec(),
            });
        }
        if grid1.dim() != grid2.dim() {
            return Err(ChangeError::ShapeMismatch {
                expected: grid1.shape().to_vec(),
                actual: grid2.shape().to_vec(),
            });
        }

        let (_, height, width) = image1.dim();
        log::info!("Fusing similarity signals at {}x{}", height, width);

        // 1. Deep feature cosine similarity, upsampled to image resolution
        let deep_coarse = cosine_similarity_map(grid1, grid2);
        let deep = resize_bilinear(&deep_coarse, height, width);

        // 2. Spectral difference
        let spectral_diff = (image1 - image2)
            .mapv(f32::abs)
            .mean_axis(Axis(0))
            .ok_or_else(|| ChangeError::Processing("Image has no channels".to_string()))?;
        let spectral = self.invert_normalized(&spectral_diff);

        // 3. Structural (edge strength) difference
        let edge1 = gradient_magnitude(&channel_mean(image1)?);
        let edge2 = gradient_magnitude(&channel_mean(image2)?);
        let mut edge_diff = edge1;
        edge_diff.zip_mut_with(&edge2, |a, &b| *a = (*a - b).abs());
        let structural = self.invert_normalized(&edge_diff);

        // 4. Weighted fusion
        let p = &self.params;
        let mut fused = Array2::<f32>::zeros((height, width));
        Zip::from(&mut fused)
            .and(&deep)
            .and(&spectral)
            .and(&structural)
            .for_each(|f, &d, &s, &e| {
                *f = p.deep_weight * d + p.spectral_weight * s + p.structural_weight * e;
            });

        if log::log_enabled!(log::Level::Debug) {
            let (lo, hi) = value_range(&fused);
            log::debug!(
                "Fused similarity range [{:.4}, {:.4}], mean deep={:.4} spectral={:.4} structural={:.4}",
                lo,
                hi,
                deep.mean().unwrap_or(0.0),
                spectral.mean().unwrap_or(0.0),
                structural.mean().unwrap_or(0.0)
            );
        }

        Ok(FusedSimilarity {
            deep,
            spectral,
            structural,
            fused,
        })
    }

    /// `1 - diff / (max(diff) + eps)`: similar maps to 1
    fn invert_normalized(&self, diff: &Array2<f32>) -> SimilarityField {
        let max = diff.iter().copied().fold(0.0f32, f32::max);
        let denom = max + self.params.epsilon;
        diff.mapv(|d| 1.0 - d / denom)
    }
}

fn channel_mean(image: &Image) -> ChangeResult<Array2<f32>> {
    image
        .mean_axis(Axis(0))
        .ok_or_else(|| ChangeError::Processing("Image has no channels".to_string()))
}

fn value_range(field: &Array2<f32>) -> (f32, f32) {
    field
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Cosine similarity along the feature axis at every grid location.
///
/// Negative similarities are clamped to zero. Two empty descriptors compare
/// as identical.
pub fn cosine_similarity_map(grid1: &FeatureGrid, grid2: &FeatureGrid) -> Array2<f32> {
    let (_, h, w) = grid1.dim();
    let mut out = Array2::<f32>::zeros((h, w));

    let cell = |(i, j): (usize, usize)| -> f32 {
        let a = grid1.slice(ndarray::s![.., i, j]);
        let b = grid2.slice(ndarray::s![.., i, j]);
        let dot = a.dot(&b);
        let norm_a = a.dot(&a).sqrt();
        let norm_b = b.dot(&b).sqrt();
        if norm_a <= COSINE_EPSILON && norm_b <= COSINE_EPSILON {
            return 1.0;
        }
        (dot / (norm_a * norm_b).max(COSINE_EPSILON)).clamp(0.0, 1.0)
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut out).par_for_each(|idx, v| *v = cell(idx));

    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut out).for_each(|idx, v| *v = cell(idx));

    out
}
