//! Dense feature extraction.
//!
//! The fusion stage only needs a per-location descriptor that is comparable
//! between the two images of a pair. Anything that satisfies
//! [`FeatureExtractor`] can be plugged in: a local CNN runtime, a remote
//! inference service, or the classical [`TextureDescriptorExtractor`] below.

use crate::core::filters::sobel;
use crate::types::{ChangeError, ChangeResult, FeatureGrid, Image};
use ndarray::{s, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Produces comparable feature grids for the images of a pair.
///
/// Implementations must be deterministic and side-effect-free, accept a
/// normalized `[C, H, W]` image, and return grids of identical shape for any
/// two images of identical shape.
pub trait FeatureExtractor: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    fn extract(&self, image: &Image) -> ChangeResult<FeatureGrid>;
}

/// Parameters for the patch descriptor encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureDescriptorParams {
    /// Patch size and stride in pixels
    pub stride: usize,
    /// Number of gradient-orientation bins
    pub orientation_bins: usize,
}

impl Default for TextureDescriptorParams {
    fn default() -> Self {
        Self {
            stride: 8,
            orientation_bins: 4,
        }
    }
}

/// Deterministic patch-descriptor encoder.
///
/// Each `stride x stride` patch becomes one descriptor holding per-channel
/// means and standard deviations, the mean gradient magnitude, and a
/// magnitude-weighted histogram of gradient orientations. Output shape is
/// `[2C + 1 + bins, ceil(H/stride), ceil(W/stride)]`.
#[derive(Debug, Clone, Default)]
pub struct TextureDescriptorExtractor {
    params: TextureDescriptorParams,
}

impl TextureDescriptorExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: TextureDescriptorParams) -> Self {
        Self { params }
    }

    /// Channel count of the grid produced for a `channels`-band image
    pub fn feature_channels(&self, channels: usize) -> usize {
        2 * channels + 1 + self.params.orientation_bins
    }
}

impl FeatureExtractor for TextureDescriptorExtractor {
    fn name(&self) -> &str {
        "texture-descriptor"
    }

    fn extract(&self, image: &Image) -> ChangeResult<FeatureGrid> {
        let (channels, height, width) = image.dim();
        let stride = self.params.stride;
        let bins = self.params.orientation_bins;
        if stride == 0 || bins == 0 {
            return Err(ChangeError::Processing(
                "Descriptor stride and orientation bins must be positive".to_string(),
            ));
        }
        if channels == 0 || height == 0 || width == 0 {
            return Err(ChangeError::InvalidFormat(format!(
                "Cannot extract features from empty image {:?}",
                image.dim()
            )));
        }

        let grid_h = (height + stride - 1) / stride;
        let grid_w = (width + stride - 1) / stride;
        let features = self.feature_channels(channels);
        log::debug!(
            "Extracting {}x{}x{} descriptor grid (stride {})",
            features,
            grid_h,
            grid_w,
            stride
        );

        let gray: Array2<f32> = image
            .mean_axis(Axis(0))
            .ok_or_else(|| ChangeError::Processing("Channel mean failed".to_string()))?;
        let gy = sobel(&gray, 0);
        let gx = sobel(&gray, 1);

        let mut grid = FeatureGrid::zeros((features, grid_h, grid_w));

        for gi in 0..grid_h {
            for gj in 0..grid_w {
                let rows = gi * stride..((gi + 1) * stride).min(height);
                let cols = gj * stride..((gj + 1) * stride).min(width);
                let area = (rows.len() * cols.len()) as f32;

                for c in 0..channels {
                    let patch = image.slice(s![c, rows.clone(), cols.clone()]);
                    let mean = patch.sum() / area;
                    let var = patch.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / area;
                    grid[[c, gi, gj]] = mean;
                    grid[[channels + c, gi, gj]] = var.sqrt();
                }

                let mut energy = 0.0f32;
                let mut histogram = vec![0.0f32; bins];
                for i in rows.clone() {
                    for j in cols.clone() {
                        let (dy, dx) = (gy[[i, j]], gx[[i, j]]);
                        let magnitude = dy.hypot(dx);
                        if magnitude <= f32::EPSILON {
                            continue;
                        }
                        energy += magnitude;
                        // Unsigned orientation in [0, pi)
                        let theta = dy.atan2(dx).rem_euclid(PI);
                        let bin = ((theta / PI * bins as f32) as usize).min(bins - 1);
                        histogram[bin] += magnitude;
                    }
                }

                grid[[2 * channels, gi, gj]] = energy / area;
                for (b, weight) in histogram.iter().enumerate() {
                    grid[[2 * channels + 1 + b, gi, gj]] = weight / area;
                }
            }
        }

        Ok(grid)
    }
}
