use crate::core::filters::{laplace3, variance};
use crate::types::{ChangeError, ChangeResult, Image, ImageRole};
use ndarray::Axis;
use serde::{Deserialize, Serialize};

/// Minimum Laplacian variance of genuine orbital texture
pub const LAPLACIAN_VARIANCE_FLOOR: f64 = 0.003;
/// Maximum mean inter-channel spread before an image reads as stylized
pub const SATURATION_CEILING: f64 = 0.38;
/// Coarse histogram resolution for the dynamic range check
pub const HISTOGRAM_BINS: usize = 20;
/// Maximum share of all samples a single histogram bin may hold
pub const PEAK_RATIO_CEILING: f64 = 0.8;

/// Thresholds for the orbital authenticity gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationParams {
    /// Reject below this Laplacian variance (too smooth)
    pub laplacian_variance_floor: f64,
    /// Reject above this saturation score (artificially vivid)
    pub saturation_ceiling: f64,
    /// Histogram bin count
    pub histogram_bins: usize,
    /// Reject when one bin holds more than this fraction of mass
    pub peak_ratio_ceiling: f64,
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self {
            laplacian_variance_floor: LAPLACIAN_VARIANCE_FLOOR,
            saturation_ceiling: SATURATION_CEILING,
            histogram_bins: HISTOGRAM_BINS,
            peak_ratio_ceiling: PEAK_RATIO_CEILING,
        }
    }
}

/// Which check rejected an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// Screenshots, icons, blurred photography
    TooSmooth,
    /// Neon or otherwise stylized palettes
    OverSaturated,
    /// Near-solid colour or clipped sensor range
    LowDynamicRange,
}

/// Scores computed by the gate together with its verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub laplacian_variance: f64,
    pub saturation: f64,
    pub peak_ratio: f64,
    pub rejection: Option<RejectionReason>,
}

impl ValidationReport {
    pub fn is_authentic(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Statistical gate rejecting inputs that do not look like orbital imagery
#[derive(Debug, Clone, Default)]
pub struct AuthenticityValidator {
    params: ValidationParams,
}

impl AuthenticityValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: ValidationParams) -> Self {
        Self { params }
    }

    /// Run all three checks, short-circuiting on the first failure
    pub fn assess(&self, image: &Image) -> ValidationReport {
        let mut report = ValidationReport {
            laplacian_variance: 0.0,
            saturation: 0.0,
            peak_ratio: 0.0,
            rejection: None,
        };

        if image.is_empty() {
            report.rejection = Some(RejectionReason::TooSmooth);
            return report;
        }

        // 1. Texture: orbital scenes are never flat across the frame
        let laplacian = laplace3(image);
        report.laplacian_variance = variance(laplacian.iter());
        if report.laplacian_variance < self.params.laplacian_variance_floor {
            report.rejection = Some(RejectionReason::TooSmooth);
            return report;
        }

        // 2. Saturation: spread across channels per pixel, averaged over the frame
        report.saturation = image
            .std_axis(Axis(0), 0.0)
            .mean()
            .map(f64::from)
            .unwrap_or(0.0);
        if report.saturation > self.params.saturation_ceiling {
            report.rejection = Some(RejectionReason::OverSaturated);
            return report;
        }

        // 3. Dynamic range
        report.peak_ratio = self.histogram_peak_ratio(image);
        if report.peak_ratio > self.params.peak_ratio_ceiling {
            report.rejection = Some(RejectionReason::LowDynamicRange);
        }

        report
    }

    /// Contract entry point: `true` when the image passes every check
    pub fn validate(&self, image: &Image) -> bool {
        let report = self.assess(image);
        log::debug!(
            "Authenticity scores: laplacian_var={:.5}, saturation={:.4}, peak_ratio={:.3}, verdict={:?}",
            report.laplacian_variance,
            report.saturation,
            report.peak_ratio,
            report.rejection
        );
        report.is_authentic()
    }

    /// Gate a before/after pair, naming every image that failed
    pub fn validate_pair(&self, reference: &Image, monitor: &Image) -> ChangeResult<()> {
        let mut failed = Vec::new();
        if !self.validate(reference) {
            failed.push(ImageRole::Reference);
        }
        if !self.validate(monitor) {
            failed.push(ImageRole::Monitor);
        }

        if failed.is_empty() {
            log::info!("Both inputs passed the authenticity gate");
            Ok(())
        } else {
            log::warn!("Authenticity gate rejected: {:?}", failed);
            Err(ChangeError::InputRejected { failed })
        }
    }

    /// Fraction of samples in the fullest bin, histogram spanning the data range
    fn histogram_peak_ratio(&self, image: &Image) -> f64 {
        let bins = self.params.histogram_bins.max(1);
        let (mut lo, mut hi) = image
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }

        let width = (hi - lo) as f64;
        let mut counts = vec![0usize; bins];
        for &v in image.iter() {
            let position = ((v - lo) as f64 / width * bins as f64) as usize;
            counts[position.min(bins - 1)] += 1;
        }

        let peak = counts.iter().copied().max().unwrap_or(0);
        peak as f64 / image.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Image;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn textured(h: usize, w: usize) -> Image {
        let mut rng = StdRng::seed_from_u64(7);
        let base = ndarray::Array2::<f32>::from_shape_fn((h, w), |_| rng.gen_range(0.3..0.7));
        Image::from_shape_fn((3, h, w), |(c, i, j)| base[[i, j]] + 0.02 * c as f32)
    }

    #[test]
    fn test_rejects_uniform_gray() {
        let gray = Image::from_elem((3, 32, 32), 0.5);
        let validator = AuthenticityValidator::new();
        let report = validator.assess(&gray);
        assert_eq!(report.rejection, Some(RejectionReason::TooSmooth));
        assert!(!validator.validate(&gray));
    }

    #[test]
    fn test_accepts_textured_image() {
        let validator = AuthenticityValidator::new();
        let report = validator.assess(&textured(48, 48));
        assert!(report.is_authentic(), "{:?}", report);
        assert!(report.laplacian_variance > LAPLACIAN_VARIANCE_FLOOR);
    }

    #[test]
    fn test_rejects_neon_checkerboard() {
        let neon = Image::from_shape_fn((3, 32, 32), |(c, i, j)| {
            let on = (i / 4 + j / 4) % 2 == 0;
            match (c, on) {
                (0, true) | (1, false) => 1.0,
                _ => 0.0,
            }
        });
        let report = AuthenticityValidator::new().assess(&neon);
        assert_eq!(report.rejection, Some(RejectionReason::OverSaturated));
    }

    #[test]
    fn test_rejects_clipped_image() {
        // Mostly black frame with a sparse textured strip
        let mut clipped = Image::zeros((3, 40, 40));
        for i in 0..40 {
            for j in 0..3 {
                clipped[[0, i, j]] = ((i * 13 + j * 7) % 10) as f32 / 10.0;
                clipped[[1, i, j]] = clipped[[0, i, j]];
                clipped[[2, i, j]] = clipped[[0, i, j]];
            }
        }
        let report = AuthenticityValidator::new().assess(&clipped);
        assert_eq!(report.rejection, Some(RejectionReason::LowDynamicRange));
    }

    #[test]
    fn test_pair_names_failed_role() {
        let validator = AuthenticityValidator::new();
        let good = textured(32, 32);
        let flat = Image::from_elem((3, 32, 32), 0.4);

        assert!(validator.validate_pair(&good, &good).is_ok());

        match validator.validate_pair(&good, &flat) {
            Err(ChangeError::InputRejected { failed }) => {
                assert_eq!(failed, vec![ImageRole::Monitor]);
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        match validator.validate_pair(&flat, &flat) {
            Err(ChangeError::InputRejected { failed }) => {
                assert_eq!(failed, vec![ImageRole::Reference, ImageRole::Monitor]);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
