use crate::core::filters::gaussian_filter;
use crate::types::{ChangeError, ChangeResult, Image, SimilarityField};
use image::RgbImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Similarity at which the change ramp starts
pub const INTENSITY_ORIGIN: f32 = 0.96;
/// Similarity span mapped onto the full ramp
pub const INTENSITY_SPAN: f32 = 0.20;
/// Gaussian sigma of the glow
pub const GLOW_SIGMA: f32 = 1.2;
/// Gain applied to intensity before it becomes opacity
pub const ALPHA_GAIN: f32 = 1.2;
/// Overlay opacity cap
pub const MAX_OPACITY: f32 = 0.75;
/// Technical grid spacing in pixels
pub const GRID_SPACING: usize = 64;
/// Technical grid accent colour
pub const GRID_COLOR: [u8; 3] = [59, 130, 246];
/// Share of the accent colour in grid pixels
pub const GRID_WEIGHT: f32 = 0.3;

const DEEP_BLUE: [f32; 3] = [0.0, 50.0, 150.0];
const TACTICAL_GREEN: [f32; 3] = [34.0, 197.0, 94.0];
const AMBER: [f32; 3] = [234.0, 179.0, 8.0];
const BRIGHT_YELLOW: [f32; 3] = [255.0, 255.0, 0.0];

/// Ramp breakpoints: below LOW nothing is drawn
const RAMP_LOW: f32 = 0.1;
const RAMP_MID: f32 = 0.5;
const RAMP_HIGH: f32 = 0.8;

/// Heatmap styling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapParams {
    pub intensity_origin: f32,
    pub intensity_span: f32,
    pub glow_sigma: f32,
    pub alpha_gain: f32,
    pub max_opacity: f32,
    /// Zero disables the grid
    pub grid_spacing: usize,
    pub grid_color: [u8; 3],
    pub grid_weight: f32,
}

impl Default for HeatmapParams {
    fn default() -> Self {
        Self {
            intensity_origin: INTENSITY_ORIGIN,
            intensity_span: INTENSITY_SPAN,
            glow_sigma: GLOW_SIGMA,
            alpha_gain: ALPHA_GAIN,
            max_opacity: MAX_OPACITY,
            grid_spacing: GRID_SPACING,
            grid_color: GRID_COLOR,
            grid_weight: GRID_WEIGHT,
        }
    }
}

fn lerp(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        (1.0 - t) * a[0] + t * b[0],
        (1.0 - t) * a[1] + t * b[1],
        (1.0 - t) * a[2] + t * b[2],
    ]
}

/// Blue -> green -> yellow ramp over smoothed intensity, black below 0.1
pub fn ramp_color(intensity: f32) -> [f32; 3] {
    if intensity <= RAMP_LOW {
        [0.0; 3]
    } else if intensity <= RAMP_MID {
        lerp(DEEP_BLUE, TACTICAL_GREEN, (intensity - RAMP_LOW) / (RAMP_MID - RAMP_LOW))
    } else if intensity <= RAMP_HIGH {
        lerp(TACTICAL_GREEN, AMBER, (intensity - RAMP_MID) / (RAMP_HIGH - RAMP_MID))
    } else {
        lerp(AMBER, BRIGHT_YELLOW, (intensity - RAMP_HIGH) / (1.0 - RAMP_HIGH))
    }
}

/// Renders the fused field as a glowing overlay on the monitor image
#[derive(Debug, Clone, Default)]
pub struct HeatmapRenderer {
    params: HeatmapParams,
}

impl HeatmapRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: HeatmapParams) -> Self {
        Self { params }
    }

    /// Rescale the change end of the similarity range to `[0, 1]`
    pub fn change_intensity(&self, fused: &SimilarityField) -> Array2<f32> {
        let origin = self.params.intensity_origin;
        let span = self.params.intensity_span;
        fused.mapv(|s| ((origin - s) / span).clamp(0.0, 1.0))
    }

    pub fn render(&self, after: &Image, fused: &SimilarityField) -> ChangeResult<RgbImage> {
        let (channels, height, width) = after.dim();
        if fused.dim() != (height, width) {
            return Err(ChangeError::ShapeMismatch {
                expected: vec![height, width],
                actual: fused.shape().to_vec(),
            });
        }
        if channels == 0 {
            return Err(ChangeError::InvalidFormat(
                "Cannot render heatmap over an image without channels".to_string(),
            ));
        }
        log::info!("Rendering change heatmap {}x{}", width, height);

        let intensity = self.change_intensity(fused);
        let glow = gaussian_filter(&intensity, self.params.glow_sigma);

        let band = |c: usize| c.min(channels - 1);
        let (alpha_gain, max_opacity) = (self.params.alpha_gain, self.params.max_opacity);

        let shade_row = |i: usize, row: &mut [u8]| {
            for j in 0..width {
                let s = glow[[i, j]];
                let overlay = ramp_color(s);
                let alpha = (s * alpha_gain).clamp(0.0, 1.0) * max_opacity;
                for k in 0..3 {
                    let base = (after[[band(k), i, j]].clamp(0.0, 1.0) * 255.0) as u8 as f32;
                    row[j * 3 + k] = (base * (1.0 - alpha) + overlay[k] * alpha) as u8;
                }
            }
        };

        let mut buffer = vec![0u8; width * height * 3];

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            buffer
                .par_chunks_mut(width * 3)
                .enumerate()
                .for_each(|(i, row)| shade_row(i, row));
        }

        #[cfg(not(feature = "parallel"))]
        buffer
            .chunks_mut(width * 3)
            .enumerate()
            .for_each(|(i, row)| shade_row(i, row));

        let mut canvas = RgbImage::from_raw(width as u32, height as u32, buffer)
            .ok_or_else(|| ChangeError::Processing("Heatmap buffer size mismatch".to_string()))?;

        self.draw_grid(&mut canvas);
        Ok(canvas)
    }

    fn draw_grid(&self, canvas: &mut RgbImage) {
        let spacing = self.params.grid_spacing;
        if spacing == 0 {
            return;
        }
        let (width, height) = canvas.dimensions();
        let accent = self.params.grid_color;
        let weight = self.params.grid_weight;

        let blend = |px: &mut image::Rgb<u8>| {
            for k in 0..3 {
                px.0[k] = (px.0[k] as f32 * (1.0 - weight) + accent[k] as f32 * weight) as u8;
            }
        };

        for y in (0..height).step_by(spacing) {
            for x in 0..width {
                blend(canvas.get_pixel_mut(x, y));
            }
        }
        for x in (0..width).step_by(spacing) {
            for y in 0..height {
                blend(canvas.get_pixel_mut(x, y));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_breakpoints() {
        assert_eq!(ramp_color(0.05), [0.0, 0.0, 0.0]);
        assert_eq!(ramp_color(0.5), TACTICAL_GREEN);
        assert_eq!(ramp_color(0.8), AMBER);
        let top = ramp_color(1.0);
        assert!((top[0] - 255.0).abs() < 1e-3 && (top[1] - 255.0).abs() < 1e-3 && top[2].abs() < 1e-3);
        let low = ramp_color(0.3);
        assert!(low[1] > DEEP_BLUE[1] && low[1] < TACTICAL_GREEN[1]);
    }

    #[test]
    fn test_intensity_rescale() {
        let fused = SimilarityField::from_shape_vec((1, 4), vec![1.0, 0.96, 0.86, 0.5]).unwrap();
        let intensity = HeatmapRenderer::new().change_intensity(&fused);
        assert_eq!(intensity[[0, 0]], 0.0);
        assert_eq!(intensity[[0, 1]], 0.0);
        assert!((intensity[[0, 2]] - 0.5).abs() < 1e-5);
        assert_eq!(intensity[[0, 3]], 1.0);
    }

    #[test]
    fn test_unchanged_scene_keeps_background_off_grid() {
        let after = Image::from_elem((3, 80, 80), 0.5);
        let fused = SimilarityField::from_elem((80, 80), 1.0);
        let canvas = HeatmapRenderer::new().render(&after, &fused).unwrap();
        assert_eq!(canvas.dimensions(), (80, 80));
        assert_eq!(canvas.get_pixel(10, 10).0, [127, 127, 127]);
        // Grid row 0 and 64, column 0 and 64
        let on_row = canvas.get_pixel(10, 64).0;
        assert_eq!(on_row, [(127.0 * 0.7 + 59.0 * 0.3) as u8, (127.0 * 0.7 + 130.0 * 0.3) as u8, (127.0 * 0.7 + 246.0 * 0.3) as u8]);
    }

    #[test]
    fn test_changed_block_is_tinted() {
        let after = Image::from_elem((3, 40, 40), 0.2);
        let mut fused = SimilarityField::from_elem((40, 40), 1.0);
        for i in 10..30 {
            for j in 10..30 {
                fused[[i, j]] = 0.5;
            }
        }
        let canvas = HeatmapRenderer::new().render(&after, &fused).unwrap();
        let center = canvas.get_pixel(20, 20).0;
        // Saturated intensity: yellow at 75% opacity over dark gray
        assert!(center[0] > 150 && center[1] > 150 && center[2] < 40);
        assert_eq!(canvas.get_pixel(35, 35).0, [51, 51, 51]);
    }

    #[test]
    fn test_rejects_mismatched_field() {
        let after = Image::zeros((3, 8, 8));
        let fused = SimilarityField::zeros((4, 4));
        assert!(HeatmapRenderer::new().render(&after, &fused).is_err());
    }
}
