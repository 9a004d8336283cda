use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Reflectance value in `[0, 1]`
pub type Reflectance = f32;

/// Channel-first multispectral image `[C, H, W]`, values normalized to `[0, 1]`
pub type Image = Array3<Reflectance>;

/// Dense encoder output `[F, H', W']`
pub type FeatureGrid = Array3<f32>;

/// Per-pixel similarity in `[0, 1]`, 1 = unchanged
pub type SimilarityField = Array2<f32>;

/// Binary change mask (0 = stable, 1 = changed)
pub type ChangeMask = Array2<u8>;

/// Default coordinate reference used when the source supplies none
pub const DEFAULT_CRS: &str = "EPSG:4326";

/// Pixel size of the synthetic transform substituted for missing geo metadata
pub const SYNTHETIC_PIXEL_SIZE: f64 = 0.0001;

/// Role of an input image within a change-detection pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageRole {
    /// The "before" image (T1)
    Reference,
    /// The "after" image (T2)
    Monitor,
}

impl std::fmt::Display for ImageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageRole::Reference => write!(f, "Reference Image (T1)"),
            ImageRole::Monitor => write!(f, "Monitor Image (T2)"),
        }
    }
}

/// Affine pixel -> geographic transform, GDAL coefficient order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform anchored at the given upper-left corner
    pub fn from_origin(west: f64, north: f64, x_size: f64, y_size: f64) -> Self {
        Self {
            top_left_x: west,
            pixel_width: x_size,
            rotation_x: 0.0,
            top_left_y: north,
            rotation_y: 0.0,
            pixel_height: -y_size,
        }
    }

    /// Synthetic identity-like transform for rasters without geo metadata
    pub fn synthetic() -> Self {
        Self::from_origin(0.0, 0.0, SYNTHETIC_PIXEL_SIZE, SYNTHETIC_PIXEL_SIZE)
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Map a pixel-grid corner (col, row) to geographic coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Geographic area covered by one pixel
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y).abs()
    }

    pub fn is_degenerate(&self) -> bool {
        !self.pixel_area().is_normal()
            || ![
                self.top_left_x,
                self.pixel_width,
                self.rotation_x,
                self.top_left_y,
                self.rotation_y,
                self.pixel_height,
            ]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Georeferencing shared by both images of a co-registered pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoContext {
    pub transform: GeoTransform,
    pub crs: String,
}

impl GeoContext {
    pub fn new(transform: GeoTransform, crs: impl Into<String>) -> Self {
        Self {
            transform,
            crs: crs.into(),
        }
    }

    /// Resolve whatever the source profile supplied into a usable context.
    ///
    /// A missing CRS means the raster carries no trustworthy georeferencing at
    /// all, so the transform is replaced too. A missing or degenerate
    /// transform alone keeps the CRS.
    pub fn from_profile(transform: Option<GeoTransform>, crs: Option<&str>) -> Self {
        let crs = crs.map(str::trim).filter(|c| !c.is_empty());
        match (transform, crs) {
            (_, None) => {
                log::warn!(
                    "Source carries no coordinate reference, substituting synthetic transform and {}",
                    DEFAULT_CRS
                );
                Self::new(GeoTransform::synthetic(), DEFAULT_CRS)
            }
            (Some(t), Some(crs)) if !t.is_degenerate() => Self::new(t, crs),
            (_, Some(crs)) => {
                log::warn!("Source transform missing or degenerate, substituting synthetic transform");
                Self::new(GeoTransform::synthetic(), crs)
            }
        }
    }
}

impl Default for GeoContext {
    fn default() -> Self {
        Self::new(GeoTransform::synthetic(), DEFAULT_CRS)
    }
}

/// Direction indicator attached to a report metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Stable,
    Warning,
    Normal,
}

/// One labelled entry of the report's metric panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub label: String,
    pub value: String,
    pub trend: Trend,
}

/// Human-readable analysis report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: String,
    pub metrics: Vec<MetricEntry>,
    pub findings: Vec<String>,
}

/// Error types for change-detection analysis
#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    #[error(
        "UNAUTHORIZED SOURCE: {} failed spectral validation. Please upload authentic orbital imagery pairs.",
        .failed.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ")
    )]
    InputRejected { failed: Vec<ImageRole> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for change-detection operations
pub type ChangeResult<T> = Result<T, ChangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message_names_failed_roles() {
        let err = ChangeError::InputRejected {
            failed: vec![ImageRole::Monitor],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("UNAUTHORIZED SOURCE"));
        assert!(msg.contains("Monitor Image (T2)"));
        assert!(!msg.contains("Reference Image (T1)"));
    }

    #[test]
    fn test_geo_context_defaults_without_crs() {
        let supplied = GeoTransform::from_origin(500000.0, 4200000.0, 10.0, 10.0);
        let ctx = GeoContext::from_profile(Some(supplied), None);
        assert_eq!(ctx.crs, DEFAULT_CRS);
        assert_eq!(ctx.transform, GeoTransform::synthetic());

        let ctx = GeoContext::from_profile(Some(supplied), Some("EPSG:32633"));
        assert_eq!(ctx.crs, "EPSG:32633");
        assert_eq!(ctx.transform, supplied);

        let ctx = GeoContext::from_profile(None, Some("EPSG:32633"));
        assert_eq!(ctx.crs, "EPSG:32633");
        assert_eq!(ctx.transform, GeoTransform::synthetic());
    }

    #[test]
    fn test_transform_apply_and_area() {
        let t = GeoTransform::from_origin(10.0, 50.0, 0.5, 0.25);
        assert_eq!(t.apply(0.0, 0.0), (10.0, 50.0));
        assert_eq!(t.apply(2.0, 4.0), (11.0, 49.0));
        assert!((t.pixel_area() - 0.125).abs() < 1e-12);
    }
}
