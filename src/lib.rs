//! orbital-change: bi-temporal change detection for satellite imagery
//!
//! Takes a before/after pair of co-registered images, gates them through a
//! statistical authenticity check, fuses learned-feature, spectral and
//! structural similarity into one field, and derives a refined change mask,
//! GeoJSON polygons, a metric report with narrative, and a heatmap overlay.

pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    ChangeError, ChangeMask, ChangeResult, FeatureGrid, GeoContext, GeoTransform, Image,
    ImageRole, MetricEntry, Report, SimilarityField, Trend,
};

pub use crate::core::{
    AuthenticityValidator, DissimilarityFusion, FeatureExtractor, HeatmapRenderer, MaskRefiner,
    NarrativeChain, NarrativeStrategy, PolygonSet, Vectorizer,
};
pub use io::{coregister, load_and_preprocess, GeminiNarrator, NarrativeConfig};
pub use pipeline::{
    predict_change, AnalysisOutput, ChangeAnalysis, ChangeDetectionConfig, ChangeDetectionEngine,
};

#[cfg(feature = "python")]
mod python {
    use super::{AuthenticityValidator, ChangeError};
    use numpy::PyReadonlyArray3;
    use pyo3::prelude::*;

    fn to_py_err(e: ChangeError) -> PyErr {
        match e {
            ChangeError::InputRejected { .. } => {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
            }
            ChangeError::Io(_) => PyErr::new::<pyo3::exceptions::PyIOError, _>(format!("{}", e)),
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
        }
    }

    /// Run the full analysis and return `{geojson, report, change_map_path}` as JSON
    #[pyfunction]
    fn predict_change(py: Python, before_path: String, after_path: String, output_dir: String) -> PyResult<String> {
        let output = py
            .allow_threads(|| super::predict_change(&before_path, &after_path, &output_dir))
            .map_err(to_py_err)?;

        let mut value = serde_json::to_value(&output)
            .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("generated_at");
        }
        Ok(value.to_string())
    }

    /// Authenticity gate for a band-first float32 array
    #[pyfunction]
    fn is_satellite_image(array: PyReadonlyArray3<f32>) -> bool {
        AuthenticityValidator::new().validate(&array.as_array().to_owned())
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(predict_change, m)?)?;
        m.add_function(wrap_pyfunction!(is_satellite_image, m)?)?;
        m.add("__version__", env!("CARGO_PKG_VERSION"))?;
        Ok(())
    }
}
