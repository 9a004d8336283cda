//! I/O modules for raster ingestion, output artifacts, and the narrative service

pub mod gemini;
pub mod output;
pub mod raster;

pub use gemini::{GeminiNarrator, NarrativeConfig};
pub use output::{OutputWriter, CHANGE_MAP_FILENAME, GEOJSON_FILENAME};
pub use raster::{coregister, load_and_preprocess, RasterProfile};
