//! End-to-end change-detection engine.
//!
//! Stages run strictly in order: authenticity gate, feature extraction,
//! similarity fusion, mask refinement, then vectorization, metrics/narrative
//! and heatmap rendering from the same fused field. Nothing is written to disk
//! until every stage has succeeded.

use crate::core::authenticity::{AuthenticityValidator, ValidationParams};
use crate::core::features::{FeatureExtractor, TextureDescriptorExtractor, TextureDescriptorParams};
use crate::core::fusion::{DissimilarityFusion, FusedSimilarity, FusionParams};
use crate::core::heatmap::{HeatmapParams, HeatmapRenderer};
use crate::core::mask::{MaskParams, MaskRefiner};
use crate::core::metrics::{summarize, ChangeMetrics};
use crate::core::narrative::NarrativeChain;
use crate::core::vectorize::{FeatureCollection, PolygonSet, Vectorizer};
use crate::io::gemini::{GeminiNarrator, NarrativeConfig};
use crate::io::output::{OutputWriter, CHANGE_MAP_FILENAME};
use crate::io::raster::{coregister, load_and_preprocess};
use crate::types::{ChangeMask, ChangeResult, GeoContext, Image, Report};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every tunable of the engine, loadable from JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeDetectionConfig {
    pub validation: ValidationParams,
    pub extractor: TextureDescriptorParams,
    pub fusion: FusionParams,
    pub mask: MaskParams,
    pub heatmap: HeatmapParams,
    pub narrative: NarrativeConfig,
}

impl ChangeDetectionConfig {
    /// Defaults with the narrative API key taken from the environment
    pub fn from_env() -> Self {
        Self {
            narrative: NarrativeConfig::from_env(),
            ..Self::default()
        }
    }

    /// Load overrides from a JSON file; absent keys keep their defaults.
    ///
    /// The API key is never read from the file, only from the environment.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ChangeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_json::from_str(&text)?;
        config.narrative.api_key = NarrativeConfig::from_env().api_key;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }
}

/// In-memory products of one analysis, before anything is written
pub struct ChangeAnalysis {
    pub geo: GeoContext,
    pub similarity: FusedSimilarity,
    pub mask: ChangeMask,
    pub polygons: PolygonSet,
    pub metrics: ChangeMetrics,
    pub report: Report,
    pub heatmap: RgbImage,
}

/// Structure handed back to callers once artifacts are on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub geojson: FeatureCollection,
    pub report: Report,
    pub change_map_path: String,
    pub generated_at: DateTime<Utc>,
}

/// Bi-temporal change-detection engine
pub struct ChangeDetectionEngine {
    validator: AuthenticityValidator,
    extractor: Box<dyn FeatureExtractor>,
    fusion: DissimilarityFusion,
    refiner: MaskRefiner,
    vectorizer: Vectorizer,
    renderer: HeatmapRenderer,
    narrators: NarrativeChain,
}

impl Default for ChangeDetectionEngine {
    fn default() -> Self {
        Self::new(&ChangeDetectionConfig::default())
    }
}

impl ChangeDetectionEngine {
    pub fn new(config: &ChangeDetectionConfig) -> Self {
        let mut narrators = NarrativeChain::rule_based();
        if config.narrative.is_configured() {
            match GeminiNarrator::new(&config.narrative) {
                Ok(gemini) => narrators = narrators.with_strategy(Box::new(gemini)),
                Err(e) => log::warn!("Generative narrative disabled: {}", e),
            }
        } else {
            log::info!("No narrative API key configured, using rule-based narrative");
        }

        Self {
            validator: AuthenticityValidator::with_params(config.validation.clone()),
            extractor: Box::new(TextureDescriptorExtractor::with_params(config.extractor.clone())),
            fusion: DissimilarityFusion::with_params(config.fusion.clone()),
            refiner: MaskRefiner::with_params(config.mask.clone()),
            vectorizer: Vectorizer::new(),
            renderer: HeatmapRenderer::with_params(config.heatmap.clone()),
            narrators,
        }
    }

    /// Swap in a different feature extractor
    pub fn with_extractor(mut self, extractor: Box<dyn FeatureExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the narrative chain
    pub fn with_narrators(mut self, narrators: NarrativeChain) -> Self {
        self.narrators = narrators;
        self
    }

    pub fn narrator_names(&self) -> Vec<&str> {
        self.narrators.strategy_names()
    }

    /// Analyse a co-registered pair without touching the filesystem
    pub fn analyze(
        &self,
        reference: &Image,
        monitor: &Image,
        geo: &GeoContext,
    ) -> ChangeResult<ChangeAnalysis> {
        self.validator.validate_pair(reference, monitor)?;
        self.analyze_validated(reference, monitor, geo)
    }

    fn analyze_validated(
        &self,
        reference: &Image,
        monitor: &Image,
        geo: &GeoContext,
    ) -> ChangeResult<ChangeAnalysis> {
        log::info!("Extracting features with {}", self.extractor.name());
        let grid1 = self.extractor.extract(reference)?;
        let grid2 = self.extractor.extract(monitor)?;

        let similarity = self.fusion.fuse_components(reference, monitor, &grid1, &grid2)?;
        let mask = self.refiner.refine(&similarity.fused);

        let polygons = self.vectorizer.vectorize(&mask, &geo.transform, &geo.crs);
        let (metrics, report) = summarize(&mask, &similarity.fused, reference, monitor, &self.narrators);
        let heatmap = self.renderer.render(monitor, &similarity.fused)?;

        Ok(ChangeAnalysis {
            geo: geo.clone(),
            similarity,
            mask,
            polygons,
            metrics,
            report,
            heatmap,
        })
    }

    /// Persist the feature collection and heatmap, returning the caller structure
    pub fn write_outputs<P: AsRef<Path>>(
        &self,
        analysis: ChangeAnalysis,
        output_dir: P,
    ) -> ChangeResult<AnalysisOutput> {
        let writer = OutputWriter::new(output_dir)?;
        let geojson = analysis.polygons.to_feature_collection();
        writer.write_geojson(&geojson)?;
        writer.write_change_map(&analysis.heatmap)?;

        Ok(AnalysisOutput {
            geojson,
            report: analysis.report,
            change_map_path: CHANGE_MAP_FILENAME.to_string(),
            generated_at: Utc::now(),
        })
    }

    /// Analyse an in-memory pair and write its artifacts
    pub fn run<P: AsRef<Path>>(
        &self,
        reference: &Image,
        monitor: &Image,
        geo: &GeoContext,
        output_dir: P,
    ) -> ChangeResult<AnalysisOutput> {
        let analysis = self.analyze(reference, monitor, geo)?;
        self.write_outputs(analysis, output_dir)
    }

    /// Load a before/after pair from disk, analyse it and write artifacts.
    ///
    /// Both rasters are gated in their native form; the monitor image is then
    /// resampled onto the reference grid. Georeferencing comes from the
    /// reference raster.
    pub fn predict_change<P, Q, R>(
        &self,
        before_path: P,
        after_path: Q,
        output_dir: R,
    ) -> ChangeResult<AnalysisOutput>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        R: AsRef<Path>,
    {
        let (reference, profile) = load_and_preprocess(before_path)?;
        let (monitor, _) = load_and_preprocess(after_path)?;

        self.validator.validate_pair(&reference, &monitor)?;

        let geo = GeoContext::from_profile(profile.transform, profile.crs.as_deref());
        let monitor = coregister(&reference, &monitor)?;

        let analysis = self.analyze_validated(&reference, &monitor, &geo)?;
        self.write_outputs(analysis, output_dir)
    }
}

/// Run the full file-based analysis with default settings.
///
/// The generative narrative is used when `GOOGLE_API_KEY` is set.
pub fn predict_change<P, Q, R>(before_path: P, after_path: Q, output_dir: R) -> ChangeResult<AnalysisOutput>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    ChangeDetectionEngine::new(&ChangeDetectionConfig::from_env()).predict_change(
        before_path,
        after_path,
        output_dir,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"mask": {"similarity_threshold": 0.9, "min_neighbors": 2}}"#).unwrap();

        let config = ChangeDetectionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.mask.similarity_threshold, 0.9);
        assert_eq!(config.mask.min_neighbors, 2);
        assert_eq!(config.fusion.deep_weight, 0.4);
        assert_eq!(config.heatmap.grid_spacing, 64);
        assert_eq!(config.narrative.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_default_engine_ends_with_rule_based_narrator() {
        let engine = ChangeDetectionEngine::default();
        assert_eq!(engine.narrator_names().last(), Some(&"rule-based"));
    }

    #[test]
    fn test_configured_key_adds_generative_narrator() {
        let config = ChangeDetectionConfig {
            narrative: NarrativeConfig {
                api_key: Some("test-key".to_string()),
                ..NarrativeConfig::default()
            },
            ..ChangeDetectionConfig::default()
        };
        let engine = ChangeDetectionEngine::new(&config);
        assert_eq!(engine.narrator_names(), vec!["gemini", "rule-based"]);
    }
}
