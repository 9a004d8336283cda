//! Core change-detection modules

pub mod authenticity;
pub mod features;
pub mod filters;
pub mod fusion;
pub mod heatmap;
pub mod mask;
pub mod metrics;
pub mod narrative;
pub mod vectorize;

// Re-export main types
pub use authenticity::{AuthenticityValidator, RejectionReason, ValidationParams, ValidationReport};
pub use features::{FeatureExtractor, TextureDescriptorExtractor, TextureDescriptorParams};
pub use fusion::{DissimilarityFusion, FusedSimilarity, FusionParams};
pub use heatmap::{HeatmapParams, HeatmapRenderer};
pub use mask::{MaskParams, MaskRefiner};
pub use metrics::{summarize, ChangeMetrics};
pub use narrative::{
    Narrative, NarrativeChain, NarrativeContext, NarrativeError, NarrativeStrategy,
    NarrativeTemplate, RuleBasedNarrator,
};
pub use vectorize::{ChangePolygon, FeatureCollection, PolygonSet, Vectorizer};
