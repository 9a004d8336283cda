//! Narrative generation as an ordered fallback chain.
//!
//! Strategies are tried in order; the first one that produces a narrative
//! wins. The rule-based narrator never fails and always closes the chain, so
//! a report always carries a summary.

use crate::core::metrics::ChangeMetrics;
use crate::types::Image;
use serde::{Deserialize, Serialize};

/// Below this change percentage the scene is considered static
pub const STASIS_PERCENT: f64 = 0.1;
/// Below this change percentage changes are reported as a micro-shift
pub const MICRO_SHIFT_PERCENT: f64 = 1.0;
/// Above this cluster count larger changes are reported as fragmented
pub const FRAGMENTATION_CLUSTERS: usize = 25;

/// Why a narrative strategy could not produce output
#[derive(Debug, thiserror::Error)]
pub enum NarrativeError {
    #[error("Narrative collaborator is not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Collaborator returned HTTP {0}")]
    Status(u16),

    #[error("Collaborator returned no text")]
    EmptyResponse,

    #[error("Could not parse narrative: {0}")]
    Parse(String),

    #[error("Image encoding failed: {0}")]
    Encoding(String),
}

/// Summary sentence plus bullet findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub summary: String,
    pub findings: Vec<String>,
}

/// Everything a strategy may look at: the image pair and the scalar metrics
#[derive(Debug, Clone, Copy)]
pub struct NarrativeContext<'a> {
    pub reference: &'a Image,
    pub monitor: &'a Image,
    pub metrics: &'a ChangeMetrics,
}

/// One way of turning an analysed pair into a narrative
pub trait NarrativeStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn narrate(&self, context: &NarrativeContext<'_>) -> Result<Narrative, NarrativeError>;
}

/// The four canned narratives of the deterministic path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NarrativeTemplate {
    /// Practically nothing changed
    Stasis,
    /// Small, localized change
    MicroShift,
    /// Many scattered change clusters
    Fragmented,
    /// Few, large change clusters
    Unified,
}

impl NarrativeTemplate {
    pub const ALL: [NarrativeTemplate; 4] = [
        NarrativeTemplate::Stasis,
        NarrativeTemplate::MicroShift,
        NarrativeTemplate::Fragmented,
        NarrativeTemplate::Unified,
    ];

    pub fn select(metrics: &ChangeMetrics) -> Self {
        if metrics.change_percent < STASIS_PERCENT {
            NarrativeTemplate::Stasis
        } else if metrics.change_percent < MICRO_SHIFT_PERCENT {
            NarrativeTemplate::MicroShift
        } else if metrics.cluster_count > FRAGMENTATION_CLUSTERS {
            NarrativeTemplate::Fragmented
        } else {
            NarrativeTemplate::Unified
        }
    }

    /// Fixed opening of the template's summary sentence
    pub fn summary_prefix(&self) -> &'static str {
        match self {
            NarrativeTemplate::Stasis => "Orbital stasis confirmed.",
            NarrativeTemplate::MicroShift => "Micro-shift detected.",
            NarrativeTemplate::Fragmented => "Fragmentation alert.",
            NarrativeTemplate::Unified => "Structural evolution identified.",
        }
    }

    /// Template a summary was produced from, if any
    pub fn identify(summary: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| summary.starts_with(t.summary_prefix()))
    }

    pub fn render(&self, metrics: &ChangeMetrics) -> Narrative {
        let pct = metrics.change_percent;
        let clusters = metrics.cluster_count;

        let (summary, findings) = match self {
            NarrativeTemplate::Stasis => (
                format!(
                    "{} Target sector shows zero structural variance.",
                    self.summary_prefix()
                ),
                vec![
                    "Surface integrity remains identical to historical T1 baseline.".to_string(),
                    "No anthropogenic or kinetic activity detected in target footprint.".to_string(),
                ],
            ),
            NarrativeTemplate::MicroShift => (
                format!(
                    "{} Nominal divergence across {} focal points.",
                    self.summary_prefix(),
                    clusters
                ),
                vec![
                    format!("Localized anomalies identified at {} points of interest.", clusters),
                    "Changes likely represent machinery repositioning or minor environmental shift."
                        .to_string(),
                ],
            ),
            NarrativeTemplate::Fragmented => (
                format!(
                    "{} Widespread dispersed modifications identified.",
                    self.summary_prefix()
                ),
                vec![
                    format!(
                        "Detected {} distinct structural deltas scattered across sector.",
                        clusters
                    ),
                    format!(
                        "Pattern suggests non-linear infrastructure evolution over {:.1}% of area.",
                        pct
                    ),
                ],
            ),
            NarrativeTemplate::Unified => (
                format!(
                    "{} Unified change detected in {} sectors.",
                    self.summary_prefix(),
                    clusters
                ),
                vec![
                    format!(
                        "Significant footprint modification confirmed at {} major clusters.",
                        clusters
                    ),
                    format!(
                        "Net orbital divergence calculated at {:.2}% of total sector.",
                        pct
                    ),
                ],
            ),
        };

        Narrative { summary, findings }
    }
}

/// Deterministic narrator selecting one of the canned templates
#[derive(Debug, Clone, Default)]
pub struct RuleBasedNarrator;

impl RuleBasedNarrator {
    pub fn narrate_metrics(&self, metrics: &ChangeMetrics) -> Narrative {
        let template = NarrativeTemplate::select(metrics);
        log::debug!("Rule-based narrative template: {:?}", template);
        template.render(metrics)
    }
}

impl NarrativeStrategy for RuleBasedNarrator {
    fn name(&self) -> &str {
        "rule-based"
    }

    fn narrate(&self, context: &NarrativeContext<'_>) -> Result<Narrative, NarrativeError> {
        Ok(self.narrate_metrics(context.metrics))
    }
}

/// Ordered list of strategies with a guaranteed deterministic tail
pub struct NarrativeChain {
    strategies: Vec<Box<dyn NarrativeStrategy>>,
    fallback: RuleBasedNarrator,
}

impl Default for NarrativeChain {
    fn default() -> Self {
        Self::rule_based()
    }
}

impl NarrativeChain {
    /// Chain with only the deterministic narrator
    pub fn rule_based() -> Self {
        Self {
            strategies: Vec::new(),
            fallback: RuleBasedNarrator,
        }
    }

    /// Append a strategy, tried after those already present
    pub fn with_strategy(mut self, strategy: Box<dyn NarrativeStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once(self.fallback.name()))
            .collect()
    }

    pub fn narrate(&self, context: &NarrativeContext<'_>) -> Narrative {
        for strategy in &self.strategies {
            match strategy.narrate(context) {
                Ok(narrative) => {
                    log::info!("Narrative produced by {}", strategy.name());
                    return narrative;
                }
                Err(e) => {
                    log::warn!(
                        "{} narrative failed: {}. Falling back to next strategy.",
                        strategy.name(),
                        e
                    );
                }
            }
        }
        self.fallback.narrate_metrics(context.metrics)
    }
}

/// Strip an optional fenced code block around a model response
fn strip_code_fence(text: &str) -> &str {
    let body = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text.trim();
    };
    body.split("```").next().unwrap_or(body).trim()
}

#[derive(Deserialize)]
struct RawNarrative {
    summary: Option<String>,
    findings: Option<Vec<String>>,
}

/// Parse `{summary, findings}` from free model text, tolerating code fences.
///
/// Missing keys fall back to neutral defaults; anything that is not a JSON
/// object is an error.
pub fn parse_narrative_response(text: &str) -> Result<Narrative, NarrativeError> {
    let body = strip_code_fence(text);
    let raw: RawNarrative =
        serde_json::from_str(body).map_err(|e| NarrativeError::Parse(e.to_string()))?;

    Ok(Narrative {
        summary: raw
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Analysis complete.".to_string()),
        findings: raw
            .findings
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| vec!["Observation confirmed.".to_string()]),
    })
}
