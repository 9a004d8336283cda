//! Gemini-backed narrative strategy.
//!
//! Sends the metrics prompt and both images to the `generateContent` REST
//! endpoint and parses the JSON narrative out of the first candidate. A single
//! bounded request is made; any failure is reported as a `NarrativeError` so
//! the chain can fall back to the rule-based templates.

use crate::core::narrative::{
    parse_narrative_response, Narrative, NarrativeContext, NarrativeError, NarrativeStrategy,
};
use crate::io::output::{encode_png, image_to_rgb};
use crate::types::Image;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the generative narrative collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    /// Never serialized back out
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl NarrativeConfig {
    /// Defaults with the API key taken from `GOOGLE_API_KEY`
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self {
            api_key,
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Narrative strategy calling the Gemini `generateContent` API
pub struct GeminiNarrator {
    client: reqwest::blocking::Client,
    api_key: String,
    url: String,
}

impl GeminiNarrator {
    pub fn new(config: &NarrativeConfig) -> Result<Self, NarrativeError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| NarrativeError::NotConfigured(format!("{} is not set", API_KEY_ENV)))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("orbital-change/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let url = format!(
            "{}/models/{}:generateContent",
            config.endpoint.trim_end_matches('/'),
            config.model
        );
        log::debug!("Gemini narrator targeting {}", url);

        Ok(Self {
            client,
            api_key,
            url,
        })
    }

    fn inline_png(image: &Image) -> Result<Value, NarrativeError> {
        let rgb = image_to_rgb(image).map_err(|e| NarrativeError::Encoding(e.to_string()))?;
        let bytes = encode_png(&rgb).map_err(|e| NarrativeError::Encoding(e.to_string()))?;
        Ok(json!({
            "inline_data": {
                "mime_type": "image/png",
                "data": BASE64.encode(bytes),
            }
        }))
    }

    fn request_body(&self, context: &NarrativeContext<'_>) -> Result<Value, NarrativeError> {
        Ok(json!({
            "contents": [{
                "parts": [
                    { "text": build_prompt(context) },
                    Self::inline_png(context.reference)?,
                    Self::inline_png(context.monitor)?,
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json"
            }
        }))
    }
}

impl NarrativeStrategy for GeminiNarrator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn narrate(&self, context: &NarrativeContext<'_>) -> Result<Narrative, NarrativeError> {
        let body = self.request_body(context)?;
        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()?;

        if !response.status().is_success() {
            return Err(NarrativeError::Status(response.status().as_u16()));
        }

        let payload: Value = response.json()?;
        let text = candidate_text(&payload).ok_or(NarrativeError::EmptyResponse)?;
        parse_narrative_response(&text)
    }
}

/// Analyst prompt embedding the scalar metrics
pub fn build_prompt(context: &NarrativeContext<'_>) -> String {
    let metrics = context.metrics;
    format!(
        "You are a senior satellite imagery analyst. Compare the two attached images: \
         the first is the reference acquisition (T1), the second the monitor acquisition (T2).\n\
         Automated change detection measured a surface divergence of {:.2}% \
         across {} distinct change clusters.\n\
         Describe what changed between the acquisitions and where.\n\
         Respond only with a JSON object of the form \
         {{\"summary\": \"<one or two sentences>\", \"findings\": [\"<finding>\", \"<finding>\", \"<finding>\"]}}.",
        metrics.change_percent, metrics.cluster_count
    )
}

/// Concatenated text parts of the first candidate, if any
fn candidate_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Some(text).filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::ChangeMetrics;

    fn metrics() -> ChangeMetrics {
        ChangeMetrics {
            change_percent: 4.25,
            cluster_count: 3,
            changed_pixels: 425,
            total_pixels: 10000,
            mean_similarity: 0.97,
        }
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let config = NarrativeConfig::default();
        assert!(!config.is_configured());
        assert!(matches!(
            GeminiNarrator::new(&config),
            Err(NarrativeError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_prompt_carries_metrics() {
        let image = Image::zeros((3, 4, 4));
        let metrics = metrics();
        let context = NarrativeContext {
            reference: &image,
            monitor: &image,
            metrics: &metrics,
        };
        let prompt = build_prompt(&context);
        assert!(prompt.contains("4.25%"));
        assert!(prompt.contains("3 distinct change clusters"));
        assert!(prompt.contains("\"summary\""));
    }

    #[test]
    fn test_candidate_text_extraction() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"summary\": " }, { "text": "\"Roads.\"}" }] }
            }]
        });
        assert_eq!(candidate_text(&payload).unwrap(), "{\"summary\": \"Roads.\"}");
        assert!(candidate_text(&json!({ "candidates": [] })).is_none());
    }

    #[test]
    fn test_request_body_inlines_both_images() {
        let config = NarrativeConfig {
            api_key: Some("test-key".to_string()),
            ..NarrativeConfig::default()
        };
        let narrator = GeminiNarrator::new(&config).unwrap();
        let image = Image::from_elem((3, 4, 4), 0.5);
        let metrics = metrics();
        let context = NarrativeContext {
            reference: &image,
            monitor: &image,
            metrics: &metrics,
        };
        let body = narrator.request_body(&context).unwrap();
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert!(narrator.url.ends_with("/models/gemini-1.5-flash:generateContent"));
    }

    #[test]
    fn test_unreachable_endpoint_fails() {
        let config = NarrativeConfig {
            api_key: Some("test-key".to_string()),
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..NarrativeConfig::default()
        };
        let narrator = GeminiNarrator::new(&config).unwrap();
        let image = Image::from_elem((3, 4, 4), 0.5);
        let metrics = metrics();
        let context = NarrativeContext {
            reference: &image,
            monitor: &image,
            metrics: &metrics,
        };
        assert!(narrator.narrate(&context).is_err());
    }

    #[test]
    fn test_config_serialization_omits_key() {
        let config = NarrativeConfig {
            api_key: Some("secret".to_string()),
            ..NarrativeConfig::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        assert!(!text.contains("secret"));
        let restored: NarrativeConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(restored.model, DEFAULT_MODEL);
        assert!(restored.api_key.is_none());
    }
}
