//! LLM enrichment for report narratives
//!
//! Supports an Ollama-compatible API for local inference. Enrichment is
//! strictly best-effort: callers wrap it in a timeout and fall back to the
//! rule-based narrative on any failure.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EnrichmentConfig;
use crate::error::{Error, Result};
use crate::types::{PeriodComparison, RankedEntry};

/// Prompt for the executive summary and task list.
///
/// The grounding instruction is a contract, not a style preference: the
/// model must only use numbers present in the supplied context.
pub const SUMMARY_PROMPT: &str = r#"You are writing the executive summary of a weekly search performance report.

The metrics context below is the complete ground truth. Every number you mention MUST appear in the context. Do NOT invent, estimate, or extrapolate any metric that is not present in the context.

Metrics context (JSON):
{context}

Write:
1. "summary": a 2-3 sentence executive summary of the period.
2. "tasks": exactly {task_count} follow-up tasks, highest impact first, technical fixes before general optimizations.

Respond with ONLY a JSON object of the form {"summary": "...", "tasks": ["...", ...]} and no other text."#;

/// Structured numeric context handed to the enrichment capability.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentContext {
    pub comparison: PeriodComparison,
    pub top_pages: Vec<RankedEntry>,
    pub top_queries: Vec<RankedEntry>,
    pub task_count: usize,
}

/// Enrichment output: an executive summary plus a short task list.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichedNarrative {
    pub summary: String,
    pub tasks: Vec<String>,
}

/// The optional text-enrichment capability.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Produce an executive summary and task list from the numeric context.
    async fn enrich(&self, context: &EnrichmentContext) -> Result<EnrichedNarrative>;
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama API response format.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// HTTP enrichment client for an Ollama-compatible endpoint.
pub struct HttpEnricher {
    config: EnrichmentConfig,
    client: Client,
}

impl HttpEnricher {
    pub fn new(config: EnrichmentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Check if the enrichment service is reachable.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn build_prompt(context: &EnrichmentContext) -> Result<String> {
        let context_json = serde_json::to_string_pretty(context)?;
        Ok(SUMMARY_PROMPT
            .replace("{context}", &context_json)
            .replace("{task_count}", &context.task_count.to_string()))
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, context: &EnrichmentContext) -> Result<EnrichedNarrative> {
        let url = format!("{}/api/generate", self.config.endpoint);
        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: Self::build_prompt(context)?,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Enrichment(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Enrichment(format!(
                "API error ({})",
                response.status()
            )));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| Error::Enrichment(format!("failed to decode response: {}", e)))?;

        // Models occasionally wrap the JSON in a code fence; strip it before
        // parsing.
        let text = body
            .response
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        serde_json::from_str(text)
            .map_err(|e| Error::Enrichment(format!("malformed narrative: {}", e)))
    }
}
