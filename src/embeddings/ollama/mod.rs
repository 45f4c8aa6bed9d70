
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::EmbeddingBackend;
use crate::config::EmbeddingConfig;

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking client for an Ollama server's embedding API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_unit: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            dimension: config.dimension,
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
            retry_attempts: config.retry_attempts.max(1),
            backoff_unit: Duration::from_secs(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay between retries, doubled after every failed attempt
    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// One-time readiness check: server reachable, model present, dimension as configured
    #[inline]
    pub fn readiness_check(&self) -> Result<()> {
        debug!("Checking Ollama readiness at {}", self.base_url);

        self.validate_model().context("Model validation failed")?;

        let probe = self
            .generate_embedding("readiness probe")
            .context("Probe embedding failed")?;
        if probe.len() != self.dimension {
            return Err(anyhow::anyhow!(
                "Model '{}' produces {}-dimensional vectors but {} are configured",
                self.model,
                probe.len(),
                self.dimension
            ));
        }

        info!(
            "Ollama server at {} is ready with model {} ({} dimensions)",
            self.base_url, self.model, self.dimension
        );
        Ok(())
    }

    /// Validate that the configured model is available
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        debug!("Validating model: {}", self.model);

        let models = self.list_models().context("Failed to list models")?;

        if models.iter().any(|m| model_matches(&m.name, &self.model)) {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate the embedding for a single text input
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embedding")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        let embedding = embed_response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no vectors"))?;

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let factor = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) as u32;
                        let delay = self.backoff_unit * factor;
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

impl EmbeddingBackend for OllamaClient {
    #[inline]
    fn name(&self) -> &str {
        "ollama"
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.generate_embedding(text)
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Ollama reports `name:tag`; an untagged model name means `:latest`
fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted || (!wanted.contains(':') && available == format!("{}:latest", wanted))
}
