
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::EmbeddingProvider;
use crate::StoreError;
use crate::config::EmbeddingConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking client for OpenAI-compatible `/embeddings` endpoints
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: Url,
    api_key: Option<String>,
    batch_size: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_base_ms: u64,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .base_url()
            .context("Failed to parse embedding endpoint from config")?;

        let timeout = if config.timeout_seconds == 0 {
            DEFAULT_TIMEOUT_SECONDS
        } else {
            config.timeout_seconds
        };
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout)))
            .build()
            .into();

        Ok(Self {
            base_url,
            api_key: config.resolved_api_key(),
            batch_size: config.batch_size.max(1),
            agent,
            retry_attempts: if config.retry_attempts == 0 {
                DEFAULT_RETRY_ATTEMPTS
            } else {
                config.retry_attempts
            },
            backoff_base_ms: 1000,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Initial delay between retries; doubles on every attempt
    #[inline]
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Embed `texts` in batches of the configured size, preserving input order
    #[inline]
    pub fn embed_batch(
        &self,
        texts: &[String],
        model: &str,
        dimensions: usize,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts with {}", texts.len(), model);

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self
                .embed_single_batch(chunk, model, dimensions)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;
            results.extend(batch);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn embed_single_batch(
        &self,
        texts: &[String],
        model: &str,
        dimensions: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingsRequest {
            model,
            input: texts,
            dimensions,
        };

        let url = self
            .base_url
            .join("embeddings")
            .context("Failed to build embeddings URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;
        let authorization = self.api_key.as_ref().map(|key| format!("Bearer {key}"));

        let response_text = self
            .make_request_with_retry(|| {
                let mut request = self
                    .agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json");
                if let Some(authorization) = &authorization {
                    request = request.header("Authorization", authorization.as_str());
                }
                request
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbeddingsResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embeddings response")?;

        order_by_index(response.data, texts.len())
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
                            if *status >= 500 || *status == 429 {
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
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * self.backoff_base_ms;
                        let delay = Duration::from_millis(delay_ms);
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

/// Restore input order from the `index` field of each returned item
fn order_by_index(data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(anyhow::anyhow!(
            "Mismatch between request and response counts: {} vs {}",
            expected,
            data.len()
        ));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in data {
        let slot = slots
            .get_mut(item.index)
            .ok_or_else(|| anyhow::anyhow!("Embedding index {} out of range", item.index))?;
        if slot.replace(item.embedding).is_some() {
            return Err(anyhow::anyhow!("Duplicate embedding index {}", item.index));
        }
    }

    // Equal lengths and no duplicates leave no empty slot
    Ok(slots.into_iter().flatten().collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn compute(
        &self,
        texts: &[String],
        model: &str,
        dimensions: usize,
    ) -> crate::Result<Vec<Vec<f32>>> {
        let client = self.clone();
        let texts = texts.to_vec();
        let model = model.to_string();

        tokio::task::spawn_blocking(move || client.embed_batch(&texts, &model, dimensions))
            .await
            .map_err(|e| StoreError::Embedding(format!("Embedding task failed: {e}")))?
            .map_err(|e| StoreError::Embedding(format!("{e:#}")))
    }
}
