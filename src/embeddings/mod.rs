// Embeddings module
// Provider capability, the on-disk embedding cache and the cached computation path

pub mod cache;
pub mod openai;

#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

use anyhow::Context;
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::{Result, StoreError};

pub use cache::{EmbeddingCache, cache_directory_name, sanitize_model_name};
pub use openai::OpenAiClient;

/// Remote text-to-vector service.
///
/// Implementations return exactly one vector per input text, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn compute(&self, texts: &[String], model: &str, dimensions: usize)
    -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts`, consulting `cache` first.
///
/// Cache misses are deduplicated and sent to the provider in a single call;
/// the returned vectors are written back to the cache and the result follows
/// the order of `texts`. Provider errors are returned as-is.
#[inline]
pub async fn embeddings_create_with_cache(
    texts: &[String],
    model: &str,
    dimensions: usize,
    provider: &dyn EmbeddingProvider,
    cache: &EmbeddingCache,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Err(StoreError::InvalidArgument(
            "Cannot embed an empty list of texts".to_string(),
        ));
    }

    let mut misses: Vec<String> = Vec::new();
    let mut resolved: HashMap<&str, Vec<f32>> = HashMap::with_capacity(texts.len());

    for text in texts.iter().unique() {
        match cache.get(text).await? {
            Some(vector) if vector.len() == dimensions => {
                resolved.insert(text.as_str(), vector);
            }
            _ => misses.push(text.clone()),
        }
    }

    debug!(
        "Embedding cache for {}: {} hits, {} misses",
        model,
        resolved.len(),
        misses.len()
    );

    if !misses.is_empty() {
        let vectors = provider.compute(&misses, model, dimensions).await?;

        if vectors.len() != misses.len() {
            return Err(StoreError::Embedding(format!(
                "Provider returned {} embeddings for {} texts",
                vectors.len(),
                misses.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(StoreError::Embedding(format!(
                "Provider returned a {}-dimensional embedding, expected {}",
                bad.len(),
                dimensions
            )));
        }

        let entries: Vec<(&str, Vec<f32>)> =
            misses.iter().map(String::as_str).zip(vectors).collect();
        cache.set_many(&entries).await?;
        resolved.extend(entries);
    }

    texts
        .iter()
        .map(|text| {
            resolved.get(text.as_str()).cloned().ok_or_else(|| {
                StoreError::Embedding(format!("No embedding resolved for text '{}'", text))
            })
        })
        .collect()
}

/// Provider, cache, model and dimensionality bundled for document operations
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    model: String,
    dimensions: usize,
}

impl fmt::Debug for Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("cache", &self.cache.directory())
            .finish_non_exhaustive()
    }
}

impl Embedder {
    #[inline]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: EmbeddingCache,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            provider,
            cache,
            model: model.into(),
            dimensions,
        }
    }

    /// OpenAI-compatible provider plus on-disk cache, both from configuration
    #[inline]
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = OpenAiClient::new(&config.embedding)
            .context("Failed to create embedding client from config")?;

        let cache = EmbeddingCache::open(
            config.cache_dir_path(),
            &config.embedding.model,
            config.cache.size_limit_bytes,
        )
        .await
        .context("Failed to open embedding cache")?;

        Ok(Self::new(
            Arc::new(client),
            cache,
            config.embedding.model.clone(),
            config.embedding.dimensions,
        ))
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    #[inline]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embeddings_create_with_cache(
            texts,
            &self.model,
            self.dimensions,
            self.provider.as_ref(),
            &self.cache,
        )
        .await
    }
}
