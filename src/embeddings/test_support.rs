use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use super::{EmbeddingCache, EmbeddingProvider, Embedder};
use crate::Result;

/// Provider returning fixed vectors for known texts and a constant vector otherwise
#[derive(Debug, Default)]
pub(crate) struct FixedProvider {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl FixedProvider {
    pub(crate) fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    async fn compute(
        &self,
        texts: &[String],
        _model: &str,
        dimensions: usize,
    ) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![1.0; dimensions])
            })
            .collect())
    }
}

/// Embedder over `provider` with a throwaway on-disk cache
pub(crate) async fn test_embedder(
    provider: Arc<FixedProvider>,
    dimensions: usize,
) -> (TempDir, Embedder) {
    let temp_dir = TempDir::new().expect("temp dir");
    let cache = EmbeddingCache::open(temp_dir.path(), "test-model", 1 << 20)
        .await
        .expect("cache");
    (
        temp_dir,
        Embedder::new(provider, cache, "test-model", dimensions),
    )
}
