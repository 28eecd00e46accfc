use super::*;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Deterministic provider: the vector is derived from the text length
#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
    requested: Mutex<Vec<Vec<String>>>,
    dimensions_override: Option<usize>,
    drop_last: bool,
}

impl CountingProvider {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    async fn compute(
        &self,
        texts: &[String],
        _model: &str,
        dimensions: usize,
    ) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .expect("lock")
            .push(texts.to_vec());

        let dimensions = self.dimensions_override.unwrap_or(dimensions);
        let mut vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|text| vec![text.len() as f32; dimensions])
            .collect();
        if self.drop_last {
            vectors.pop();
        }
        Ok(vectors)
    }
}

struct FailingProvider;

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    async fn compute(&self, _: &[String], _: &str, _: usize) -> Result<Vec<Vec<f32>>> {
        Err(StoreError::Embedding("provider unavailable".to_string()))
    }
}

async fn open_cache() -> (TempDir, EmbeddingCache) {
    let temp_dir = TempDir::new().expect("temp dir");
    let cache = EmbeddingCache::open(temp_dir.path(), "test-model", 1 << 20)
        .await
        .expect("cache");
    (temp_dir, cache)
}

fn texts(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

#[tokio::test]
async fn empty_input_is_invalid() {
    let (_temp_dir, cache) = open_cache().await;
    let provider = CountingProvider::default();

    let err = embeddings_create_with_cache(&[], "test-model", 4, &provider, &cache)
        .await
        .expect_err("empty input");
    assert!(err.is_invalid_argument());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn second_call_is_served_from_cache() {
    let (_temp_dir, cache) = open_cache().await;
    let provider = CountingProvider::default();
    let input = texts(&["hello", "world!"]);

    let first = embeddings_create_with_cache(&input, "test-model", 4, &provider, &cache)
        .await
        .expect("first call");
    let second = embeddings_create_with_cache(&input, "test-model", 4, &provider, &cache)
        .await
        .expect("second call");

    assert_eq!(first, second);
    assert_eq!(provider.calls(), 1);
    assert_eq!(first[0], vec![5.0; 4]);
    assert_eq!(first[1], vec![6.0; 4]);
}

#[tokio::test]
async fn duplicate_misses_are_sent_once_and_order_is_kept() {
    let (_temp_dir, cache) = open_cache().await;
    let provider = CountingProvider::default();
    cache.set("cached", &[9.0; 2]).await.expect("seed cache");

    let input = texts(&["ab", "cached", "abc", "ab"]);
    let vectors = embeddings_create_with_cache(&input, "test-model", 2, &provider, &cache)
        .await
        .expect("embeddings");

    assert_eq!(
        vectors,
        vec![vec![2.0; 2], vec![9.0; 2], vec![3.0; 2], vec![2.0; 2]]
    );
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        provider.requested.lock().expect("lock").as_slice(),
        &[texts(&["ab", "abc"])]
    );
}

#[tokio::test]
async fn cached_vector_with_other_dimensions_is_a_miss() {
    let (_temp_dir, cache) = open_cache().await;
    let provider = CountingProvider::default();
    cache.set("hello", &[1.0; 3]).await.expect("seed cache");

    let vectors = embeddings_create_with_cache(&texts(&["hello"]), "test-model", 2, &provider, &cache)
        .await
        .expect("embeddings");

    assert_eq!(vectors, vec![vec![5.0; 2]]);
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        cache.get("hello").await.expect("get"),
        Some(vec![5.0; 2])
    );
}

#[tokio::test]
async fn wrong_dimensions_from_provider_is_an_error() {
    let (_temp_dir, cache) = open_cache().await;
    let provider = CountingProvider {
        dimensions_override: Some(3),
        ..CountingProvider::default()
    };

    let err = embeddings_create_with_cache(&texts(&["x"]), "test-model", 2, &provider, &cache)
        .await
        .expect_err("wrong dimensions");
    assert!(matches!(err, StoreError::Embedding(_)));
    assert!(cache.is_empty().await.expect("len"));
}

#[tokio::test]
async fn wrong_count_from_provider_is_an_error() {
    let (_temp_dir, cache) = open_cache().await;
    let provider = CountingProvider {
        drop_last: true,
        ..CountingProvider::default()
    };

    let err = embeddings_create_with_cache(&texts(&["x", "y"]), "test-model", 2, &provider, &cache)
        .await
        .expect_err("wrong count");
    assert!(matches!(err, StoreError::Embedding(_)));
}

#[tokio::test]
async fn provider_errors_pass_through() {
    let (_temp_dir, cache) = open_cache().await;

    let err = embeddings_create_with_cache(&texts(&["x"]), "test-model", 2, &FailingProvider, &cache)
        .await
        .expect_err("provider down");
    assert_eq!(err.to_string(), "Embedding error: provider unavailable");
}

#[tokio::test]
async fn embedder_uses_its_model_and_dimensions() {
    let (_temp_dir, cache) = open_cache().await;
    let provider = Arc::new(CountingProvider::default());
    let shared = Arc::clone(&provider) as Arc<dyn EmbeddingProvider>;
    let embedder = Embedder::new(shared, cache, "test-model", 3);

    assert_eq!(embedder.model(), "test-model");
    assert_eq!(embedder.dimensions(), 3);

    let vectors = embedder.embed(&texts(&["four"])).await.expect("embed");
    assert_eq!(vectors, vec![vec![4.0; 3]]);

    embedder.embed(&texts(&["four"])).await.expect("embed again");
    assert_eq!(provider.calls(), 1);
    assert!(format!("{embedder:?}").contains("test-model"));
}
