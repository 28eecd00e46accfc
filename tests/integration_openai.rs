#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

use anyhow::Result;
use serde_json::{Value, json};
use tempfile::TempDir;
use vecdocs::config::Config;
use vecdocs::database::Database;
use vecdocs::{Document, Embedder, SearchOptions};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const DIMENSIONS: usize = 8;

/// Answers like an OpenAI embeddings endpoint: one-hot vectors keyed on the text length
struct EmbeddingsResponder;

impl Respond for EmbeddingsResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(400);
        };
        let dimensions = body["dimensions"].as_u64().unwrap_or(1) as usize;
        let inputs = body["input"].as_array().cloned().unwrap_or_default();

        let data: Vec<Value> = inputs
            .iter()
            .enumerate()
            .rev()
            .map(|(index, input)| {
                let length = input.as_str().map_or(0, str::len);
                let mut embedding = vec![0.0_f32; dimensions];
                embedding[length % dimensions] = 1.0;
                json!({"object": "embedding", "index": index, "embedding": embedding})
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": data,
            "model": body["model"],
        }))
    }
}

fn config_for(server: &MockServer, config_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.base_dir = config_dir.path().to_path_buf();
    config.embedding.base_url = format!("{}/v1", server.uri());
    config.embedding.api_key = Some("test-key".to_string());
    config.embedding.dimensions = DIMENSIONS;
    config.embedding.retry_attempts = 1;
    config
}

#[tokio::test]
async fn embedder_from_config_talks_to_the_endpoint() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(EmbeddingsResponder)
        .expect(1)
        .mount(&server)
        .await;

    let config_dir = TempDir::new()?;
    let config = config_for(&server, &config_dir);
    let embedder = Embedder::from_config(&config).await?;

    assert_eq!(embedder.dimensions(), DIMENSIONS);
    assert!(
        embedder
            .cache()
            .directory()
            .starts_with(config.cache_dir_path())
    );

    let texts = vec!["abc".to_string(), "abcd".to_string(), "abc".to_string()];
    let vectors = embedder.embed(&texts).await?;
    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[0][3], 1.0);
    assert_eq!(vectors[1][4], 1.0);
    assert_eq!(vectors[0], vectors[2]);

    // Served from the on-disk cache, the mock expects a single request
    embedder.embed(&texts).await?;

    Ok(())
}

#[tokio::test]
async fn documents_are_searchable_through_the_http_provider() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(EmbeddingsResponder)
        .mount(&server)
        .await;

    let config_dir = TempDir::new()?;
    let config = config_for(&server, &config_dir);
    let embedder = Embedder::from_config(&config).await?;
    let database = Database::initialize_from_config(&config).await?;
    let mut conn = database.acquire().await?;

    // "AMD" (3 chars) and "Intel" (5 chars) land on different axes
    for (name, content) in [("amd", "AMD"), ("intel", "Intel")] {
        let document = Document::from_content(name, content, None)?;
        let mut document = Document::objects().create(&mut conn, document).await?;
        document.refresh_points(&mut conn, &embedder).await?;
    }

    let result = Document::search(
        &mut conn,
        "xyz",
        &embedder,
        &SearchOptions::default().top_k(1).with_documents(true),
    )
    .await?;

    assert_eq!(result.query.as_deref(), Some("xyz"));
    assert_eq!(result.documents.len(), 1);
    assert_eq!(result.documents[0].name, "amd");

    Ok(())
}

#[tokio::test]
async fn endpoint_failures_surface_as_embedding_errors() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config_dir = TempDir::new()?;
    let config = config_for(&server, &config_dir);
    let embedder = Embedder::from_config(&config).await?;

    let err = embedder
        .embed(&["anything".to_string()])
        .await
        .expect_err("server error");
    assert_eq!(err.status_code(), 502);

    Ok(())
}
