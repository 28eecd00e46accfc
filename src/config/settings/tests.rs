use super::*;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.model, "text-embedding-3-small");
    assert_eq!(config.embedding.dimensions, 512);
    assert_eq!(config.embedding.batch_size, 64);
    assert_eq!(config.cache.size_limit_bytes, 1 << 30);
    assert_eq!(config.database.path, PathBuf::from("vecdocs.db"));
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.embedding.base_url = "ftp://example.com".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.dimensions = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.batch_size = 4096;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.timeout_seconds = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.cache.size_limit_bytes = 0;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn base_url_gets_trailing_slash() {
    let config = EmbeddingConfig {
        base_url: "http://localhost:8080/v1".to_string(),
        ..EmbeddingConfig::default()
    };
    let url = config.base_url().expect("base url should parse");
    assert_eq!(url.as_str(), "http://localhost:8080/v1/");
    assert_eq!(
        url.join("embeddings").expect("join").as_str(),
        "http://localhost:8080/v1/embeddings"
    );
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [embedding]
        model = "text-embedding-3-large"
        dimensions = 256
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.embedding.model, "text-embedding-3-large");
    assert_eq!(parsed.embedding.dimensions, 256);
    assert_eq!(parsed.embedding.batch_size, 64);
    assert_eq!(parsed.cache, CacheConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = EmbeddingConfig::default();

    assert!(config.set_model("other-model".to_string()).is_ok());
    assert!(config.set_dimensions(1536).is_ok());
    assert!(
        config
            .set_base_url("https://example.com/v1/".to_string())
            .is_ok()
    );

    assert!(config.set_model("  ".to_string()).is_err());
    assert!(config.set_dimensions(0).is_err());
    assert!(config.set_dimensions(5000).is_err());
    assert!(config.set_base_url("not a url".to_string()).is_err());
    assert_eq!(config.model, "other-model");
    assert_eq!(config.dimensions, 1536);
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.embedding, EmbeddingConfig::default());
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.database_path(), temp_dir.path().join("vecdocs.db"));
    assert_eq!(
        config.cache_dir_path(),
        temp_dir.path().join("embedding-cache")
    );
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut config = Config::load(temp_dir.path()).expect("should load defaults");
    config.embedding.dimensions = 1024;
    config.cache.directory = PathBuf::from("/var/cache/vecdocs");
    config.save().expect("should save config");

    let reloaded = Config::load(temp_dir.path()).expect("should reload config");
    assert_eq!(reloaded.embedding.dimensions, 1024);
    assert_eq!(reloaded.cache_dir_path(), PathBuf::from("/var/cache/vecdocs"));
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[embedding]\ndimensions = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
#[serial]
fn config_dir_honours_environment() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    // SAFETY: serialised with other environment-mutating tests
    unsafe {
        std::env::set_var("VECDOCS_CONFIG_DIR", temp_dir.path());
    }
    let dir = Config::config_dir().expect("config dir should resolve");
    unsafe {
        std::env::remove_var("VECDOCS_CONFIG_DIR");
    }
    assert_eq!(dir, temp_dir.path());
}

#[test]
#[serial]
fn api_key_falls_back_to_environment() {
    let config = EmbeddingConfig::default();
    unsafe {
        std::env::set_var("OPENAI_API_KEY", "sk-from-env");
    }
    assert_eq!(config.resolved_api_key().as_deref(), Some("sk-from-env"));

    let explicit = EmbeddingConfig {
        api_key: Some("sk-explicit".to_string()),
        ..EmbeddingConfig::default()
    };
    assert_eq!(explicit.resolved_api_key().as_deref(), Some("sk-explicit"));
    unsafe {
        std::env::remove_var("OPENAI_API_KEY");
    }
}
