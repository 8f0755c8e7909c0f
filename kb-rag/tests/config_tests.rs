//! Settings and RagConfig loading tests. No test touches the process environment.

use std::collections::HashMap;
use std::time::Duration;

use kb_rag::chunking::ChunkingStrategy;
use kb_rag::config::{DEFAULT_API_URL, RagConfig, Settings};
use kb_rag::distance::DistanceMetric;
use kb_rag::error::RagError;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name| map.get(name).cloned()
}

#[test]
fn missing_api_key_is_a_startup_error() {
    let err = Settings::from_lookup(lookup(&[])).unwrap_err();
    assert!(matches!(err, RagError::ConfigError(ref msg) if msg.contains("OPENAI_API_KEY")));

    let blank = Settings::from_lookup(lookup(&[("OPENAI_API_KEY", "  ")])).unwrap_err();
    assert!(matches!(blank, RagError::ConfigError(_)));
}

#[test]
fn defaults_apply_when_only_the_key_is_set() {
    let settings = Settings::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();

    assert_eq!(settings, Settings::new("sk-test"));
    assert_eq!(settings.api_url, DEFAULT_API_URL);
    assert_eq!(settings.embedding_api_key, "sk-test");
    assert!(settings.use_local_embeddings);
    assert_eq!(settings.embedding_dimensions, 384);
    assert_eq!(settings.timeout, Duration::from_secs(30));
    assert_eq!(settings.rag, RagConfig::default());
    assert_eq!(settings.rag.chunk_size, 500);
    assert_eq!(settings.rag.chunk_overlap, 50);
    assert_eq!(settings.rag.top_k, 5);
    assert_eq!(settings.rag.distance_threshold, 0.5);
    assert_eq!(settings.rag.chunking, ChunkingStrategy::Recursive);
    assert_eq!(settings.model_dir, std::path::PathBuf::from("models"));
    assert_eq!(settings.device, "auto");
}

#[test]
fn every_variable_is_honoured() {
    let settings = Settings::from_lookup(lookup(&[
        ("OPENAI_API_KEY", "sk-chat"),
        ("OPENAI_API_URL", "http://localhost:8080/v1"),
        ("KBRAG_EMBEDDING_API_KEY", "sk-embed"),
        ("KBRAG_USE_LOCAL_EMBEDDINGS", "off"),
        ("KBRAG_EMBEDDING_DIMENSIONS", "768"),
        ("KBRAG_CHAT_MODEL", "gpt-4o-mini"),
        ("KBRAG_TEMPERATURE", "0.7"),
        ("KBRAG_TIMEOUT_SECS", "5"),
        ("KBRAG_CHUNK_SIZE", "200"),
        ("KBRAG_CHUNK_OVERLAP", "20"),
        ("KBRAG_TOP_K", "8"),
        ("KBRAG_THRESHOLD", "0.75"),
        ("KBRAG_DATA_DIR", "/var/lib/kb"),
        ("KBRAG_DISTANCE", "euclidean"),
        ("KBRAG_CHUNKER", "fixed"),
        ("KBRAG_MODEL_DIR", "/opt/models"),
        ("KBRAG_DEVICE", "cpu"),
    ]))
    .unwrap();

    assert_eq!(settings.api_url, "http://localhost:8080/v1");
    assert_eq!(settings.embedding_api_key, "sk-embed");
    // The embedding URL falls back to the generation URL.
    assert_eq!(settings.embedding_api_url, "http://localhost:8080/v1");
    assert!(!settings.use_local_embeddings);
    assert_eq!(settings.embedding_dimensions, 768);
    assert_eq!(settings.chat_model, "gpt-4o-mini");
    assert_eq!(settings.temperature, 0.7);
    assert_eq!(settings.timeout, Duration::from_secs(5));
    assert_eq!(settings.rag.chunk_size, 200);
    assert_eq!(settings.rag.chunk_overlap, 20);
    assert_eq!(settings.rag.top_k, 8);
    assert_eq!(settings.rag.distance_threshold, 0.75);
    assert_eq!(settings.data_dir, std::path::PathBuf::from("/var/lib/kb"));
    assert_eq!(settings.distance, DistanceMetric::Euclidean);
    assert_eq!(settings.rag.chunking, ChunkingStrategy::Fixed);
    assert_eq!(settings.model_dir, std::path::PathBuf::from("/opt/models"));
    assert_eq!(settings.device, "cpu");
}

#[test]
fn unparsable_values_are_rejected() {
    for (name, value) in [
        ("KBRAG_CHUNK_SIZE", "big"),
        ("KBRAG_USE_LOCAL_EMBEDDINGS", "maybe"),
        ("KBRAG_DISTANCE", "manhattan"),
        ("KBRAG_TIMEOUT_SECS", "0"),
        ("KBRAG_THRESHOLD", "-1"),
        ("KBRAG_CHUNKER", "semantic"),
    ] {
        let result = Settings::from_lookup(lookup(&[("OPENAI_API_KEY", "k"), (name, value)]));
        assert!(matches!(result, Err(RagError::ConfigError(_))), "{name}={value} was accepted");
    }
}

#[test]
fn overlap_must_stay_below_chunk_size() {
    let result = Settings::from_lookup(lookup(&[
        ("OPENAI_API_KEY", "k"),
        ("KBRAG_CHUNK_SIZE", "100"),
        ("KBRAG_CHUNK_OVERLAP", "100"),
    ]));
    assert!(matches!(result, Err(RagError::ConfigError(_))));
}

#[test]
fn builder_validates() {
    let config = RagConfig::builder().chunk_size(256).chunk_overlap(32).top_k(3).build().unwrap();
    assert_eq!(config.chunk_size, 256);
    assert_eq!(config.distance_threshold, 0.5);

    assert!(RagConfig::builder().chunk_size(0).build().is_err());
    assert!(RagConfig::builder().top_k(0).build().is_err());
    assert!(RagConfig::builder().distance_threshold(f32::NAN).build().is_err());
}

#[test]
fn debug_output_redacts_keys() {
    let settings = Settings::new("sk-very-secret");
    let rendered = format!("{settings:?}");
    assert!(!rendered.contains("sk-very-secret"));
    assert!(rendered.contains("<redacted>"));
}
