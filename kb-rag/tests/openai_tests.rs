//! Remote provider tests against a local fake of the OpenAI HTTP API.

use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use kb_rag::embedding::EmbeddingProvider;
use kb_rag::error::{ProviderErrorKind, RagError};
use kb_rag::generation::{GenerationProvider, OpenAIChatConfig, OpenAIChatProvider};
use kb_rag::openai::{OpenAIEmbeddingConfig, OpenAIEmbeddingProvider};
use serde_json::{Value, json};

/// Serve `app` on an ephemeral port and return its `/v1` base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1")
}

fn inputs(body: &Value) -> Vec<String> {
    body["input"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

/// Returns `[len, 1, 0]` per input, listed in reverse order.
async fn embeddings_ok(Json(body): Json<Value>) -> Json<Value> {
    let data: Vec<Value> = inputs(&body)
        .iter()
        .enumerate()
        .rev()
        .map(|(i, text)| json!({ "index": i, "embedding": [text.len() as f32, 1.0, 0.0] }))
        .collect();
    Json(json!({ "data": data }))
}

/// Fails any batch that contains the text `bad`.
async fn embeddings_reject_bad(body: Json<Value>) -> axum::response::Response {
    if inputs(&body.0).iter().any(|t| t == "bad") {
        let error = json!({ "error": { "message": "invalid input" } });
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }
    embeddings_ok(body).await.into_response()
}

async fn embeddings_short(Json(body): Json<Value>) -> Json<Value> {
    let data: Vec<Value> = inputs(&body)
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, _)| json!({ "index": i, "embedding": [1.0, 1.0, 0.0] }))
        .collect();
    Json(json!({ "data": data }))
}

async fn rate_limited() -> impl IntoResponse {
    (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": { "message": "slow down" } })))
}

async fn unauthorized() -> impl IntoResponse {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": { "message": "bad key" } })))
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({ "data": [] }))
}

async fn chat_echo(Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
    let model = body["model"].as_str().unwrap_or_default();
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": format!("{model}: {prompt}") } }]
    }))
}

fn embedder(base_url: String, batch_size: usize) -> OpenAIEmbeddingProvider {
    let config = OpenAIEmbeddingConfig::new("sk-test")
        .with_base_url(base_url)
        .with_model("fake-embedding")
        .with_dimensions(3)
        .with_batch_size(batch_size);
    OpenAIEmbeddingProvider::new(config).unwrap()
}

#[tokio::test]
async fn embeddings_keep_input_order_across_batches() {
    let base = serve(Router::new().route("/v1/embeddings", post(embeddings_ok))).await;
    let provider = embedder(base, 2);

    let vectors = provider.embed_batch(&["a", "bb", "ccc", "dddd", "eeeee"]).await.unwrap();

    let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(provider.embed("xyz").await.unwrap(), vec![3.0, 1.0, 0.0]);
}

#[tokio::test]
async fn failed_batch_reports_its_first_index() {
    let base = serve(Router::new().route("/v1/embeddings", post(embeddings_reject_bad))).await;
    let provider = embedder(base, 2);

    let err = provider.embed_batch(&["a", "b", "c", "bad", "e"]).await.unwrap_err();

    match err {
        RagError::EmbeddingError { index, kind, message, .. } => {
            assert_eq!(index, Some(2));
            assert_eq!(kind, ProviderErrorKind::Provider);
            assert!(message.contains("invalid input"), "{message}");
        }
        other => panic!("expected EmbeddingError, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_vectors_fail_instead_of_padding() {
    let base = serve(Router::new().route("/v1/embeddings", post(embeddings_short))).await;
    let provider = embedder(base, 10);

    let err = provider.embed_batch(&["a", "b", "c"]).await.unwrap_err();

    assert!(matches!(err, RagError::EmbeddingError { index: Some(2), .. }), "{err}");
}

#[tokio::test]
async fn rate_limit_is_normalised() {
    let base = serve(Router::new().route("/v1/embeddings", post(rate_limited))).await;
    let err = embedder(base, 4).embed_batch(&["a"]).await.unwrap_err();
    assert_eq!(err.provider_kind(), Some(ProviderErrorKind::RateLimit));
    assert!(matches!(err, RagError::EmbeddingError { index: Some(0), .. }));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let base = serve(Router::new().route("/v1/embeddings", post(slow))).await;
    let config = OpenAIEmbeddingConfig::new("sk-test")
        .with_base_url(base)
        .with_dimensions(3)
        .with_timeout(Duration::from_millis(200));
    let provider = OpenAIEmbeddingProvider::new(config).unwrap();

    let err = provider.embed_batch(&["a"]).await.unwrap_err();

    assert!(err.is_timeout(), "{err}");
}

#[tokio::test]
async fn chat_sends_prompt_as_user_message() {
    let base = serve(Router::new().route("/v1/chat/completions", post(chat_echo))).await;
    let provider = OpenAIChatProvider::new(
        OpenAIChatConfig::new("sk-test").with_base_url(base).with_model("fake-chat"),
    )
    .unwrap();

    let answer = provider.generate("Where is Taipei 101?").await.unwrap();

    assert_eq!(answer, "fake-chat: Where is Taipei 101?");
    assert_eq!(provider.model_name(), "fake-chat");
}

#[tokio::test]
async fn chat_auth_failure_is_a_generation_error() {
    let base = serve(Router::new().route("/v1/chat/completions", post(unauthorized))).await;
    let provider =
        OpenAIChatProvider::new(OpenAIChatConfig::new("sk-wrong").with_base_url(base)).unwrap();

    let err = provider.generate("hello").await.unwrap_err();

    assert!(matches!(err, RagError::GenerationError { kind: ProviderErrorKind::Auth, .. }));
}

#[test]
fn unknown_model_without_dimensions_is_rejected() {
    let config = OpenAIEmbeddingConfig::new("sk-test").with_model("my-custom-model");
    assert!(matches!(OpenAIEmbeddingProvider::new(config), Err(RagError::ConfigError(_))));

    let empty_key = OpenAIEmbeddingConfig::new("");
    assert!(matches!(OpenAIEmbeddingProvider::new(empty_key), Err(RagError::ConfigError(_))));
}
