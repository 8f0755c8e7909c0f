//! Retriever tests: ingest, threshold filtering and multi-query merging.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use kb_rag::chunking::RecursiveChunker;
use kb_rag::distance::DistanceMetric;
use kb_rag::document::{Document, SearchResult};
use kb_rag::embedding::EmbeddingProvider;
use kb_rag::error::{ProviderErrorKind, RagError, Result};
use kb_rag::hashing::HashingEmbeddingProvider;
use kb_rag::inmemory::InMemoryVectorStore;
use kb_rag::retriever::Retriever;
use kb_rag::vectorstore::{CollectionHandle, CollectionInfo, VectorStore};
use proptest::prelude::*;

const DOC_A: &str = "Taipei has the 101 Tower and Ximending shopping district.";
const DOC_B: &str = "Kaohsiung has Lotus Pond and the Pier-2 Art Center.";

/// Embeds like the hashing model but fails on any text containing `FAIL`.
struct FlakyEmbedder {
    inner: HashingEmbeddingProvider,
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if let Some(index) = texts.iter().position(|t| t.contains("FAIL")) {
            return Err(RagError::EmbeddingError {
                provider: "flaky".to_string(),
                index: Some(index),
                kind: ProviderErrorKind::RateLimit,
                message: "scripted failure".to_string(),
            });
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

async fn retriever_with(embedder: Arc<dyn EmbeddingProvider>) -> Retriever {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let info = CollectionInfo::for_embedder("travel", embedder.as_ref(), DistanceMetric::Cosine);
    let collection = CollectionHandle::open(store, info).await.unwrap();
    Retriever::new(collection, embedder, Arc::new(RecursiveChunker::new(500, 50))).unwrap()
}

async fn travel_retriever() -> Retriever {
    let retriever = retriever_with(Arc::new(HashingEmbeddingProvider::new(384).unwrap())).await;
    retriever
        .ingest(&[Document::new("taipei", DOC_A), Document::new("kaohsiung", DOC_B)])
        .await
        .unwrap();
    retriever
}

fn ids(results: &[SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.chunk.id()).collect()
}

#[tokio::test]
async fn taipei_query_returns_only_taipei_chunks() {
    let retriever = travel_retriever().await;

    let results = retriever.retrieve("Taipei attractions", 2, 0.9).await.unwrap();

    assert_eq!(ids(&results), vec!["taipei_0"]);
    assert_eq!(results[0].chunk.text, DOC_A);
    assert!(results[0].distance < 0.9);

    // Without a tight threshold both come back, Taipei first.
    let all = retriever.retrieve("Taipei attractions", 2, 2.0).await.unwrap();
    assert_eq!(ids(&all), vec!["taipei_0", "kaohsiung_0"]);
}

#[tokio::test]
async fn nothing_within_threshold_is_empty_not_error() {
    let retriever = travel_retriever().await;
    let results = retriever.retrieve("completely unrelated words", 5, 0.1).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn reingest_overwrites_instead_of_duplicating() {
    let retriever = travel_retriever().await;
    assert_eq!(retriever.count().await.unwrap(), 2);

    let report = retriever.ingest(&[Document::new("taipei", DOC_A)]).await.unwrap();

    assert_eq!(report.chunks, 1);
    assert_eq!(retriever.count().await.unwrap(), 2);
}

#[tokio::test]
async fn ingest_is_not_atomic_across_documents() {
    let inner = HashingEmbeddingProvider::new(64).unwrap();
    let retriever = retriever_with(Arc::new(FlakyEmbedder { inner })).await;

    let docs = [
        Document::new("taipei", DOC_A),
        Document::new("broken", "This one will FAIL to embed."),
        Document::new("kaohsiung", DOC_B),
    ];
    let err = retriever.ingest(&docs).await.unwrap_err();

    match &err {
        RagError::IngestError { document_id, stored_chunks, source } => {
            assert_eq!(document_id, "broken");
            assert_eq!(*stored_chunks, 1);
            assert!(matches!(**source, RagError::EmbeddingError { index: Some(0), .. }));
        }
        other => panic!("expected IngestError, got {other:?}"),
    }
    assert_eq!(err.provider_kind(), Some(ProviderErrorKind::RateLimit));

    // The first document stays committed; the third was never reached.
    assert_eq!(retriever.count().await.unwrap(), 1);
}

#[tokio::test]
async fn empty_documents_are_skipped() {
    let retriever = retriever_with(Arc::new(HashingEmbeddingProvider::new(64).unwrap())).await;
    let report = retriever
        .ingest(&[Document::new("empty", ""), Document::new("taipei", DOC_A)])
        .await
        .unwrap();
    assert_eq!(report.documents, 2);
    assert_eq!(report.chunks, 1);
}

#[tokio::test]
async fn query_embedding_failure_is_an_embedding_error() {
    let inner = HashingEmbeddingProvider::new(64).unwrap();
    let retriever = retriever_with(Arc::new(FlakyEmbedder { inner })).await;
    let err = retriever.retrieve("FAIL", 3, 1.0).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingError { .. }));
}

#[tokio::test]
async fn store_failures_become_retrieval_errors() {
    let retriever = travel_retriever().await;
    let err = retriever.retrieve("Taipei", 0, 1.0).await.unwrap_err();
    assert!(
        matches!(&err, RagError::RetrievalError { collection, .. } if collection == "travel"),
        "{err}"
    );
}

#[tokio::test]
async fn embedder_must_match_collection_dimension() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let info = CollectionInfo::new("travel", 128, DistanceMetric::Cosine, "hashing-128");
    let collection = CollectionHandle::open(store, info).await.unwrap();
    let result = Retriever::new(
        collection,
        Arc::new(HashingEmbeddingProvider::new(384).unwrap()),
        Arc::new(RecursiveChunker::new(100, 10)),
    );
    assert!(matches!(result, Err(RagError::ConfigError(_))));
}

#[tokio::test]
async fn embedder_must_match_collection_model() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let info = CollectionInfo::new("travel", 384, DistanceMetric::Cosine, "all-MiniLM-L6-v2");
    let collection = CollectionHandle::open(store, info).await.unwrap();
    let result = Retriever::new(
        collection,
        Arc::new(HashingEmbeddingProvider::new(384).unwrap()),
        Arc::new(RecursiveChunker::new(100, 10)),
    );
    assert!(
        matches!(result, Err(RagError::ConfigError(ref msg)) if msg.contains("all-MiniLM-L6-v2")),
        "{result:?}"
    );
}

#[tokio::test]
async fn retrieve_many_merges_and_deduplicates() {
    let retriever = travel_retriever().await;

    let merged = retriever
        .retrieve_many(&["Taipei attractions", "Kaohsiung Lotus Pond", "Taipei Tower"], 2, 0.95)
        .await
        .unwrap();

    let merged_ids = ids(&merged);
    assert_eq!(merged_ids.len(), 2);
    assert!(merged_ids.contains(&"taipei_0".to_string()));
    assert!(merged_ids.contains(&"kaohsiung_0".to_string()));
    for window in merged.windows(2) {
        assert!(window[0].distance <= window[1].distance);
    }

    // The kept distance is the best any query produced.
    let single = retriever.retrieve("Taipei Tower", 1, 0.95).await.unwrap();
    let taipei = merged.iter().find(|r| r.chunk.id() == "taipei_0").unwrap();
    assert!(taipei.distance <= single[0].distance);
}

/// **Properties 3 and 4: ordering and threshold monotonicity**
mod prop_threshold {
    use super::*;

    fn corpus() -> Vec<Document> {
        [
            DOC_A,
            DOC_B,
            "Tainan has old temples and beef soup.",
            "Taichung has the rainbow village and night markets.",
            "Hualien has Taroko Gorge and marble cliffs.",
            "Taipei night markets serve beef noodles and bubble tea.",
        ]
        .iter()
        .enumerate()
        .map(|(i, text)| Document::new(format!("doc{i}"), *text))
        .collect()
    }

    fn run(query: &str, k: usize, thresholds: &[f32]) -> Vec<Vec<SearchResult>> {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let retriever =
                retriever_with(Arc::new(HashingEmbeddingProvider::new(64).unwrap())).await;
            retriever.ingest(&corpus()).await.unwrap();
            let mut out = Vec::new();
            for t in thresholds {
                out.push(retriever.retrieve(query, k, *t).await.unwrap());
            }
            out
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn tighter_threshold_is_a_subset(
            query in concat!(
                "(Taipei|beef|night|markets|temples|gorge|tea|Lotus) ",
                "(Taipei|beef|night|markets|temples|gorge|tea|Lotus)",
            ),
            k in 1usize..8,
            a in 0.0f32..2.0,
            b in 0.0f32..2.0,
        ) {
            let (t1, t2) = if a <= b { (a, b) } else { (b, a) };
            let results = run(&query, k, &[t1, t2, f32::INFINITY]);
            let (tight, loose, unfiltered) = (&results[0], &results[1], &results[2]);

            let tight_ids: HashSet<String> = ids(tight).into_iter().collect();
            let loose_ids: HashSet<String> = ids(loose).into_iter().collect();
            let all_ids: HashSet<String> = ids(unfiltered).into_iter().collect();
            prop_assert!(tight_ids.is_subset(&loose_ids));
            prop_assert!(loose_ids.is_subset(&all_ids));

            for result in [tight, loose, unfiltered] {
                prop_assert!(result.len() <= k);
                for window in result.windows(2) {
                    prop_assert!(window[0].distance <= window[1].distance);
                }
            }
            prop_assert!(tight.iter().all(|r| r.distance <= t1));
        }
    }
}
