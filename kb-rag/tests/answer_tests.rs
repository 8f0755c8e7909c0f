//! Answerer tests with a recording generator.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kb_rag::answer::{Answerer, NO_CONTEXT_MARKER, PromptTemplate};
use kb_rag::chunking::RecursiveChunker;
use kb_rag::distance::DistanceMetric;
use kb_rag::document::Document;
use kb_rag::error::{ProviderErrorKind, RagError, Result};
use kb_rag::generation::GenerationProvider;
use kb_rag::hashing::HashingEmbeddingProvider;
use kb_rag::inmemory::InMemoryVectorStore;
use kb_rag::retriever::Retriever;
use kb_rag::vectorstore::{CollectionHandle, CollectionInfo};

/// Records every prompt and answers with a fixed reply, or fails if scripted to.
#[derive(Default)]
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
    fail_with: Option<ProviderErrorKind>,
}

impl RecordingGenerator {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.fail_with {
            Some(kind) => Err(RagError::GenerationError {
                provider: "recording".to_string(),
                kind,
                message: "scripted failure".to_string(),
            }),
            None => Ok("Visit Taipei 101 at sunset.".to_string()),
        }
    }

    fn model_name(&self) -> &str {
        "recording"
    }
}

async fn travel_retriever() -> Arc<Retriever> {
    let embedder = Arc::new(HashingEmbeddingProvider::new(384).unwrap());
    let info = CollectionInfo::for_embedder("travel", embedder.as_ref(), DistanceMetric::Cosine);
    let collection =
        CollectionHandle::open(Arc::new(InMemoryVectorStore::new()), info).await.unwrap();
    let retriever =
        Retriever::new(collection, embedder, Arc::new(RecursiveChunker::new(500, 50))).unwrap();
    retriever
        .ingest(&[
            Document::new("taipei", "Taipei has the 101 Tower and Ximending shopping district."),
            Document::new("kaohsiung", "Kaohsiung has Lotus Pond and the Pier-2 Art Center."),
        ])
        .await
        .unwrap();
    Arc::new(retriever)
}

#[tokio::test]
async fn prompt_carries_retrieved_context_and_query() {
    let generator = Arc::new(RecordingGenerator::default());
    let answerer = Answerer::new(travel_retriever().await, generator.clone());

    let answer = answerer.answer_with_sources("Taipei attractions", 2, 0.9).await.unwrap();

    assert_eq!(answer.text, "Visit Taipei 101 at sunset.");
    assert_eq!(answer.sources.len(), 1);
    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Ximending shopping district"));
    assert!(!prompts[0].contains("Lotus Pond"));
    assert!(prompts[0].ends_with("Answer the question: Taipei attractions"));
}

#[tokio::test]
async fn empty_retrieval_still_generates_with_marker() {
    let generator = Arc::new(RecordingGenerator::default());
    let answerer = Answerer::new(travel_retriever().await, generator.clone());

    let text = answerer.answer("unrelated question", 3, 0.05).await.unwrap();

    assert!(!text.is_empty());
    let prompts = generator.prompts();
    assert!(prompts[0].contains(NO_CONTEXT_MARKER));
    assert!(prompts[0].contains("unrelated question"));
}

#[tokio::test]
async fn loose_threshold_joins_chunks_in_rank_order() {
    let generator = Arc::new(RecordingGenerator::default());
    let template = PromptTemplate::new("{context}|{query}").unwrap();
    let answerer =
        Answerer::new(travel_retriever().await, generator.clone()).with_template(template);

    answerer.answer("Taipei attractions", 2, 2.0).await.unwrap();

    let prompt = &generator.prompts()[0];
    assert_eq!(
        prompt,
        "Taipei has the 101 Tower and Ximending shopping district.\n\n\
         Kaohsiung has Lotus Pond and the Pier-2 Art Center.|Taipei attractions"
    );
}

#[tokio::test]
async fn generation_errors_propagate_without_retry() {
    let generator = Arc::new(RecordingGenerator {
        fail_with: Some(ProviderErrorKind::Timeout),
        ..Default::default()
    });
    let answerer = Answerer::new(travel_retriever().await, generator.clone());

    let err = answerer.answer("Taipei attractions", 2, 0.9).await.unwrap_err();

    assert!(matches!(err, RagError::GenerationError { .. }));
    assert!(err.is_timeout());
    assert_eq!(generator.prompts().len(), 1);
}
