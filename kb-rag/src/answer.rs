//! Grounded answer synthesis.
//!
//! The [`Answerer`] retrieves context for a question, renders it into a
//! [`PromptTemplate`] and hands the prompt to a [`GenerationProvider`].
//! The generated text is returned verbatim.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::document::SearchResult;
use crate::error::{RagError, Result};
use crate::generation::GenerationProvider;
use crate::retriever::Retriever;

/// Text placed in the prompt when no chunk passed the threshold.
pub const NO_CONTEXT_MARKER: &str = "(no relevant context found)";

/// Separator between retrieved chunks in the rendered context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Default prompt: the retrieved material followed by the question.
pub const DEFAULT_TEMPLATE: &str = "Known material:\n{context}\n\nAnswer the question: {query}";

const CONTEXT_PLACEHOLDER: &str = "{context}";
const QUERY_PLACEHOLDER: &str = "{query}";

/// A fixed prompt with `{context}` and `{query}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { template: DEFAULT_TEMPLATE.to_string() }
    }
}

impl PromptTemplate {
    /// Create a template.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless both placeholders are present.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for placeholder in [CONTEXT_PLACEHOLDER, QUERY_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(RagError::ConfigError(format!(
                    "prompt template is missing the {placeholder} placeholder"
                )));
            }
        }
        Ok(Self { template })
    }

    /// The raw template text.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute both placeholders in one pass, so placeholder text that
    /// appears inside the context or the query is left alone.
    pub fn render(&self, context: &str, query: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + context.len() + query.len());
        let mut rest = self.template.as_str();

        loop {
            let next = [(CONTEXT_PLACEHOLDER, context), (QUERY_PLACEHOLDER, query)]
                .into_iter()
                .filter_map(|(placeholder, value)| {
                    rest.find(placeholder).map(|at| (at, placeholder, value))
                })
                .min_by_key(|(at, ..)| *at);

            match next {
                Some((at, placeholder, value)) => {
                    out.push_str(&rest[..at]);
                    out.push_str(value);
                    rest = &rest[at + placeholder.len()..];
                }
                None => {
                    out.push_str(rest);
                    return out;
                }
            }
        }
    }
}

/// Join hit texts in their ranked order, or return [`NO_CONTEXT_MARKER`]
/// if there are none.
pub fn build_context(hits: &[SearchResult]) -> String {
    if hits.is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }
    hits.iter().map(|hit| hit.chunk.text.as_str()).collect::<Vec<_>>().join(CONTEXT_SEPARATOR)
}

/// A generated answer together with the hits it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// The generated text, unmodified.
    pub text: String,
    /// Retrieved chunks used as context, ascending by distance.
    pub sources: Vec<SearchResult>,
}

/// Retrieves context and asks a generation provider to answer with it.
pub struct Answerer {
    retriever: Arc<Retriever>,
    generator: Arc<dyn GenerationProvider>,
    template: PromptTemplate,
}

impl Answerer {
    /// Create an answerer using the default prompt template.
    pub fn new(retriever: Arc<Retriever>, generator: Arc<dyn GenerationProvider>) -> Self {
        Self { retriever, generator, template: PromptTemplate::default() }
    }

    /// Replace the prompt template.
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// The prompt template in use.
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Answer `query` from the chunks within `threshold`.
    ///
    /// # Errors
    ///
    /// Propagates retrieval failures and [`RagError::GenerationError`].
    /// Nothing is retried here.
    pub async fn answer(&self, query: &str, k: usize, threshold: f32) -> Result<String> {
        self.answer_with_sources(query, k, threshold).await.map(|answer| answer.text)
    }

    /// Like [`answer`](Self::answer), also returning the retrieved hits.
    pub async fn answer_with_sources(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Answer> {
        let sources = self.retriever.retrieve(query, k, threshold).await?;
        if sources.is_empty() {
            warn!(k, threshold, "no chunk passed the threshold, answering without context");
        }

        let prompt = self.template.render(&build_context(&sources), query);
        let text = self.generator.generate(&prompt).await.map_err(|e| {
            error!(model = self.generator.model_name(), error = %e, "generation failed");
            e
        })?;

        info!(
            model = self.generator.model_name(),
            source_count = sources.len(),
            answer_len = text.len(),
            "answer generated"
        );
        Ok(Answer { text, sources })
    }
}
