//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`RecursiveChunker`]: windows of at most `chunk_size` characters that
//!   prefer to end on a paragraph, line, sentence or word boundary
//! - [`FixedSizeChunker`]: hard cuts every `chunk_size - chunk_overlap` characters
//!
//! Both are pure and deterministic. Lengths are counted in `char`s, so
//! multi-byte text is never split inside a character. Consecutive chunks
//! always share exactly `chunk_overlap` characters. [`RagConfig::chunking`]
//! selects one of them through [`ChunkingStrategy`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RagConfig;
use crate::document::{Chunk, Document, MetadataValue};
use crate::error::RagError;

/// Break points in order of preference. A break falls right after the separator.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "。", "！", "？", " "];

/// Which [`Chunker`] a knowledge base uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    /// [`RecursiveChunker`].
    #[default]
    Recursive,
    /// [`FixedSizeChunker`].
    Fixed,
}

impl ChunkingStrategy {
    /// The name under which the strategy is configured.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recursive => "recursive",
            Self::Fixed => "fixed",
        }
    }

    /// Build the chunker for this strategy with the sizes of `config`.
    pub fn build(&self, config: &RagConfig) -> Arc<dyn Chunker> {
        match self {
            Self::Recursive => Arc::new(RecursiveChunker::from_config(config)),
            Self::Fixed => Arc::new(FixedSizeChunker::from_config(config)),
        }
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkingStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "fixed" => Ok(Self::Fixed),
            other => Err(RagError::ConfigError(format!("unknown chunking strategy '{other}'"))),
        }
    }
}

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text. Otherwise every
    /// chunk is non-empty and chunk ordinals run from zero without gaps.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits text into overlapping windows that end on natural boundaries.
///
/// Each window holds at most `chunk_size` characters. Within the window the
/// last paragraph break is preferred, then line, sentence and word breaks;
/// without any usable break the window is cut hard at `chunk_size`. The next
/// window starts `chunk_overlap` characters before the previous cut.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(500, 50);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap }
    }

    /// Create a chunker using the sizes of a validated [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let texts = split_text(&document.text, self.chunk_size, self.chunk_overlap);
        into_chunks(document, texts)
    }
}

/// Splits text into fixed-size windows by character count, ignoring boundaries.
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap }
    }

    /// Create a chunker using the sizes of a validated [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let texts = split_windows(&document.text, self.chunk_size, self.chunk_overlap, false);
        into_chunks(document, texts)
    }
}

/// Split `text` into overlapping chunks that prefer natural boundaries.
///
/// If `text` has at most `chunk_size` characters the result is exactly one
/// chunk equal to `text`. Empty text yields no chunks. An overlap that is not
/// smaller than `chunk_size` is clamped to `chunk_size - 1`.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    split_windows(text, chunk_size, chunk_overlap, true)
}

fn split_windows(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    natural_breaks: bool,
) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let overlap = chunk_overlap.min(chunk_size - 1);

    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> =
        text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let total = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        if total - start <= chunk_size {
            chunks.push(text[bounds[start]..].to_string());
            break;
        }

        let hard_end = start + chunk_size;
        // The cut must land beyond the overlap so the next window advances.
        let min_cut = start + overlap + 1;
        let cut = if natural_breaks {
            find_break(text, &bounds, start, min_cut, hard_end).unwrap_or(hard_end)
        } else {
            hard_end
        };

        chunks.push(text[bounds[start]..bounds[cut]].to_string());
        start = cut - overlap;
    }

    chunks
}

/// Find the preferred break (as a char index) in `[min_cut, max_cut]`.
fn find_break(
    text: &str,
    bounds: &[usize],
    start: usize,
    min_cut: usize,
    max_cut: usize,
) -> Option<usize> {
    let window_start = bounds[start];
    let window = &text[window_start..bounds[max_cut]];

    SEPARATORS.iter().find_map(|separator| {
        let pos = window.rfind(separator)?;
        let cut_byte = window_start + pos + separator.len();
        let cut = bounds.binary_search(&cut_byte).ok()?;
        (cut >= min_cut).then_some(cut)
    })
}

fn into_chunks(document: &Document, texts: Vec<String>) -> Vec<Chunk> {
    texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let mut metadata = document.metadata.clone();
            metadata.insert("chunk_index".to_string(), MetadataValue::Integer(index as i64));
            metadata.insert(
                "document_id".to_string(),
                MetadataValue::String(document.id.clone()),
            );
            Chunk { text, document_id: document.id.clone(), index, metadata }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_text("Taipei has the 101 Tower.", 500, 50);
        assert_eq!(chunks, vec!["Taipei has the 101 Tower.".to_string()]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_text("", 10, 2).is_empty());
    }

    #[test]
    fn prefers_sentence_break() {
        let text = "One two three. Four five six seven.";
        let chunks = split_text(text, 20, 0);
        assert_eq!(chunks[0], "One two three. ");
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn falls_back_to_hard_cut() {
        let chunks = split_text("abcdefghij", 4, 1);
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn multibyte_text_is_split_on_chars() {
        let text = "台北有台北101和西門町。高雄有蓮池潭和駁二藝術特區。";
        let chunks = split_text(text, 13, 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 13));
        assert_eq!(chunks[0], "台北有台北101和西門町。");
    }

    #[test]
    fn chunk_metadata_is_inherited() {
        let document =
            Document::new("doc", "alpha beta gamma delta").with_metadata("city", "Taipei");
        let chunks = RecursiveChunker::new(12, 3).chunk(&document);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.id(), format!("doc_{i}"));
            assert_eq!(chunk.metadata.get("city"), Some(&MetadataValue::from("Taipei")));
            assert_eq!(chunk.metadata.get("chunk_index"), Some(&MetadataValue::Integer(i as i64)));
        }
    }

    #[test]
    fn strategy_selects_chunker() {
        assert_eq!("Fixed".parse::<ChunkingStrategy>().unwrap(), ChunkingStrategy::Fixed);
        assert_eq!(ChunkingStrategy::default().to_string(), "recursive");
        assert!(matches!(
            "semantic".parse::<ChunkingStrategy>(),
            Err(RagError::ConfigError(msg)) if msg.contains("semantic")
        ));

        let config = RagConfig { chunk_size: 12, chunk_overlap: 0, ..RagConfig::default() };
        let document = Document::new("doc", "One two. Three four five");
        let fixed = ChunkingStrategy::Fixed.build(&config).chunk(&document);
        let recursive = ChunkingStrategy::Recursive.build(&config).chunk(&document);
        assert_eq!(fixed[0].text, "One two. Thr");
        assert_eq!(recursive[0].text, "One two. ");
    }
}
