//! In-memory similarity index and the retriever built on it.
//!
//! The index holds every chunk of one document with its vector and answers
//! nearest-neighbour queries by brute-force cosine similarity. It is built
//! once per ingested file and never mutated afterwards.

use anyhow::Result;
use std::fmt;
use std::sync::Arc;

use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{Chunk, Passage};

pub struct SimilarityIndex {
    entries: Vec<(Chunk, Vec<f32>)>,
}

impl SimilarityIndex {
    /// Build an index from chunks and their vectors, paired by position.
    pub fn build(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "cannot index {} chunks with {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        Ok(Self {
            entries: chunks.into_iter().zip(vectors).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` most similar chunks, best first. Ties keep document order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Passage> {
        let mut scored: Vec<Passage> = self
            .entries
            .iter()
            .map(|(chunk, vector)| Passage {
                chunk_index: chunk.index,
                text: chunk.text.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }
}

/// Read-only query interface over one document's [`SimilarityIndex`].
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: SimilarityIndex,
    k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: SimilarityIndex, k: usize) -> Self {
        Self { embedder, index, k }
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    /// Embed `question` and return the closest passages.
    ///
    /// An empty index yields no passages without calling the embedder.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<Passage>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed_query(question).await?;
        Ok(self.index.search(&query, self.k))
    }
}

impl fmt::Debug for Retriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retriever")
            .field("model", &self.embedder.model_name())
            .field("chunks", &self.index.len())
            .field("k", &self.k)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;
    use crate::embedding::cache::tests::{letter_vector, CountingEmbedder};
    use std::sync::atomic::Ordering;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
            hash: content_hash(text),
        }
    }

    fn index_of(texts: &[&str]) -> SimilarityIndex {
        let chunks: Vec<Chunk> = texts.iter().enumerate().map(|(i, t)| chunk(i, t)).collect();
        let vectors = texts.iter().map(|t| letter_vector(t)).collect();
        SimilarityIndex::build(chunks, vectors).unwrap()
    }

    #[test]
    fn build_rejects_mismatched_lengths() {
        assert!(SimilarityIndex::build(vec![chunk(0, "a")], vec![]).is_err());
    }

    #[test]
    fn search_orders_by_similarity() {
        let index = index_of(&["zzzz", "abc abc", "xyz"]);
        let hits = index.search(&letter_vector("abcabc"), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn search_caps_at_index_size() {
        let index = index_of(&["one", "two"]);
        assert_eq!(index.search(&letter_vector("one"), 10).len(), 2);
    }

    #[tokio::test]
    async fn retrieve_returns_top_k() {
        let embedder = Arc::new(CountingEmbedder::new());
        let retriever = Retriever::new(embedder, index_of(&["aaa", "bbb", "ccc", "abc"]), 1);
        let passages = retriever.retrieve("bbbb").await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "bbb");
    }

    #[tokio::test]
    async fn empty_index_skips_embedding() {
        let embedder = Arc::new(CountingEmbedder::new());
        let retriever = Retriever::new(embedder.clone(), index_of(&[]), 4);
        assert!(retriever.retrieve("anything").await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn debug_names_model_and_size() {
        let retriever = Retriever::new(
            Arc::new(CountingEmbedder::new()),
            index_of(&["one", "two"]),
            3,
        );
        assert_eq!(
            format!("{:?}", retriever),
            r#"Retriever { model: "counting/letters", chunks: 2, k: 3 }"#
        );
    }
}
