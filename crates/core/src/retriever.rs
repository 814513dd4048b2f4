use crate::embeddings::{Embedder, EmbeddingSpace};
use crate::retry::RetryPolicy;
use crate::traits::VectorStore;
use crate::{RetrievalError, RetrievalResult};
use std::sync::Arc;
use tracing::debug;

/// Extra hits requested beyond `k` so equal scores at the cut can be ordered by corpus position.
const TIE_MARGIN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrieverConfig {
    pub top_k: usize,
    /// Results scoring below the floor are dropped.
    pub min_relevance: Option<f32>,
    pub retry: RetryPolicy,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            min_relevance: None,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            config,
        }
    }

    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    pub async fn indexed_count(&self) -> Result<usize, RetrievalError> {
        let count = self
            .config
            .retry
            .run("count", || self.store.count(&self.collection))
            .await?;
        Ok(count)
    }

    /// At most `k` results, best first; equal scores keep corpus order.
    ///
    /// An absent or empty collection yields an empty sequence. A collection written by a
    /// different embedding model is refused.
    pub async fn retrieve(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if k == 0 || query_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let Some(spec) = self.store.describe(&self.collection).await? else {
            return Ok(Vec::new());
        };
        EmbeddingSpace::of(self.embedder.as_ref()).ensure_compatible(&self.collection, &spec)?;

        let total = self.indexed_count().await?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let retry = self.config.retry;
        let query_vector = retry
            .run("embed_query", || self.embedder.embed(query_text))
            .await?;

        // The store may cut a run of equal scores anywhere; widen until the run ends
        // inside the window so the earliest chunks win.
        let mut limit = k.saturating_add(TIE_MARGIN).min(total);
        let mut results = loop {
            let mut hits = retry
                .run("query", || self.store.query(&self.collection, &query_vector, limit))
                .await?;
            hits.sort_by(|left, right| {
                right
                    .relevance_score
                    .total_cmp(&left.relevance_score)
                    .then(left.chunk.ordinal.cmp(&right.chunk.ordinal))
            });

            let tie_at_cut = hits.len() > k
                && hits.len() >= limit
                && hits
                    .last()
                    .is_some_and(|last| last.relevance_score == hits[k - 1].relevance_score);
            if tie_at_cut && limit < total {
                limit = limit.saturating_mul(2).min(total);
                continue;
            }
            break hits;
        };

        if let Some(floor) = self.config.min_relevance {
            results.retain(|result| result.relevance_score >= floor);
        }
        results.truncate(k);

        debug!(query = %query_text, hits = results.len(), "retrieved");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::indexer::{Indexer, IndexerConfig};
    use crate::stores::InMemoryVectorStore;
    use crate::test_support::{chunk, fast_retry, FaultyStore, FlakyEmbedder};
    use crate::Chunk;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(CharacterNgramEmbedder { dimensions: 1024 })
    }

    fn retriever(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, floor: Option<f32>) -> Retriever {
        Retriever::new(
            embedder,
            store,
            "docs",
            RetrieverConfig {
                top_k: 3,
                min_relevance: floor,
                retry: fast_retry(),
            },
        )
    }

    async fn indexed(chunks: &[Chunk]) -> Result<Arc<InMemoryVectorStore>, RetrievalError> {
        let store = Arc::new(InMemoryVectorStore::new());
        index_into(store.clone(), chunks).await?;
        Ok(store)
    }

    async fn index_into(store: Arc<dyn VectorStore>, chunks: &[Chunk]) -> Result<(), RetrievalError> {
        let config = IndexerConfig {
            retry: fast_retry(),
            ..IndexerConfig::default()
        };
        Indexer::new(embedder(), store, "docs", config)
            .index(chunks)
            .await?;
        Ok(())
    }

    fn three_pages() -> Vec<Chunk> {
        vec![
            chunk("annual.pdf", 1, 0, "The company was founded in 1998 and is headquartered in Oslo."),
            chunk("annual.pdf", 2, 1, "Revenue grew 40% in Q3, driven by subscription sales."),
            chunk("annual.pdf", 3, 2, "The board approved a new sustainability policy for next year."),
        ]
    }

    #[tokio::test]
    async fn relevant_page_ranks_first() -> Result<(), RetrievalError> {
        let store = indexed(&three_pages()).await?;
        let results = retriever(embedder(), store, None)
            .retrieve("what happened to revenue in Q3", 3)
            .await?;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk.source_page, 2);
        assert!(results
            .windows(2)
            .all(|pair| pair[0].relevance_score >= pair[1].relevance_score));
        Ok(())
    }

    #[tokio::test]
    async fn results_are_bounded_by_k() -> Result<(), RetrievalError> {
        let store = indexed(&three_pages()).await?;
        let results = retriever(embedder(), store, None).retrieve("revenue", 1).await?;
        assert_eq!(results.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_or_reset_collection_returns_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let fresh = Arc::new(InMemoryVectorStore::new());
        assert!(retriever(embedder(), fresh, None).retrieve("revenue", 3).await?.is_empty());

        let store = indexed(&three_pages()).await?;
        store.delete_collection("docs").await?;
        assert!(retriever(embedder(), store, None).retrieve("revenue", 3).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn relevance_floor_filters_weak_matches() -> Result<(), RetrievalError> {
        let store = indexed(&three_pages()).await?;
        let results = retriever(embedder(), store, Some(0.99))
            .retrieve("zzzz qqqq xxxx", 3)
            .await?;
        assert!(results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn equal_scores_resolve_to_earliest_chunks() -> Result<(), RetrievalError> {
        let mut chunks: Vec<Chunk> = (0..12)
            .map(|index| chunk("policy.pdf", index as u32 + 1, index, "Confidential. Do not distribute."))
            .collect();
        chunks.push(chunk("policy.pdf", 13, 12, "Travel expenses are reimbursed within thirty days."));

        let store = Arc::new(FaultyStore::new().reversing_ties());
        index_into(store.clone(), &chunks).await?;

        let results = retriever(embedder(), store, None)
            .retrieve("Confidential. Do not distribute.", 2)
            .await?;

        let ordinals: Vec<u64> = results.iter().map(|result| result.chunk.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_query_embedder_is_refused() -> Result<(), RetrievalError> {
        let store = indexed(&three_pages()).await?;
        let result = retriever(Arc::new(FlakyEmbedder::new(1024)), store, None)
            .retrieve("revenue", 3)
            .await;
        assert!(matches!(result, Err(RetrievalError::EmbeddingMismatch { .. })));
        Ok(())
    }
}
