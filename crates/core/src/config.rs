use crate::chunking::ChunkingConfig;
use crate::composer::ComposerConfig;
use crate::indexer::IndexerConfig;
use crate::retriever::RetrieverConfig;
use crate::retry::RetryPolicy;
use crate::summarizer::SummaryConfig;
use crate::SessionError;

pub const DEFAULT_COLLECTION: &str = "pdf_knowledge";

/// Every tunable of a session, with the defaults used when nothing is configured.
#[derive(Debug, Clone, PartialEq)]
pub struct RagConfig {
    pub collection: String,
    pub chunking: ChunkingConfig,
    /// Chunks at each end of the corpus tagged BEGIN and END.
    pub edge_chunks: usize,
    pub indexer: IndexerConfig,
    pub retriever: RetrieverConfig,
    pub summary: SummaryConfig,
    pub composer: ComposerConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            chunking: ChunkingConfig::default(),
            edge_chunks: 3,
            indexer: IndexerConfig::default(),
            retriever: RetrieverConfig::default(),
            summary: SummaryConfig::default(),
            composer: ComposerConfig::default(),
        }
    }
}

impl RagConfig {
    /// Applies one retry policy to every provider and store call.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.indexer.retry = retry;
        self.retriever.retry = retry;
        self.summary.retry = retry;
        self.composer.retry = retry;
        self
    }

    /// Sets retrieval depth for both direct retrieval and answering.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.retriever.top_k = top_k;
        self.composer.top_k = top_k;
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.collection.trim().is_empty() {
            return Err(SessionError::Config("collection name must not be empty".to_string()));
        }
        self.chunking
            .validate()
            .map_err(|error| SessionError::Config(error.to_string()))?;
        if self.retriever.top_k == 0 || self.composer.top_k == 0 {
            return Err(SessionError::Config("top_k must be at least 1".to_string()));
        }
        if self.indexer.batch_size == 0 || self.indexer.workers == 0 {
            return Err(SessionError::Config(
                "embedding batch size and worker count must be at least 1".to_string(),
            ));
        }
        if self.indexer.retry.max_attempts == 0 {
            return Err(SessionError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.summary.sample_per_group == 0 {
            return Err(SessionError::Config("sample_per_group must be at least 1".to_string()));
        }
        if let Some(floor) = self.retriever.min_relevance {
            if !(-1.0..=1.0).contains(&floor) {
                return Err(SessionError::Config(format!(
                    "min_relevance {floor} is outside [-1, 1]"
                )));
            }
        }
        Ok(())
    }
}
