use crate::embeddings::{Embedder, EmbeddingSpace};
use crate::retry::RetryPolicy;
use crate::traits::VectorStore;
use crate::{Chunk, IndexedVector, RetrievalError, StoreError};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerConfig {
    pub batch_size: usize,
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChunk {
    pub chunk_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub succeeded: usize,
    pub failed: Vec<FailedChunk>,
}

impl IndexReport {
    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|failure| failure.chunk_id.clone()).collect()
    }
}

type Embedded = (String, Result<Vec<f32>, String>);

pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    config: IndexerConfig,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            config,
        }
    }

    pub fn space(&self) -> EmbeddingSpace {
        EmbeddingSpace::of(self.embedder.as_ref())
    }

    /// Fails when the collection was built with another embedding model or size.
    /// A missing collection is compatible.
    pub async fn check_compatible(&self) -> Result<(), RetrievalError> {
        let existing = self
            .config
            .retry
            .run("describe", || self.store.describe(&self.collection))
            .await?;
        if let Some(existing) = existing {
            self.space().ensure_compatible(&self.collection, &existing)?;
        }
        Ok(())
    }

    /// Embeds and upserts `chunks`. Chunks whose embedding or upsert still fails after
    /// retries are reported individually; the rest are stored.
    pub async fn index(&self, chunks: &[Chunk]) -> Result<IndexReport, RetrievalError> {
        let space = self.space();
        let spec = space.collection_spec();

        self.check_compatible().await?;
        self.config
            .retry
            .run("ensure_collection", || {
                self.store.ensure_collection(&self.collection, &spec)
            })
            .await?;

        let batch_size = self.config.batch_size.max(1);
        let embedded: HashMap<String, Result<Vec<f32>, String>> = stream::iter(chunks.chunks(batch_size))
            .map(|batch| self.embed_group(batch, &space))
            .buffer_unordered(self.config.workers.max(1))
            .collect::<Vec<Vec<Embedded>>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        let mut report = IndexReport::default();
        let mut ready = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match embedded.get(&chunk.chunk_id) {
                Some(Ok(embedding)) => ready.push(IndexedVector {
                    chunk_id: chunk.chunk_id.clone(),
                    embedding: embedding.clone(),
                    chunk: chunk.clone(),
                }),
                Some(Err(reason)) => report.failed.push(FailedChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    reason: reason.clone(),
                }),
                None => report.failed.push(FailedChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    reason: "no embedding produced".to_string(),
                }),
            }
        }

        for batch in ready.chunks(batch_size) {
            let stored = self
                .config
                .retry
                .run("upsert", || self.store.upsert(&self.collection, &spec, batch))
                .await;

            match stored {
                Ok(()) => report.succeeded += batch.len(),
                Err(error) => {
                    warn!(collection = %self.collection, error = %error, chunks = batch.len(), "upsert failed");
                    report.failed.extend(batch.iter().map(|vector| FailedChunk {
                        chunk_id: vector.chunk_id.clone(),
                        reason: error.to_string(),
                    }));
                }
            }
        }

        info!(
            collection = %self.collection,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            "indexing finished"
        );
        Ok(report)
    }

    async fn embed_group(&self, batch: &[Chunk], space: &EmbeddingSpace) -> Vec<Embedded> {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let retry = self.config.retry;

        match retry
            .run("embed_batch", || self.embedder.embed_batch(&texts))
            .await
        {
            Ok(vectors) if vectors.len() == batch.len() => {
                return batch
                    .iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| (chunk.chunk_id.clone(), check_dimensions(vector, space)))
                    .collect();
            }
            Ok(vectors) => {
                debug!(expected = batch.len(), got = vectors.len(), "batch size mismatch, embedding one by one");
            }
            Err(error) => {
                debug!(error = %error, chunks = batch.len(), "batch embedding failed, embedding one by one");
            }
        }

        let mut embedded = Vec::with_capacity(batch.len());
        for chunk in batch {
            let result = retry
                .run("embed", || self.embedder.embed(&chunk.text))
                .await
                .map_err(|error| error.to_string())
                .and_then(|vector| check_dimensions(vector, space));
            if let Err(reason) = &result {
                warn!(chunk_id = %chunk.chunk_id, reason = %reason, "chunk not indexed");
            }
            embedded.push((chunk.chunk_id.clone(), result));
        }
        embedded
    }

    /// Rewrites ordinal and corpus position of already stored chunks.
    pub async fn refresh(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.config
            .retry
            .run("update_chunks", || {
                self.store.update_chunks(&self.collection, chunks)
            })
            .await
    }

    pub async fn remove(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        self.config
            .retry
            .run("delete_points", || {
                self.store.delete_points(&self.collection, chunk_ids)
            })
            .await
    }

    /// Drops the whole collection; a missing collection is not an error.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.config
            .retry
            .run("delete_collection", || {
                self.store.delete_collection(&self.collection)
            })
            .await?;
        info!(collection = %self.collection, "collection dropped");
        Ok(())
    }
}

fn check_dimensions(vector: Vec<f32>, space: &EmbeddingSpace) -> Result<Vec<f32>, String> {
    if vector.len() == space.dimensions {
        Ok(vector)
    } else {
        Err(format!(
            "embedding has {} dimensions, expected {}",
            vector.len(),
            space.dimensions
        ))
    }
}
