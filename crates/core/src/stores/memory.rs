use crate::embeddings::cosine_similarity;
use crate::traits::VectorStore;
use crate::{Chunk, CollectionSpec, IndexedVector, RetrievalResult, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

struct MemoryCollection {
    spec: CollectionSpec,
    points: BTreeMap<String, IndexedVector>,
}

/// Process-local store with exact cosine search.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(
        &self,
        collection: &str,
        spec: &CollectionSpec,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection {
                spec: spec.clone(),
                points: BTreeMap::new(),
            });
        Ok(())
    }

    async fn describe(&self, collection: &str) -> Result<Option<CollectionSpec>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map(|entry| entry.spec.clone()))
    }

    async fn upsert(
        &self,
        collection: &str,
        spec: &CollectionSpec,
        vectors: &[IndexedVector],
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::Request(format!("collection {collection} does not exist")))?;

        if &entry.spec != spec {
            return Err(StoreError::Request(format!(
                "collection {collection} is pinned to {:?}, upsert used {:?}",
                entry.spec, spec
            )));
        }

        for vector in vectors {
            if vector.embedding.len() != entry.spec.dimensions {
                return Err(StoreError::Request(format!(
                    "embedding dimension {} != {}",
                    vector.embedding.len(),
                    entry.spec.dimensions
                )));
            }
        }

        for vector in vectors {
            entry.points.insert(vector.chunk_id.clone(), vector.clone());
        }
        Ok(())
    }

    async fn update_chunks(&self, collection: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if let Some(entry) = collections.get_mut(collection) {
            for chunk in chunks {
                if let Some(point) = entry.points.get_mut(&chunk.chunk_id) {
                    point.chunk = chunk.clone();
                }
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalResult>, StoreError> {
        let collections = self.collections.read().await;
        let Some(entry) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<RetrievalResult> = entry
            .points
            .values()
            .map(|point| RetrievalResult {
                chunk: point.chunk.clone(),
                relevance_score: cosine_similarity(&point.embedding, embedding),
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .relevance_score
                .total_cmp(&left.relevance_score)
                .then(left.chunk.ordinal.cmp(&right.chunk.ordinal))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|entry| entry.points.len())
            .unwrap_or(0))
    }

    async fn load_chunks(&self, collection: &str) -> Result<Vec<Chunk>, StoreError> {
        let collections = self.collections.read().await;
        let mut chunks: Vec<Chunk> = collections
            .get(collection)
            .map(|entry| entry.points.values().map(|point| point.chunk.clone()).collect())
            .unwrap_or_default();
        chunks.sort_by_key(|chunk| chunk.ordinal);
        Ok(chunks)
    }

    async fn delete_points(
        &self,
        collection: &str,
        chunk_ids: &[String],
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if let Some(entry) = collections.get_mut(collection) {
            for chunk_id in chunk_ids {
                entry.points.remove(chunk_id);
            }
        }
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.collections.write().await.remove(collection);
        Ok(())
    }
}
