use crate::{
    Chunk, CollectionSpec, ConversationTurn, IndexedVector, LlmError, RetrievalResult, StoreError,
};
use async_trait::async_trait;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates the collection if missing. Never alters an existing one.
    async fn ensure_collection(
        &self,
        collection: &str,
        spec: &CollectionSpec,
    ) -> Result<(), StoreError>;

    /// `None` when the collection does not exist.
    async fn describe(&self, collection: &str) -> Result<Option<CollectionSpec>, StoreError>;

    /// Insert-or-replace keyed by `chunk_id`.
    async fn upsert(
        &self,
        collection: &str,
        spec: &CollectionSpec,
        vectors: &[IndexedVector],
    ) -> Result<(), StoreError>;

    /// Rewrites the stored payload of chunks that already exist; unknown ids are skipped.
    async fn update_chunks(&self, collection: &str, chunks: &[Chunk]) -> Result<(), StoreError>;

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalResult>, StoreError>;

    async fn count(&self, collection: &str) -> Result<usize, StoreError>;

    /// Every stored chunk, in ordinal order.
    async fn load_chunks(&self, collection: &str) -> Result<Vec<Chunk>, StoreError>;

    async fn delete_points(&self, collection: &str, chunk_ids: &[String])
        -> Result<(), StoreError>;

    /// Dropping a collection that does not exist succeeds.
    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        history: Option<&[ConversationTurn]>,
    ) -> Result<String, LlmError>;
}

#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Identifiers of the models that can currently serve `generate`.
    async fn list_available_models(&self) -> Result<Vec<String>, LlmError>;
}
