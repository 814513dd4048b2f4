use crate::error::{EmbedError, RetrievalError};
use crate::models::CollectionSpec;
use async_trait::async_trait;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identity of the embedding model; pinned to every collection it writes.
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// The (model, dimensions) pair a collection must share with the embedder that queries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSpace {
    pub model_id: String,
    pub dimensions: usize,
}

impl EmbeddingSpace {
    pub fn of(embedder: &dyn Embedder) -> Self {
        Self {
            model_id: embedder.model_id().to_string(),
            dimensions: embedder.dimensions(),
        }
    }

    pub fn collection_spec(&self) -> CollectionSpec {
        CollectionSpec {
            dimensions: self.dimensions,
            embedding_model: Some(self.model_id.clone()),
        }
    }

    pub fn ensure_compatible(
        &self,
        collection: &str,
        spec: &CollectionSpec,
    ) -> Result<(), RetrievalError> {
        if spec.dimensions != self.dimensions {
            return Err(RetrievalError::DimensionMismatch {
                collection: collection.to_string(),
                indexed: spec.dimensions,
                requested: self.dimensions,
            });
        }

        match &spec.embedding_model {
            Some(indexed) if indexed != &self.model_id => Err(RetrievalError::EmbeddingMismatch {
                collection: collection.to_string(),
                indexed: indexed.clone(),
                requested: self.model_id.clone(),
            }),
            _ => Ok(()),
        }
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

/// Offline embedder hashing character trigrams into a fixed number of buckets.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        "char-trigram-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.vectorize(text))
    }
}
