use crate::chunking::make_chunk_id;
use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::extractor::{PageText, PdfExtractor};
use crate::retry::RetryPolicy;
use crate::stores::InMemoryVectorStore;
use crate::traits::{LanguageModel, VectorStore};
use crate::{
    Chunk, CollectionSpec, ConversationTurn, CorpusPosition, EmbedError, IndexedVector,
    IngestError, LlmError, RetrievalResult, StoreError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        attempt_timeout: Duration::from_millis(50),
    }
}

pub fn chunk(filename: &str, page: u32, sequence: usize, text: &str) -> Chunk {
    Chunk {
        chunk_id: make_chunk_id(filename, page, sequence),
        text: text.to_string(),
        source_filename: filename.to_string(),
        source_page: page,
        ordinal: sequence as u64,
        corpus_position: CorpusPosition::None,
    }
}

#[derive(Default)]
pub struct FakeExtractor {
    documents: HashMap<String, Vec<String>>,
}

impl FakeExtractor {
    pub fn with_pages(mut self, filename: &str, pages: &[&str]) -> Self {
        self.documents.insert(
            filename.to_string(),
            pages.iter().map(|page| page.to_string()).collect(),
        );
        self
    }
}

impl PdfExtractor for FakeExtractor {
    fn extract_pages(&self, filename: &str, _bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let pages = self
            .documents
            .get(filename)
            .ok_or_else(|| IngestError::PdfParse(format!("{filename} is not a pdf")))?;

        Ok(pages
            .iter()
            .enumerate()
            .map(|(index, text)| PageText {
                number: index as u32 + 1,
                text: text.clone(),
            })
            .collect())
    }
}

/// Trigram embedder that can be told to fail, stall, or refuse specific texts.
pub struct FlakyEmbedder {
    inner: CharacterNgramEmbedder,
    failing_text: Option<String>,
    transient_failures: AtomicU32,
    delay: Option<Duration>,
    outage: AtomicBool,
}

impl FlakyEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: CharacterNgramEmbedder { dimensions },
            failing_text: None,
            transient_failures: AtomicU32::new(0),
            delay: None,
            outage: AtomicBool::new(false),
        }
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing_text = Some(text.to_string());
        self
    }

    pub fn transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// While set, every call fails as if the provider were down.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.outage.load(Ordering::SeqCst) {
            return Err(EmbedError::Provider {
                status: 503,
                details: "provider down".to_string(),
            });
        }

        let consumed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(EmbedError::Provider {
                status: 503,
                details: "try again".to_string(),
            });
        }

        if let Some(failing) = &self.failing_text {
            if let Some(text) = texts.iter().find(|text| text.contains(failing.as_str())) {
                return Err(EmbedError::TextTooLong {
                    model: self.model_id().to_string(),
                    chars: text.chars().count(),
                    limit: 0,
                });
            }
        }

        Ok(texts.iter().map(|text| self.inner.vectorize(text)).collect())
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_id(&self) -> &str {
        "flaky-test-model"
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.call(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::InvalidResponse("no vector".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.call(texts).await
    }
}

/// In-memory store that can refuse writes or hand back score ties in reverse order.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryVectorStore,
    failing_upserts: AtomicBool,
    reversed_ties: bool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reversing_ties(mut self) -> Self {
        self.reversed_ties = true;
        self
    }

    pub fn fail_upserts(&self, failing: bool) {
        self.failing_upserts.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorStore for FaultyStore {
    async fn ensure_collection(
        &self,
        collection: &str,
        spec: &CollectionSpec,
    ) -> Result<(), StoreError> {
        self.inner.ensure_collection(collection, spec).await
    }

    async fn describe(&self, collection: &str) -> Result<Option<CollectionSpec>, StoreError> {
        self.inner.describe(collection).await
    }

    async fn upsert(
        &self,
        collection: &str,
        spec: &CollectionSpec,
        vectors: &[IndexedVector],
    ) -> Result<(), StoreError> {
        if self.failing_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Request("disk full".to_string()));
        }
        self.inner.upsert(collection, spec, vectors).await
    }

    async fn update_chunks(&self, collection: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        self.inner.update_chunks(collection, chunks).await
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalResult>, StoreError> {
        let mut hits = self.inner.query(collection, embedding, usize::MAX).await?;
        if self.reversed_ties {
            hits.sort_by(|left, right| {
                right
                    .relevance_score
                    .total_cmp(&left.relevance_score)
                    .then(right.chunk.ordinal.cmp(&left.chunk.ordinal))
            });
        }
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.inner.count(collection).await
    }

    async fn load_chunks(&self, collection: &str) -> Result<Vec<Chunk>, StoreError> {
        self.inner.load_chunks(collection).await
    }

    async fn delete_points(
        &self,
        collection: &str,
        chunk_ids: &[String],
    ) -> Result<(), StoreError> {
        self.inner.delete_points(collection, chunk_ids).await
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.inner.delete_collection(collection).await
    }
}

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

/// Language model double answering through a closure and recording every prompt.
pub struct ScriptedModel {
    respond: Responder,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(respond: impl Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn unreachable() -> Self {
        Self::new(|_| {
            Err(LlmError::Provider {
                status: 503,
                details: "service unavailable".to_string(),
            })
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        _history: Option<&[ConversationTurn]>,
    ) -> Result<String, LlmError> {
        self.prompts
            .lock()
            .expect("prompt log poisoned")
            .push(prompt.to_string());
        (self.respond)(prompt)
    }
}
