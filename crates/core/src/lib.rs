pub mod chunking;
pub mod composer;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod ingest;
pub mod model_select;
pub mod models;
pub mod providers;
pub mod retriever;
pub mod retry;
pub mod session;
pub mod stores;
pub mod summarizer;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use chunking::{chunk_document, normalize_whitespace, tag_corpus_positions, ChunkingConfig};
pub use composer::{AnswerComposer, Citations, ComposerConfig, NOT_FOUND_ANSWER, NO_DOCUMENTS_ANSWER};
pub use config::{RagConfig, DEFAULT_COLLECTION};
pub use embeddings::{CharacterNgramEmbedder, Embedder, EmbeddingSpace, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    EmbedError, IngestError, LlmError, RetrievalError, Retryable, SelectError, SessionError,
    StoreError,
};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use indexer::{FailedChunk, IndexReport, Indexer, IndexerConfig};
pub use ingest::{
    discover_pdf_files, load_documents, read_uploads, FileFailure, LoadReport, UploadedFile,
};
pub use model_select::{probe_model, select_model, DEFAULT_MODEL_CANDIDATES};
pub use models::{
    BriefStatus, Chunk, CollectionSpec, ConversationTurn, Corpus, CorpusPosition, Document,
    ExecutiveBrief, IndexedVector, Page, RetrievalResult, Role, SourceRef,
};
pub use providers::{GeminiClient, GeminiEmbedder, DEFAULT_GEMINI_URL};
pub use retriever::{Retriever, RetrieverConfig};
pub use retry::RetryPolicy;
pub use session::{IngestionOutcome, RagSession};
pub use stores::{InMemoryVectorStore, QdrantStore};
pub use summarizer::SummaryConfig;
pub use traits::{LanguageModel, ModelCatalog, VectorStore};
