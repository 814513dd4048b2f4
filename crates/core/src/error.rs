use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf is encrypted: {0}")]
    Encrypted(String),

    #[error("pdf had no readable page text: {0}")]
    NoText(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("text too long for embedding model {model}: {chars} chars exceeds {limit}")]
    TextTooLong {
        model: String,
        chars: usize,
        limit: usize,
    },

    #[error("embedding provider error ({status}): {details}")]
    Provider { status: u16, details: String },

    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("credential rejected by provider: {0}")]
    Unauthorized(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("language model provider error ({status}): {details}")]
    Provider { status: u16, details: String },

    #[error("language model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid language model response: {0}")]
    InvalidResponse(String),

    #[error("invalid provider endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("store request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("vector store: {0}")]
    Store(#[from] StoreError),

    #[error("collection {collection} was indexed with embedding model {indexed}, refusing to query with {requested}")]
    EmbeddingMismatch {
        collection: String,
        indexed: String,
        requested: String,
    },

    #[error("collection {collection} stores {indexed}-dimensional vectors, embedder produces {requested}")]
    DimensionMismatch {
        collection: String,
        indexed: usize,
        requested: usize,
    },
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no usable language model; tried {tried:?}")]
    NoModelAvailable { tried: Vec<String> },

    #[error("could not list models: {0}")]
    Listing(#[from] LlmError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Classifies failures worth another attempt under [`crate::RetryPolicy`].
pub trait Retryable {
    fn is_retryable(&self) -> bool;
    fn timed_out(after: Duration) -> Self;
}

fn retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

impl Retryable for EmbedError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbedError::TextTooLong { .. } | EmbedError::InvalidResponse(_) => false,
            EmbedError::Provider { status, .. } => retryable_status(*status),
            EmbedError::Timeout(_) | EmbedError::Http(_) => true,
        }
    }

    fn timed_out(after: Duration) -> Self {
        EmbedError::Timeout(after)
    }
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::Unauthorized(_) | LlmError::InvalidResponse(_) | LlmError::Endpoint(_) => {
                false
            }
            LlmError::Provider { status, .. } => retryable_status(*status),
            LlmError::RateLimited | LlmError::Timeout(_) | LlmError::Http(_) => true,
        }
    }

    fn timed_out(after: Duration) -> Self {
        LlmError::Timeout(after)
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Http(_) | StoreError::Timeout(_))
    }

    fn timed_out(after: Duration) -> Self {
        StoreError::Timeout(after)
    }
}
