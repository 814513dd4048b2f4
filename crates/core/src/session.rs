//! The explicit session context.
//!
//! A [`RagSession`] owns the active corpus, the conversation history and the executive
//! brief, and keeps the store collection aligned with the corpus. Ingest, ask and reset
//! take the state lock for writing, so a reset never interleaves with an in-flight
//! query or indexing run.

use crate::chunking::chunk_document;
use crate::composer::AnswerComposer;
use crate::config::RagConfig;
use crate::embeddings::{Embedder, EmbeddingSpace};
use crate::extractor::PdfExtractor;
use crate::indexer::{IndexReport, Indexer};
use crate::ingest::{load_documents, FileFailure, UploadedFile};
use crate::retriever::Retriever;
use crate::summarizer::summarize;
use crate::traits::{LanguageModel, VectorStore};
use crate::{BriefStatus, Chunk, Corpus, ConversationTurn, CorpusPosition, RetrievalResult, SessionError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    /// Filenames whose text entered the corpus.
    pub loaded: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub index_report: IndexReport,
    pub brief: BriefStatus,
}

type Layout = (u64, CorpusPosition);

fn layout(chunk: &Chunk) -> Layout {
    (chunk.ordinal, chunk.corpus_position)
}

#[derive(Debug, Default)]
struct SessionState {
    corpus: Corpus,
    history: Vec<ConversationTurn>,
    brief: Option<BriefStatus>,
}

pub struct RagSession {
    extractor: Arc<dyn PdfExtractor>,
    model: Arc<dyn LanguageModel>,
    indexer: Indexer,
    retriever: Arc<Retriever>,
    composer: AnswerComposer,
    config: RagConfig,
    state: RwLock<SessionState>,
}

impl RagSession {
    /// Validates `config` and resumes whatever the collection already holds.
    pub async fn open(
        extractor: Arc<dyn PdfExtractor>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn VectorStore>,
        config: RagConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let collection = config.collection.clone();
        let indexer = Indexer::new(embedder.clone(), store.clone(), &collection, config.indexer);
        let retriever = Arc::new(Retriever::new(
            embedder.clone(),
            store.clone(),
            &collection,
            config.retriever,
        ));
        let composer = AnswerComposer::new(retriever.clone(), model.clone(), config.composer);

        let mut corpus = Corpus::default();
        if let Some(spec) = store.describe(&collection).await? {
            if let Err(error) = EmbeddingSpace::of(embedder.as_ref()).ensure_compatible(&collection, &spec) {
                warn!(error = %error, "collection was built with another embedding model; reset before ingesting");
            }
            corpus = Corpus::from_chunks(store.load_chunks(&collection).await?, config.edge_chunks);
            info!(collection = %collection, chunks = corpus.len(), "resumed indexed corpus");
        }

        Ok(Self {
            extractor,
            model,
            indexer,
            retriever,
            composer,
            config,
            state: RwLock::new(SessionState {
                corpus,
                ..SessionState::default()
            }),
        })
    }

    /// Loads, chunks and indexes `files`, then regenerates the executive brief.
    ///
    /// Only the uploaded documents are embedded. A re-uploaded filename replaces that
    /// document's chunks, and chunks of other documents whose ordinal or corpus
    /// position moved are rewritten in place. Unreadable files and chunks that could
    /// not be indexed are reported and left out of the corpus.
    pub async fn ingest(&self, files: Vec<UploadedFile>) -> Result<IngestionOutcome, SessionError> {
        let mut state = self.state.write().await;

        // nothing may be deleted from a collection this embedder cannot write to
        self.indexer.check_compatible().await?;

        let report = load_documents(self.extractor.as_ref(), &files);
        for failure in &report.failures {
            warn!(file = %failure.filename, reason = %failure.reason, "file skipped");
        }

        let mut incoming = Vec::new();
        for document in &report.documents {
            incoming.extend(chunk_document(document, self.config.chunking)?);
        }
        let loaded: Vec<String> = report
            .documents
            .iter()
            .map(|document| document.filename.clone())
            .collect();

        if incoming.is_empty() {
            return Ok(IngestionOutcome {
                loaded,
                failures: report.failures,
                index_report: IndexReport::default(),
                brief: BriefStatus::Unavailable {
                    reason: "No readable text found in the uploaded PDFs.".to_string(),
                },
            });
        }

        let edge = self.config.edge_chunks;
        let mut stored_layout: HashMap<String, Layout> = state
            .corpus
            .chunks()
            .iter()
            .map(|chunk| (chunk.chunk_id.clone(), layout(chunk)))
            .collect();

        let next = state.corpus.replace_documents(incoming, edge);
        let stale: Vec<String> = state
            .corpus
            .chunk_ids()
            .into_iter()
            .filter(|id| !next.chunks().iter().any(|chunk| &chunk.chunk_id == id))
            .collect();

        if !stale.is_empty() {
            self.indexer.remove(&stale).await?;
            state.corpus = state.corpus.without(&stale, edge);
        }

        let fresh: Vec<Chunk> = next
            .chunks()
            .iter()
            .filter(|chunk| loaded.contains(&chunk.source_filename))
            .cloned()
            .collect();
        let index_report = self.indexer.index(&fresh).await?;
        let failed = index_report.failed_ids();
        if !failed.is_empty() {
            // earlier versions of these chunks may still be stored
            if let Err(error) = self.indexer.remove(&failed).await {
                warn!(error = %error, "could not drop failed chunks from the store");
            }
        }
        for chunk in fresh.iter().filter(|chunk| !failed.contains(&chunk.chunk_id)) {
            stored_layout.insert(chunk.chunk_id.clone(), layout(chunk));
        }
        state.corpus = next.without(&failed, edge);

        let drifted: Vec<Chunk> = state
            .corpus
            .chunks()
            .iter()
            .filter(|chunk| stored_layout.get(&chunk.chunk_id) != Some(&layout(chunk)))
            .cloned()
            .collect();
        if let Err(error) = self.indexer.refresh(&drifted).await {
            warn!(error = %error, chunks = drifted.len(), "could not rewrite corpus positions in the store");
        }

        let brief = if state.corpus.is_empty() {
            BriefStatus::Unavailable {
                reason: "no chunk could be indexed".to_string(),
            }
        } else {
            summarize(self.model.as_ref(), &state.corpus, self.config.summary).await
        };
        state.brief = Some(brief.clone());

        info!(
            documents = loaded.len(),
            failed_files = report.failures.len(),
            embedded = index_report.succeeded,
            relaid = drifted.len(),
            chunks = state.corpus.len(),
            "ingestion finished"
        );
        Ok(IngestionOutcome {
            loaded,
            failures: report.failures,
            index_report,
            brief,
        })
    }

    /// Answers `question` against the corpus and records both turns in history.
    pub async fn ask(&self, question: &str) -> Result<ConversationTurn, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        let mut state = self.state.write().await;
        let turn = self.composer.answer(question, &state.history).await?;
        state.history.push(ConversationTurn::user(question));
        state.history.push(turn.clone());
        Ok(turn)
    }

    /// Top-k chunks for `query` without calling the language model.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalResult>, SessionError> {
        let _state = self.state.read().await;
        Ok(self.retriever.retrieve(query, self.retriever.top_k()).await?)
    }

    /// Drops the collection, then the corpus, history and brief. State is kept when
    /// the store refuses, so memory and store never disagree.
    pub async fn reset(&self) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        self.indexer.reset().await?;
        *state = SessionState::default();
        info!(collection = %self.config.collection, "session reset");
        Ok(())
    }

    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.state.read().await.history.clone()
    }

    pub async fn brief(&self) -> Option<BriefStatus> {
        self.state.read().await.brief.clone()
    }

    pub async fn corpus(&self) -> Corpus {
        self.state.read().await.corpus.clone()
    }
}
