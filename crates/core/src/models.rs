use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub raw_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub filename: String,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorpusPosition {
    Begin,
    Middle,
    End,
    #[default]
    None,
}

impl CorpusPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusPosition::Begin => "begin",
            CorpusPosition::Middle => "middle",
            CorpusPosition::End => "end",
            CorpusPosition::None => "none",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "begin" => CorpusPosition::Begin,
            "middle" => CorpusPosition::Middle,
            "end" => CorpusPosition::End,
            _ => CorpusPosition::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub source_filename: String,
    pub source_page: u32,
    /// Position of the chunk in the ordered corpus; the insertion order used to break score ties.
    pub ordinal: u64,
    pub corpus_position: CorpusPosition,
}

impl Chunk {
    pub fn source(&self) -> SourceRef {
        SourceRef {
            filename: self.source_filename.clone(),
            page: self.source_page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub relevance_score: f32,
}

/// Identity of the embedding space a collection was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub dimensions: usize,
    /// `None` when the collection exists but holds no vectors yet.
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub filename: String,
    pub page: u32,
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (page {})", self.filename, self.page)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub cited_sources: Vec<SourceRef>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            cited_sources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, cited_sources: Vec<SourceRef>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            cited_sources,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutiveBrief {
    pub bullets: [String; 4],
    pub sampled_chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BriefStatus {
    Ready(ExecutiveBrief),
    Unavailable { reason: String },
}

impl BriefStatus {
    pub fn brief(&self) -> Option<&ExecutiveBrief> {
        match self {
            BriefStatus::Ready(brief) => Some(brief),
            BriefStatus::Unavailable { .. } => None,
        }
    }
}

/// The ordered chunk set of the active session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    chunks: Vec<Chunk>,
}

impl Corpus {
    pub fn from_chunks(mut chunks: Vec<Chunk>, edge_chunks: usize) -> Self {
        crate::chunking::tag_corpus_positions(&mut chunks, edge_chunks);
        Self { chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|chunk| chunk.chunk_id.clone()).collect()
    }

    pub fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for chunk in &self.chunks {
            if !names.contains(&chunk.source_filename) {
                names.push(chunk.source_filename.clone());
            }
        }
        names
    }

    /// Replaces every chunk of the documents present in `incoming` and re-tags the corpus.
    pub fn replace_documents(&self, incoming: Vec<Chunk>, edge_chunks: usize) -> Corpus {
        let replaced: Vec<&str> = incoming
            .iter()
            .map(|chunk| chunk.source_filename.as_str())
            .collect();

        let mut chunks: Vec<Chunk> = self
            .chunks
            .iter()
            .filter(|chunk| !replaced.contains(&chunk.source_filename.as_str()))
            .cloned()
            .collect();
        chunks.extend(incoming);
        Corpus::from_chunks(chunks, edge_chunks)
    }

    pub fn without(&self, chunk_ids: &[String], edge_chunks: usize) -> Corpus {
        let chunks = self
            .chunks
            .iter()
            .filter(|chunk| !chunk_ids.contains(&chunk.chunk_id))
            .cloned()
            .collect();
        Corpus::from_chunks(chunks, edge_chunks)
    }
}
