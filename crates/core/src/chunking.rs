use crate::error::IngestError;
use crate::models::{Chunk, CorpusPosition, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Window length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows of the same page.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `text` into windows of `chunk_size` chars, each starting `chunk_size - chunk_overlap`
/// chars after the previous one. Only the last window may be shorter.
pub fn split_windows(text: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = start.saturating_add(config.step());
    }

    windows
}

pub fn make_chunk_id(filename: &str, page: u32, sequence: usize) -> String {
    format!("{filename}#p{page}#c{sequence}")
}

pub fn chunk_document(
    document: &Document,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let mut chunks = Vec::new();
    for page in &document.pages {
        for (sequence, text) in split_windows(&page.raw_text, config)
            .into_iter()
            .enumerate()
        {
            chunks.push(Chunk {
                chunk_id: make_chunk_id(&document.filename, page.page_number, sequence),
                text,
                source_filename: document.filename.clone(),
                source_page: page.page_number,
                ordinal: 0,
                corpus_position: CorpusPosition::None,
            });
        }
    }

    Ok(chunks)
}

/// Assigns ordinals and BEGIN/MIDDLE/END tags over the whole ordered corpus.
///
/// The first and last `min(edge_chunks, n / 3)` chunks (at least one each) are the
/// edges; everything between is MIDDLE. A single chunk is BEGIN.
pub fn tag_corpus_positions(chunks: &mut [Chunk], edge_chunks: usize) {
    let total = chunks.len();
    if total == 0 {
        return;
    }

    let span = edge_chunks.min(total / 3).max(1);
    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.ordinal = index as u64;
        chunk.corpus_position = if index < span {
            CorpusPosition::Begin
        } else if index >= total - span {
            CorpusPosition::End
        } else {
            CorpusPosition::Middle
        };
    }
}
