//! Grounded answering: retrieve, prompt with tagged context, attach citations.
//!
//! Context passages are tagged `[S1]`, `[S2]`, … in the prompt and the model is asked to
//! cite those tags. The reply is parsed into [`Citations`]:
//!
//! - `Explicit`: at least one tag naming a passage that was in the prompt.
//! - `NotFound`: the model answered with [`NOT_IN_DOCUMENTS`] and cited nothing.
//! - `Unmarked`: no usable tag. Every passage given as context is cited instead, since
//!   citation precision depends on the model following the tag protocol.

use crate::retriever::Retriever;
use crate::retry::RetryPolicy;
use crate::traits::LanguageModel;
use crate::{ConversationTurn, RetrievalError, RetrievalResult, Role, SourceRef};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub const NOT_IN_DOCUMENTS: &str = "NOT_IN_DOCUMENTS";

pub const NOT_FOUND_ANSWER: &str = "The answer is not present in the uploaded documents.";

pub const NO_DOCUMENTS_ANSWER: &str =
    "I don't have any indexed documents yet. Please upload and process PDFs first.";

const SYSTEM_INSTRUCTION: &str = "You are a helpful RAG assistant. \
Use ONLY the context below to answer the question. Never use outside knowledge. \
Cite every passage you rely on with its tag, for example [S1]. \
If the answer is not in the context, reply exactly NOT_IN_DOCUMENTS.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposerConfig {
    pub top_k: usize,
    /// Most recent turns rendered into the prompt.
    pub history_window: usize,
    pub retry: RetryPolicy,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            history_window: 6,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Citations {
    /// Zero-based indexes into the context, in order of first mention.
    Explicit(Vec<usize>),
    NotFound,
    Unmarked,
}

/// `[S1]`, `[S2, S5]`, `[S3; S4]`.
fn tag_group() -> &'static Regex {
    static GROUP: OnceLock<Regex> = OnceLock::new();
    GROUP.get_or_init(|| {
        Regex::new(r"\[\s*S\d+(?:\s*[,;]\s*S\d+)*\s*\]").expect("tag group pattern is valid")
    })
}

fn tag_number() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| Regex::new(r"S(\d+)").expect("tag number pattern is valid"))
}

pub fn parse_citations(response: &str, context_len: usize) -> Citations {
    let mut cited = Vec::new();
    for bracket in tag_group().find_iter(response) {
        for capture in tag_number().captures_iter(bracket.as_str()) {
            let index = capture
                .get(1)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .filter(|number| (1..=context_len).contains(number))
                .map(|number| number - 1);
            if let Some(index) = index {
                if !cited.contains(&index) {
                    cited.push(index);
                }
            }
        }
    }

    if !cited.is_empty() {
        Citations::Explicit(cited)
    } else if response.contains(NOT_IN_DOCUMENTS) {
        Citations::NotFound
    } else {
        Citations::Unmarked
    }
}

/// Unique sources in citation order.
pub fn cited_sources(context: &[RetrievalResult], citations: &Citations) -> Vec<SourceRef> {
    let indexes: Vec<usize> = match citations {
        Citations::Explicit(indexes) => indexes.clone(),
        Citations::Unmarked => (0..context.len()).collect(),
        Citations::NotFound => Vec::new(),
    };

    let mut sources: Vec<SourceRef> = Vec::new();
    for index in indexes {
        if let Some(result) = context.get(index) {
            let source = result.chunk.source();
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
    }
    sources
}

pub fn build_prompt(
    question: &str,
    context: &[RetrievalResult],
    history: &[ConversationTurn],
    history_window: usize,
) -> String {
    let passages = context
        .iter()
        .enumerate()
        .map(|(index, result)| {
            format!(
                "[S{}] Source: {} (page {})\n{}",
                index + 1,
                result.chunk.source_filename,
                result.chunk.source_page,
                result.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut prompt = format!("{SYSTEM_INSTRUCTION}\n\nContext:\n{passages}\n\n");

    let recent = &history[history.len().saturating_sub(history_window)..];
    if !recent.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for turn in recent {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{speaker}: {}\n", turn.text));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("Question: {question}"));
    prompt
}

pub struct AnswerComposer {
    retriever: Arc<Retriever>,
    model: Arc<dyn LanguageModel>,
    config: ComposerConfig,
}

impl AnswerComposer {
    pub fn new(
        retriever: Arc<Retriever>,
        model: Arc<dyn LanguageModel>,
        config: ComposerConfig,
    ) -> Self {
        Self {
            retriever,
            model,
            config,
        }
    }

    /// Produces the assistant turn for `question`.
    ///
    /// Only consistency failures (a collection built with another embedding model) are
    /// errors; unreachable providers produce an explanatory turn without citations.
    pub async fn answer(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<ConversationTurn, RetrievalError> {
        let context = match self.retrieve(question).await {
            Ok(Some(context)) => context,
            Ok(None) => return Ok(ConversationTurn::assistant(NO_DOCUMENTS_ANSWER, Vec::new())),
            Err(error @ RetrievalError::EmbeddingMismatch { .. })
            | Err(error @ RetrievalError::DimensionMismatch { .. }) => return Err(error),
            Err(error) => {
                warn!(error = %error, "retrieval failed");
                return Ok(ConversationTurn::assistant(
                    format!("I couldn't search the documents right now ({error}). Please try again."),
                    Vec::new(),
                ));
            }
        };

        if context.is_empty() {
            return Ok(ConversationTurn::assistant(NOT_FOUND_ANSWER, Vec::new()));
        }

        let prompt = build_prompt(question, &context, history, self.config.history_window);
        let response = match self
            .config
            .retry
            .run("answer", || self.model.generate(&prompt, None))
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "language model unreachable");
                return Ok(ConversationTurn::assistant(
                    format!("I couldn't reach the language model ({error}). Please try again."),
                    Vec::new(),
                ));
            }
        };

        let citations = parse_citations(&response, context.len());
        debug!(?citations, context = context.len(), "answer parsed");
        match citations {
            Citations::NotFound => Ok(ConversationTurn::assistant(NOT_FOUND_ANSWER, Vec::new())),
            Citations::Unmarked => {
                warn!("answer carried no source tags, citing every context passage");
                let sources = cited_sources(&context, &citations);
                Ok(ConversationTurn::assistant(response.trim(), sources))
            }
            Citations::Explicit(_) => {
                let sources = cited_sources(&context, &citations);
                Ok(ConversationTurn::assistant(response.trim(), sources))
            }
        }
    }

    /// `None` when nothing has been indexed.
    async fn retrieve(&self, question: &str) -> Result<Option<Vec<RetrievalResult>>, RetrievalError> {
        if self.retriever.indexed_count().await? == 0 {
            return Ok(None);
        }
        let context = self.retriever.retrieve(question, self.config.top_k).await?;
        Ok(Some(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::indexer::{Indexer, IndexerConfig};
    use crate::retriever::RetrieverConfig;
    use crate::stores::InMemoryVectorStore;
    use crate::test_support::{chunk, fast_retry, ScriptedModel};
    use crate::Chunk;

    fn result(filename: &str, page: u32, sequence: usize) -> RetrievalResult {
        RetrievalResult {
            chunk: chunk(filename, page, sequence, "text"),
            relevance_score: 0.5,
        }
    }

    #[test]
    fn explicit_tags_are_resolved_in_order() {
        let citations = parse_citations("Costs fell [S3]; revenue rose [S1, S3].", 3);
        assert_eq!(citations, Citations::Explicit(vec![2, 0]));
    }

    #[test]
    fn out_of_range_tags_fall_back_to_unmarked() {
        assert_eq!(parse_citations("See [S9].", 2), Citations::Unmarked);
        assert_eq!(parse_citations("Plain answer.", 2), Citations::Unmarked);
    }

    #[test]
    fn sentinel_without_tags_is_not_found() {
        assert_eq!(parse_citations("NOT_IN_DOCUMENTS", 2), Citations::NotFound);
    }

    #[test]
    fn unmarked_answers_cite_every_context_passage_once() {
        let context = vec![result("a.pdf", 1, 0), result("a.pdf", 1, 1), result("b.pdf", 4, 0)];
        let sources = cited_sources(&context, &Citations::Unmarked);
        assert_eq!(
            sources,
            vec![
                SourceRef { filename: "a.pdf".to_string(), page: 1 },
                SourceRef { filename: "b.pdf".to_string(), page: 4 },
            ]
        );
    }

    #[test]
    fn prompt_bounds_history_and_tags_context() {
        let history: Vec<ConversationTurn> = (0..10)
            .map(|index| ConversationTurn::user(format!("earlier question {index}")))
            .collect();
        let prompt = build_prompt("What now?", &[result("a.pdf", 2, 0)], &history, 2);

        assert!(prompt.contains("[S1] Source: a.pdf (page 2)"));
        assert!(prompt.contains("earlier question 9"));
        assert!(prompt.contains("earlier question 8"));
        assert!(!prompt.contains("earlier question 7"));
        assert!(prompt.ends_with("Question: What now?"));
    }

    async fn composer(
        model: ScriptedModel,
        chunks: &[Chunk],
        floor: Option<f32>,
    ) -> Result<AnswerComposer, RetrievalError> {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(CharacterNgramEmbedder { dimensions: 1024 });
        if !chunks.is_empty() {
            let config = IndexerConfig {
                retry: fast_retry(),
                ..IndexerConfig::default()
            };
            Indexer::new(embedder.clone(), store.clone(), "docs", config)
                .index(chunks)
                .await?;
        }

        let retriever = Retriever::new(
            embedder,
            store,
            "docs",
            RetrieverConfig {
                top_k: 2,
                min_relevance: floor,
                retry: fast_retry(),
            },
        );
        Ok(AnswerComposer::new(
            Arc::new(retriever),
            Arc::new(model),
            ComposerConfig {
                top_k: 2,
                history_window: 4,
                retry: fast_retry(),
            },
        ))
    }

    fn pages() -> Vec<Chunk> {
        vec![
            chunk("annual.pdf", 1, 0, "The company was founded in 1998 and is headquartered in Oslo."),
            chunk("annual.pdf", 2, 1, "Revenue grew 40% in Q3, driven by subscription sales."),
        ]
    }

    #[tokio::test]
    async fn nothing_indexed_says_so() -> Result<(), RetrievalError> {
        let composer = composer(ScriptedModel::replying("should not be called"), &[], None).await?;
        let turn = composer.answer("anything?", &[]).await?;
        assert_eq!(turn.text, NO_DOCUMENTS_ANSWER);
        assert!(turn.cited_sources.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn no_relevant_chunks_is_not_found_without_calling_model() -> Result<(), RetrievalError> {
        let model = ScriptedModel::replying("made up");
        let composer = composer(model, &pages(), Some(0.99)).await?;
        let turn = composer.answer("zzzz qqqq xxxx", &[]).await?;

        assert_eq!(turn.text, NOT_FOUND_ANSWER);
        assert!(turn.cited_sources.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn model_sentinel_becomes_not_found() -> Result<(), RetrievalError> {
        let composer = composer(ScriptedModel::replying(NOT_IN_DOCUMENTS), &pages(), None).await?;
        let turn = composer.answer("Who is the CEO of the company?", &[]).await?;

        assert_eq!(turn.text, NOT_FOUND_ANSWER);
        assert!(turn.cited_sources.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_model_degrades_to_explanation() -> Result<(), RetrievalError> {
        let composer = composer(ScriptedModel::unreachable(), &pages(), None).await?;
        let turn = composer.answer("what happened to revenue in Q3", &[]).await?;

        assert!(turn.text.starts_with("I couldn't reach the language model"));
        assert!(turn.cited_sources.is_empty());
        assert_eq!(turn.role, Role::Assistant);
        Ok(())
    }

    #[tokio::test]
    async fn citations_only_name_context_passages() -> Result<(), RetrievalError> {
        let model = ScriptedModel::new(|prompt| {
            let tag = prompt
                .split("\n\n")
                .find(|block| block.contains("Revenue grew"))
                .and_then(|block| block.split(']').next())
                .map(|head| format!("{head}]"))
                .unwrap_or_default();
            Ok(format!("Revenue grew 40% in Q3 {tag}. Also see [S7]."))
        });
        let composer = composer(model, &pages(), None).await?;
        let turn = composer.answer("what happened to revenue in Q3", &[]).await?;

        assert_eq!(
            turn.cited_sources,
            vec![SourceRef { filename: "annual.pdf".to_string(), page: 2 }]
        );
        Ok(())
    }
}
