use crate::retry::RetryPolicy;
use crate::traits::LanguageModel;
use crate::{BriefStatus, Chunk, Corpus, CorpusPosition, ExecutiveBrief};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

pub const SUMMARY_PROMPT: &str = "Summarize this document thoroughly in 4 detailed bullet points. \
Focus on the most important ideas, results, or arguments.";

const FORMAT_RULE: &str = "Reply with exactly four bullet points, one per line, each starting \
with \"- \". Cover the whole material: its beginning, middle and end.";

pub const SEGMENT_SEPARATOR: &str = "\n---SEGMENT---\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryConfig {
    /// Chunks taken from each of the BEGIN, MIDDLE and END groups.
    pub sample_per_group: usize,
    pub retry: RetryPolicy,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            sample_per_group: 2,
            retry: RetryPolicy::default(),
        }
    }
}

fn group(chunks: &[Chunk], position: CorpusPosition) -> Vec<&Chunk> {
    chunks
        .iter()
        .filter(|chunk| chunk.corpus_position == position)
        .collect()
}

fn window<'a>(members: &[&'a Chunk], start: usize, count: usize) -> Vec<&'a Chunk> {
    members.iter().skip(start).take(count).copied().collect()
}

/// First chunks of BEGIN, the centred chunks of MIDDLE, last chunks of END, in that order.
pub fn sample_chunks(chunks: &[Chunk], per_group: usize) -> Vec<&Chunk> {
    let begin = group(chunks, CorpusPosition::Begin);
    let middle = group(chunks, CorpusPosition::Middle);
    let end = group(chunks, CorpusPosition::End);

    let mut sample = window(&begin, 0, per_group);
    sample.extend(window(
        &middle,
        middle.len().saturating_sub(per_group) / 2,
        per_group,
    ));
    sample.extend(window(&end, end.len().saturating_sub(per_group), per_group));
    sample
}

pub fn build_summary_prompt(sample: &[&Chunk]) -> String {
    let segments = sample
        .iter()
        .map(|chunk| {
            format!(
                "Source: {} (page {})\n{}",
                chunk.source_filename, chunk.source_page, chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(SEGMENT_SEPARATOR);

    format!("{SUMMARY_PROMPT}\n{FORMAT_RULE}\n\n{segments}")
}

fn bullet_line() -> &'static Regex {
    static BULLET: OnceLock<Regex> = OnceLock::new();
    BULLET.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*•‣▪]|\d+[.)])\s+(.*\S)\s*$").expect("bullet pattern is valid")
    })
}

/// Bullet-marked lines win; without any, plain non-empty lines are used. Fewer than four is a failure.
pub fn parse_bullets(response: &str) -> Option<[String; 4]> {
    let marked: Vec<String> = response
        .lines()
        .filter_map(|line| bullet_line().captures(line))
        .filter_map(|captures| captures.get(1).map(|m| m.as_str().to_string()))
        .collect();

    let lines = if marked.is_empty() {
        response
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        marked
    };

    let mut lines = lines.into_iter();
    Some([lines.next()?, lines.next()?, lines.next()?, lines.next()?])
}

pub async fn summarize(
    model: &dyn LanguageModel,
    corpus: &Corpus,
    config: SummaryConfig,
) -> BriefStatus {
    if corpus.is_empty() {
        return BriefStatus::Unavailable {
            reason: "No readable text found in the uploaded PDFs.".to_string(),
        };
    }

    let sample = sample_chunks(corpus.chunks(), config.sample_per_group.max(1));
    let prompt = build_summary_prompt(&sample);

    let response = match config
        .retry
        .run("summarize", || model.generate(&prompt, None))
        .await
    {
        Ok(response) => response,
        Err(error) => {
            warn!(error = %error, "executive brief unavailable");
            return BriefStatus::Unavailable {
                reason: format!("language model unavailable: {error}"),
            };
        }
    };

    match parse_bullets(&response) {
        Some(bullets) => {
            info!(sampled = sample.len(), "executive brief ready");
            BriefStatus::Ready(ExecutiveBrief {
                bullets,
                sampled_chunk_ids: sample.iter().map(|chunk| chunk.chunk_id.clone()).collect(),
            })
        }
        None => {
            warn!("model reply did not contain four bullet points");
            BriefStatus::Unavailable {
                reason: "the model did not return four bullet points".to_string(),
            }
        }
    }
}
