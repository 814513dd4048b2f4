use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_rag_core::{
    discover_pdf_files, probe_model, read_uploads, BriefStatus, CharacterNgramEmbedder,
    ChunkingConfig, ConversationTurn, Embedder, GeminiClient, InMemoryVectorStore,
    IngestionOutcome, LopdfExtractor, ModelCatalog, QdrantStore, RagConfig, RagSession,
    RetryPolicy, SessionError, VectorStore, DEFAULT_COLLECTION, DEFAULT_GEMINI_URL,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// text-embedding-004 accepts 2048 tokens; characters are a conservative proxy.
const MAX_EMBED_INPUT_CHARS: usize = 8_000;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbeddingProvider {
    Gemini,
    /// Local character trigrams, no network.
    Ngram,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreBackend {
    Qdrant,
    /// Process-local; gone when the command exits.
    Memory,
}

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Google Generative Language API key
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Generative Language API base URL
    #[arg(long, env = "RAG_GEMINI_URL", default_value = DEFAULT_GEMINI_URL)]
    gemini_url: String,

    /// Language models to try, most preferred first
    #[arg(
        long,
        env = "RAG_MODEL_CANDIDATES",
        value_delimiter = ',',
        default_value = "gemini-3-flash,gemini-2.5-flash,gemini-flash-latest"
    )]
    model_candidates: Vec<String>,

    #[arg(long, env = "RAG_EMBEDDING_PROVIDER", value_enum, default_value = "gemini")]
    embedding_provider: EmbeddingProvider,

    /// Embedding model, pinned to the collection on first write
    #[arg(long, env = "RAG_EMBEDDING_MODEL", default_value = "text-embedding-004")]
    embedding_model: String,

    #[arg(long, env = "RAG_EMBEDDING_DIMENSIONS", default_value = "768")]
    embedding_dimensions: usize,

    /// Qdrant base URL
    #[arg(long, env = "RAG_QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    #[arg(long, env = "RAG_COLLECTION", default_value = DEFAULT_COLLECTION)]
    collection: String,

    #[arg(long, env = "RAG_VECTOR_STORE", value_enum, default_value = "qdrant")]
    vector_store: StoreBackend,

    /// Characters per chunk
    #[arg(long, env = "RAG_CHUNK_SIZE", default_value = "1000")]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, env = "RAG_CHUNK_OVERLAP", default_value = "200")]
    chunk_overlap: usize,

    #[arg(long, env = "RAG_TOP_K", default_value = "4")]
    top_k: usize,

    /// Drop matches scoring below this cosine similarity
    #[arg(long, env = "RAG_MIN_RELEVANCE")]
    min_relevance: Option<f32>,

    /// Conversation turns included in each prompt
    #[arg(long, env = "RAG_HISTORY_WINDOW", default_value = "6")]
    history_window: usize,

    /// Chunks at each end of the corpus tagged as beginning and end
    #[arg(long, env = "RAG_EDGE_CHUNKS", default_value = "3")]
    edge_chunks: usize,

    /// Chunks sampled per corpus position for the executive brief
    #[arg(long, env = "RAG_SAMPLE_PER_GROUP", default_value = "2")]
    sample_per_group: usize,

    #[arg(long, env = "RAG_EMBED_BATCH", default_value = "16")]
    embed_batch: usize,

    /// Concurrent embedding requests
    #[arg(long, env = "RAG_EMBED_WORKERS", default_value = "4")]
    embed_workers: usize,

    /// Timeout for every provider and store call
    #[arg(long, env = "RAG_TIMEOUT_SECS", default_value = "30")]
    timeout_secs: u64,

    #[arg(long, env = "RAG_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Index PDFs and print the executive brief.
    Ingest {
        /// PDF file to ingest; repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        /// Folder searched recursively for PDFs.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Answer one question from the indexed documents.
    Ask {
        #[arg(long)]
        question: String,
    },
    /// Interactive conversation; /brief, /reset and /quit are understood.
    Chat {
        /// PDF file to ingest before chatting; repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Drop the collection, corpus and conversation.
    Reset,
    /// List usable language models and the one that would be selected.
    Models,
}

impl Cli {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: self.timeout(),
            ..RetryPolicy::default()
        }
    }

    fn ngram_embedder(&self) -> CharacterNgramEmbedder {
        CharacterNgramEmbedder {
            dimensions: self.embedding_dimensions,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn rag_config(&self) -> RagConfig {
        let mut config = RagConfig {
            collection: self.collection.clone(),
            chunking: ChunkingConfig {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            },
            edge_chunks: self.edge_chunks,
            ..RagConfig::default()
        }
        .with_retry(self.retry_policy())
        .with_top_k(self.top_k);

        config.indexer.batch_size = self.embed_batch;
        config.indexer.workers = self.embed_workers;
        config.retriever.min_relevance = self.min_relevance;
        config.summary.sample_per_group = self.sample_per_group;
        config.composer.history_window = self.history_window;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    let api_key = cli
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow!("GOOGLE_API_KEY is not set"))?;
    let client = GeminiClient::new(&cli.gemini_url, api_key, cli.timeout())
        .context("cannot configure the language model provider")?;

    if let Command::Models = cli.command {
        return list_models(&client, &cli).await;
    }

    let model_id = probe_model(&client, &cli.model_candidates, &cli.retry_policy())
        .await
        .context("startup aborted")?;
    println!("Using model: {model_id}");

    let embedder: Arc<dyn Embedder> = match cli.embedding_provider {
        EmbeddingProvider::Gemini => Arc::new(client.embedder(
            cli.embedding_model.clone(),
            cli.embedding_dimensions,
            MAX_EMBED_INPUT_CHARS,
        )),
        EmbeddingProvider::Ngram => Arc::new(cli.ngram_embedder()),
    };
    let store: Arc<dyn VectorStore> = match cli.vector_store {
        StoreBackend::Qdrant => Arc::new(
            QdrantStore::new(&cli.qdrant_url, cli.timeout()).context("invalid Qdrant URL")?,
        ),
        StoreBackend::Memory => Arc::new(InMemoryVectorStore::new()),
    };

    let session = RagSession::open(
        Arc::new(LopdfExtractor),
        embedder,
        Arc::new(client.with_model(&model_id)),
        store,
        cli.rag_config(),
    )
    .await
    .context("cannot open session")?;

    match cli.command {
        Command::Ingest { files, folder } => {
            let outcome = ingest(&session, files, folder).await?;
            print_outcome(&outcome);
        }
        Command::Ask { question } => {
            let turn = session.ask(&question).await?;
            print_turn(&turn);
        }
        Command::Chat { files, folder } => {
            if !files.is_empty() || folder.is_some() {
                let outcome = ingest(&session, files, folder).await?;
                print_outcome(&outcome);
            }
            chat(&session).await?;
        }
        Command::Reset => {
            session.reset().await?;
            println!("Collection, corpus and conversation cleared.");
        }
        Command::Models => {}
    }

    Ok(())
}

async fn list_models(client: &GeminiClient, cli: &Cli) -> anyhow::Result<()> {
    let available = client.list_available_models().await?;
    for model in &available {
        println!("{model}");
    }
    let selected = pdf_rag_core::select_model(&cli.model_candidates, &available)?;
    println!("selected: {selected}");
    Ok(())
}

async fn ingest(
    session: &RagSession,
    files: Vec<PathBuf>,
    folder: Option<PathBuf>,
) -> anyhow::Result<IngestionOutcome> {
    let mut paths = files;
    if let Some(folder) = folder {
        paths.extend(discover_pdf_files(&folder));
    }
    if paths.is_empty() {
        return Err(anyhow!("no PDF given; use --file or --folder"));
    }

    let (uploads, unreadable) = read_uploads(&paths);
    for failure in &unreadable {
        warn!(file = %failure.filename, reason = %failure.reason, "cannot read file");
    }

    let mut outcome = session.ingest(uploads).await?;
    let mut failures = unreadable;
    failures.append(&mut outcome.failures);
    outcome.failures = failures;
    Ok(outcome)
}

fn print_outcome(outcome: &IngestionOutcome) {
    for filename in &outcome.loaded {
        println!("loaded: {filename}");
    }
    for failure in &outcome.failures {
        println!("failed: {} ({})", failure.filename, failure.reason);
    }
    println!(
        "indexed {} chunks, {} failed",
        outcome.index_report.succeeded,
        outcome.index_report.failed.len()
    );
    print_brief(&outcome.brief);
}

fn print_brief(status: &BriefStatus) {
    match status {
        BriefStatus::Ready(brief) => {
            println!("Executive brief:");
            for bullet in &brief.bullets {
                println!("  - {bullet}");
            }
        }
        BriefStatus::Unavailable { reason } => println!("Executive brief unavailable: {reason}"),
    }
}

fn print_turn(turn: &ConversationTurn) {
    println!("{}", turn.text);
    if !turn.cited_sources.is_empty() {
        println!("Sources:");
        for source in &turn.cited_sources {
            println!("  - {source}");
        }
    }
}

async fn chat(session: &RagSession) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/brief" => match session.brief().await {
                Some(status) => print_brief(&status),
                None => println!("No executive brief yet."),
            },
            "/reset" => match session.reset().await {
                Ok(()) => println!("Collection, corpus and conversation cleared."),
                Err(error) => println!("Reset failed: {error}"),
            },
            question => match session.ask(question).await {
                Ok(turn) => print_turn(&turn),
                Err(SessionError::EmptyQuestion) => {}
                Err(error) => println!("error: {error}"),
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ngram_embedder_uses_configured_dimensions() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from([
            "pdf-rag",
            "--embedding-provider",
            "ngram",
            "--embedding-dimensions",
            "256",
            "reset",
        ])?;

        assert!(matches!(cli.embedding_provider, EmbeddingProvider::Ngram));
        assert_eq!(cli.ngram_embedder().dimensions(), 256);
        Ok(())
    }
}
