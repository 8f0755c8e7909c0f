//! `kbrag`: command-line launcher for kb-rag knowledge bases.
//!
//! Configuration comes from the environment (optionally a `.env` file);
//! see [`kb_rag::Settings`] for the variables.

mod chat;
mod documents;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kb_rag::{
    KnowledgeBase, RagService, RagServiceFactory, SearchResult, Settings, VectorStore, telemetry,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "kbrag")]
#[command(about = "Ingest, search and ask questions against a knowledge base", long_about = None)]
struct Cli {
    /// Knowledge base (collection) name
    #[arg(long, default_value = "knowledge_base", global = true)]
    kb: String,

    /// Vector store backend: sqlite | memory
    #[arg(long, default_value = "sqlite", global = true)]
    backend: String,

    /// Embedding model: a checkpoint under the model directory, `hashing[-N]`,
    /// or a remote model when KBRAG_USE_LOCAL_EMBEDDINGS is off
    #[arg(long, default_value = "all-MiniLM-L6-v2", global = true)]
    embed_model: String,

    /// Directory of local embedding checkpoints, overriding KBRAG_MODEL_DIR
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Device for local embeddings (cpu | cuda | metal | auto), overriding KBRAG_DEVICE
    #[arg(long, global = true)]
    device: Option<String>,

    /// Storage root, overriding KBRAG_DATA_DIR
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "warn,kb_rag=info", global = true)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest text files (one document per file) or JSON document arrays
    Ingest {
        /// Files to ingest; `.json` files hold `[{"id", "text", "metadata"}]`
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show the chunks closest to a query
    Search {
        query: String,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },
    /// Answer a question from the knowledge base
    Ask {
        question: String,
        #[command(flatten)]
        retrieval: RetrievalArgs,
        /// Print the chunks the answer was grounded on
        #[arg(long)]
        sources: bool,
    },
    /// Print the number of indexed chunks
    Count,
    /// List the collections of the backing store
    Collections,
    /// Interactive question loop
    Chat {
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },
}

#[derive(clap::Args, Clone, Copy)]
struct RetrievalArgs {
    /// Number of chunks to retrieve (default KBRAG_TOP_K)
    #[arg(short, long)]
    k: Option<usize>,
    /// Maximum accepted distance (default KBRAG_THRESHOLD)
    #[arg(short, long)]
    threshold: Option<f32>,
}

impl RetrievalArgs {
    fn resolve(self, kb: &KnowledgeBase) -> (usize, f32) {
        let defaults = kb.defaults();
        (self.k.unwrap_or(defaults.top_k), self.threshold.unwrap_or(defaults.distance_threshold))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log)?;

    let mut settings = Settings::from_env().context("failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    if let Some(dir) = cli.model_dir {
        settings.model_dir = dir;
    }
    if let Some(device) = cli.device {
        settings.device = device;
    }

    let factory = RagServiceFactory::new(settings);
    let kb = factory
        .create(&cli.kb, &cli.backend, &cli.embed_model)
        .await
        .with_context(|| format!("failed to open knowledge base '{}'", cli.kb))?;

    match cli.command {
        Commands::Ingest { paths } => {
            let docs = documents::load(&paths)?;
            info!(count = docs.len(), "loaded documents");
            let report = kb.ingest(&docs).await?;
            println!(
                "Ingested {} document(s) as {} chunk(s); {} record(s) in '{}'",
                report.documents,
                report.chunks,
                kb.count().await?,
                kb.name()
            );
        }
        Commands::Search { query, retrieval } => {
            let (k, threshold) = retrieval.resolve(&kb);
            let hits = kb.retrieve(&query, k, threshold).await?;
            print_hits(&hits);
        }
        Commands::Ask { question, retrieval, sources } => {
            let (k, threshold) = retrieval.resolve(&kb);
            let answer = kb.answer_with_sources(&question, k, threshold).await?;
            println!("{}", answer.text);
            if sources {
                println!();
                print_hits(&answer.sources);
            }
        }
        Commands::Count => {
            println!("{}", kb.count().await?);
        }
        Commands::Collections => {
            let store = kb.retriever().collection().store();
            for info in store.list_collections().await? {
                println!("{}\t{}\t{}\t{}", info.name, info.model, info.dimensions, info.metric);
            }
        }
        Commands::Chat { retrieval } => {
            let (k, threshold) = retrieval.resolve(&kb);
            chat::run(&kb, k, threshold).await?;
        }
    }

    Ok(())
}

fn print_hits(hits: &[SearchResult]) {
    if hits.is_empty() {
        println!("No chunk within the distance threshold.");
        return;
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", rank + 1, hit.distance, hit.chunk.id());
        println!("   {}", hit.chunk.text.replace('\n', " "));
    }
}
