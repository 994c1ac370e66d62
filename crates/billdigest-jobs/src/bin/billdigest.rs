//! billdigest: command-line driver for the bill ingestion pipeline.
//!
//! Embeds bill PDFs, tracks embedding jobs, produces hierarchical summaries
//! and answers questions against embedded bills.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use billdigest_db::{log_pool_metrics, ChunkAssembler, Database, PoolConfig};
use billdigest_inference::OllamaBackend;
use billdigest_jobs::{
    BillPipeline, DocumentId, PdfPageReader, PdfSource, PipelineConfig, StartOutcome, Stores,
};

#[derive(Parser)]
#[command(name = "billdigest")]
#[command(author, version, about = "Embed, summarize and query legislative bill PDFs")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the page count and the first chunks of a PDF
    Pages {
        /// Path to the PDF
        pdf: PathBuf,

        /// Number of chunks to preview
        #[arg(short, long, default_value_t = 3)]
        preview: usize,
    },

    /// Embed a bill, then summarize it
    Embed {
        /// Document id, e.g. 119/hr/1
        doc: DocumentId,

        /// Local path or http(s) URL of the bill PDF
        source: String,

        /// Replace existing chunks
        #[arg(short, long)]
        force: bool,

        /// Start as a tracked background job and follow its events
        #[arg(short, long)]
        background: bool,

        /// Ceiling in seconds for a foreground run (default: PIPELINE_TIMEOUT_SECS)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show an embedding job's progress
    Status {
        job_id: Uuid,
    },

    /// Print the final summary of an embedded bill
    Summarize {
        doc: DocumentId,

        /// Regenerate even if a summary is stored
        #[arg(short, long)]
        force: bool,
    },

    /// Ask a question about an embedded bill
    Ask {
        doc: DocumentId,

        question: String,

        /// Chunks retrieved as context (default: RAG_TOP_K)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Apply database migrations
    Migrate,
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "billdigest=info,billdigest_jobs=info,billdigest_db=info,billdigest_inference=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("billdigest.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Logs go to stderr so command output stays pipeable.
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

async fn connect() -> anyhow::Result<Database> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("Failed to connect to database")?;
    log_pool_metrics(db.pool());
    Ok(db)
}

async fn pipeline(config: PipelineConfig) -> anyhow::Result<BillPipeline> {
    let db = connect().await?;
    let backend = Arc::new(OllamaBackend::from_env());
    info!(
        subsystem = "cli",
        ollama = backend.base_url(),
        "Inference backend configured"
    );
    Ok(BillPipeline::new(
        Stores::from_database(&db),
        backend.clone(),
        backend,
        config,
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn preview_pages(pdf: PathBuf, preview: usize, config: PipelineConfig) -> anyhow::Result<()> {
    let chunks = tokio::task::spawn_blocking(move || -> billdigest_jobs::Result<_> {
        let reader = PdfPageReader::open(&pdf)?;
        let total = reader.total_pages();
        let chunks: Vec<_> = ChunkAssembler::new(reader.into_pages(), config.chunker)?
            .take(preview)
            .collect();
        Ok((total, chunks))
    })
    .await??;

    let (total, chunks) = chunks;
    println!("Total pages: {}", total);
    for chunk in chunks {
        let head: String = chunk.text.chars().take(200).collect();
        println!(
            "\nChunk {} {} bucket {} ({} chars)\n{}...",
            chunk.chunk_index,
            chunk.citation(),
            chunk.bucket_id,
            chunk.text.len(),
            head
        );
    }
    Ok(())
}

async fn embed(
    pipeline: &BillPipeline,
    doc: DocumentId,
    source: PdfSource,
    force: bool,
    background: bool,
    timeout: Duration,
) -> anyhow::Result<()> {
    if !background {
        let job_id = pipeline
            .run_to_completion(&doc, &source, force, timeout)
            .await?;
        return print_json(&pipeline.job_status(job_id).await?);
    }

    let mut events = pipeline.events();
    match pipeline.start(doc, source, force).await? {
        StartOutcome::AlreadyRunning(job_id) => {
            println!("Job {} is already running for this bill", job_id);
            print_json(&pipeline.job_status(job_id).await?)
        }
        StartOutcome::Started { job_id, mut handle } => {
            println!("Started job {}", job_id);
            let result = loop {
                tokio::select! {
                    result = &mut handle => break result,
                    event = events.recv() => {
                        if let Ok(event) = event {
                            println!("{:?}", event);
                        }
                    }
                }
            };
            print_json(&pipeline.job_status(job_id).await?)?;
            result??;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _file_guard = init_logging();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command {
        Commands::Pages { pdf, preview } => preview_pages(pdf, preview, config).await?,
        Commands::Embed {
            doc,
            source,
            force,
            background,
            timeout,
        } => {
            let timeout = timeout.map(Duration::from_secs).unwrap_or(config.timeout);
            let pipeline = pipeline(config).await?;
            embed(
                &pipeline,
                doc,
                PdfSource::parse(&source),
                force,
                background,
                timeout,
            )
            .await?;
        }
        Commands::Status { job_id } => {
            let pipeline = pipeline(config).await?;
            print_json(&pipeline.job_status(job_id).await?)?;
        }
        Commands::Summarize { doc, force } => {
            let pipeline = pipeline(config).await?;
            let outcome = pipeline.summarizer().summarize_document(&doc, force).await?;
            print_json(&outcome)?;
        }
        Commands::Ask {
            doc,
            question,
            top_k,
        } => {
            let top_k = top_k.unwrap_or(config.rag_top_k);
            let pipeline = pipeline(config).await?;
            let answer = pipeline.rag().answer(&doc, &question, top_k).await?;
            println!("{}", answer);
        }
        Commands::Migrate => {
            let db = connect().await?;
            db.migrate().await.context("Failed to apply migrations")?;
            println!("Migrations applied");
        }
    }

    Ok(())
}
