//! rxsearch CLI: serve the search API, run catalog ingestion, or create the
//! vector index schema.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use rxsearch::api::{ApiContext, ApiServer};
use rxsearch::catalog::CatalogStore;
use rxsearch::config::AppConfig;
use rxsearch::embedding::{CachedEmbedder, Embedder, EmbeddingCache, HttpEmbeddingClient};
use rxsearch::indication::IndicationStore;
use rxsearch::ingest::{IngestParams, IngestPipeline};
use rxsearch::llm::HttpChatModel;
use rxsearch::search::SearchOrchestrator;
use rxsearch::vector::{IndexSchema, SqliteVectorStore, VectorStore};

/// Catalog pool bounds; the gateway is read-only and lightly loaded.
const CATALOG_POOL_SIZE: u32 = 5;
const CATALOG_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "rxsearch", version, about = "Hybrid semantic+filter drug search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP search service.
    Serve {
        /// Bind address, overriding BIND_ADDR.
        #[arg(long)]
        addr: Option<String>,
    },
    /// Run the resumable catalog ingestion pipeline.
    Ingest {
        /// Row offset to resume from.
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Rows per batch, overriding INGEST_BATCH_SIZE.
        #[arg(long)]
        batch_size: Option<usize>,
        /// Maximum rows to process this invocation (0 = all).
        #[arg(long, default_value_t = 0)]
        max_rows: u64,
        /// Wall-clock budget in seconds; stops early leaving a resume offset.
        #[arg(long)]
        budget_secs: Option<u64>,
        /// Checkpoint file updated after every batch.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
    /// Create the vector index schema (idempotent).
    InitIndex,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    rxsearch::init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();

    ensure_parent_dir(&config.vector_db_path)?;
    ensure_parent_dir(&config.cache_db_path)?;

    match cli.command {
        Command::InitIndex => {
            let store = SqliteVectorStore::new(&config.vector_db_path);
            store.create_index(&IndexSchema::default()).await?;
            tracing::info!(path = %config.vector_db_path, "vector index ready");
        }
        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.bind_addr.clone());
            let ctx = build_api_context(&config).await?;
            let server = ApiServer::start(ctx, &addr).await?;
            server.wait_for_ctrl_c().await?;
        }
        Command::Ingest {
            offset,
            batch_size,
            max_rows,
            budget_secs,
            checkpoint,
        } => {
            if let Some(batch_size) = batch_size {
                config.ingest.batch_size = batch_size;
            }
            let pipeline = build_ingest_pipeline(&config).await?;
            let params = IngestParams {
                offset,
                max_rows,
                deadline: budget_secs.map(|s| Instant::now() + Duration::from_secs(s)),
                checkpoint_path: checkpoint,
            };
            let report = pipeline.run(&params).await?;
            tracing::info!(
                batches = report.batches,
                ok = report.ok,
                failed = report.failed,
                next_offset = report.next_offset,
                completed = report.completed,
                dead_letter = report.dead_letter.len(),
                "ingestion finished"
            );
        }
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

async fn build_api_context(config: &AppConfig) -> Result<ApiContext, Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteVectorStore::new(&config.vector_db_path));
    store.create_index(&IndexSchema::default()).await?;

    let catalog = CatalogStore::connect(
        &config.catalog_db_path,
        CATALOG_POOL_SIZE,
        CATALOG_IDLE_TIMEOUT,
    )
    .await?;
    let indications = IndicationStore::open(Path::new(&config.vector_db_path))?;

    let http_embedder = HttpEmbeddingClient::new(
        &config.embedding_url,
        &config.embedding_model,
        config.timeouts.embedding,
    );
    // The query path consults the cache only when configured to.
    let embedder: Arc<dyn Embedder> = if config.query_embed_cache {
        let cache = EmbeddingCache::open(Path::new(&config.cache_db_path))?;
        Arc::new(CachedEmbedder::new(http_embedder, cache))
    } else {
        Arc::new(http_embedder)
    };

    let chat = HttpChatModel::new(
        &config.llm_url,
        &config.llm_model,
        &config.llm_api_key,
        config.timeouts.llm,
    );

    let orchestrator = Arc::new(SearchOrchestrator::new(
        Box::new(chat),
        embedder,
        store.clone(),
        catalog,
        indications.clone(),
        config.tuning.clone(),
        config.timeouts.clone(),
    ));

    Ok(ApiContext {
        orchestrator,
        store,
        indications,
        request_timeout: config.timeouts.request,
    })
}

async fn build_ingest_pipeline(
    config: &AppConfig,
) -> Result<IngestPipeline, Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteVectorStore::new(&config.vector_db_path));
    store.create_index(&IndexSchema::default()).await?;

    let catalog = CatalogStore::connect(
        &config.catalog_db_path,
        CATALOG_POOL_SIZE,
        CATALOG_IDLE_TIMEOUT,
    )
    .await?;
    let indications = IndicationStore::open(Path::new(&config.vector_db_path))?;

    // The cache is mandatory on the ingest path: re-ingests must not re-pay
    // for embeddings, and determinism makes resume equivalent to one run.
    let cache = EmbeddingCache::open(Path::new(&config.cache_db_path))?;
    let embedder = Arc::new(CachedEmbedder::new(
        HttpEmbeddingClient::new(
            &config.embedding_url,
            &config.embedding_model,
            config.timeouts.embedding,
        ),
        cache,
    ));

    Ok(IngestPipeline::new(
        catalog,
        embedder,
        store,
        indications,
        config.ingest.clone(),
    ))
}
