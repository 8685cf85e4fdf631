//! docqa server - document QA service over HTTP
//!
//! Usage:
//!   docqa-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>      Path to a JSON/TOML configuration file
//!                        (default: environment variables only)
//!   --host <HOST>        Override the API server host
//!   --port <PORT>        Override the API server port

use std::path::PathBuf;
use std::sync::Arc;

use docqa::api::{start_server, AppState};
use docqa::chunker::Chunker;
use docqa::config::Settings;
use docqa::embedder::FastembedEmbedder;
use docqa::generator::OllamaGenerator;
use docqa::lexical::{LexicalIndex, TantivyLexicalIndex};
use docqa::pipeline::{IngestionPipeline, IngestionQueue, QueryPipeline};
use docqa::reranker::FastembedReranker;
use docqa::store::{BlobStore, FsBlobStore, MetadataStore, PgMetadataStore};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Default)]
struct ServerArgs {
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

fn parse_args() -> ServerArgs {
    let mut parsed = ServerArgs::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(path) = args.next() {
                    parsed.config_path = Some(PathBuf::from(path));
                }
            }
            "--host" => {
                if let Some(host) = args.next() {
                    parsed.host = Some(host);
                }
            }
            "--port" => {
                if let Some(port) = args.next() {
                    if let Ok(p) = port.parse() {
                        parsed.port = Some(p);
                    }
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    parsed
}

fn print_help() {
    println!("docqa server - document QA service over HTTP");
    println!();
    println!("Usage: docqa-server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <PATH>  Path to a JSON/TOML configuration file");
    println!("  --host <HOST>    Override the API server host");
    println!("  --port <PORT>    Override the API server port");
    println!("  --help, -h       Show this help");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let args = parse_args();

    let mut settings = match &args.config_path {
        Some(path) => Settings::from_file(path)?,
        None => Settings::from_env()?,
    };
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    info!("Starting docqa {}", docqa::VERSION);

    // Storage bootstrap: schema, lexical index, and bucket creation are all
    // idempotent
    let store = Arc::new(
        PgMetadataStore::connect(
            &settings.database.url,
            settings.database.max_connections,
            settings.embedding.dimension,
        )
        .await?,
    );
    store.ensure_schema().await?;

    let lexical = Arc::new(TantivyLexicalIndex::open(
        std::path::Path::new(&settings.lexical.dir),
        &settings.lexical.index_name,
    )?);
    lexical.ensure_index().await?;

    let blobs = Arc::new(FsBlobStore::new(&settings.blob.root_dir));
    blobs.ensure_bucket(&settings.blob.bucket).await?;

    let embedder = Arc::new(FastembedEmbedder::new(settings.embedding.clone()));
    let reranker = Arc::new(FastembedReranker::new(settings.reranker.clone()));
    let generator = Arc::new(OllamaGenerator::new(settings.generator.clone())?);

    let store: Arc<dyn MetadataStore> = store;
    let blobs: Arc<dyn BlobStore> = blobs;
    let lexical: Arc<dyn LexicalIndex> = lexical;

    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&store),
        Arc::clone(&blobs),
        Arc::clone(&lexical),
        embedder.clone(),
        Chunker::new(settings.chunking.clone()),
    ));
    let ingestion = Arc::new(IngestionQueue::start(pipeline, &settings.ingest));
    let query = Arc::new(QueryPipeline::new(
        Arc::clone(&store),
        Arc::clone(&lexical),
        embedder,
        reranker,
        generator,
        settings.retrieval.clone(),
        &settings.generator,
    ));

    let settings = Arc::new(settings);
    let state = AppState {
        store,
        blobs,
        ingestion,
        query,
        settings: Arc::clone(&settings),
    };

    start_server(state, &settings.server.host, settings.server.port).await?;
    Ok(())
}
