mod analyze;
mod benefits;
mod cache;
mod chunker;
mod config;
mod error;
mod index;
mod model;
mod related;
mod rerank;
mod server;
mod snapshot;
mod storage;
mod technique;
#[cfg(test)]
mod test_support;
mod text;
mod update;

use std::path::Path;
use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use analyze::Analyzer;
use benefits::{BenefitCache, BenefitFetcher, Benefits};
use cache::ChunkCache;
use config::Config;
use index::RetrievalIndex;
use mcp_common::http::{FetchClient, FetchClientConfig};
use server::WcagA11yServer;
use snapshot::{CommandSnapshotSource, SnapshotSource, UnavailableSnapshotSource};
use update::UpdateService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting wcag-a11y MCP server");

    let config = Config::from_env()?;
    info!(
        data_dir = %config.data_dir.display(),
        lancedb_path = %config.lancedb_path,
        versions = ?config.versions,
        redis = config.redis_url.is_some(),
        snapshots = config.snapshot_command.is_some(),
        "configuration loaded"
    );

    let redis_cache = mcp_common::redis::RedisCache::new(config.redis_url.as_deref());
    if redis_cache.is_available().await {
        info!("redis connected");
    } else {
        info!("redis unavailable, running without cache");
    }
    let cache = Arc::new(ChunkCache::new(redis_cache));

    info!("initializing embedding model (may download on first run)");
    let embedder = Arc::new(mcp_common::embedding::Embedder::new().await?);
    info!("embedding model ready");

    info!("initializing reranker model (may download on first run)");
    let scorer = Arc::new(mcp_common::rerank::CrossEncoder::new().await?);
    info!("reranker model ready");

    let vectordb = Arc::new(mcp_common::vectordb::VectorDb::connect(&config.lancedb_path).await?);
    info!("lancedb connected");

    let index = Arc::new(
        RetrievalIndex::open(
            vectordb,
            embedder,
            Path::new(&config.lancedb_path),
            config.model_timeout,
        )
        .await?,
    );

    let update_service = Arc::new(UpdateService::new(
        config.clone(),
        Arc::clone(&index),
        Arc::clone(&cache),
    ));
    let loaded = update_service.update_all().await;
    info!(versions = loaded.len(), "corpora ready");

    let snapshots: Arc<dyn SnapshotSource> = match &config.snapshot_command {
        Some(command) => Arc::new(CommandSnapshotSource::new(
            command,
            config.snapshot_timeout,
            config.snapshot_retries,
        )?),
        None => {
            info!("WCAG_SNAPSHOT_COMMAND not set, accessibility snapshots disabled");
            Arc::new(UnavailableSnapshotSource)
        }
    };

    let analyzer = Arc::new(Analyzer::new(
        snapshots,
        index,
        rerank::Reranker::new(scorer, config.model_timeout),
        config.top_k,
    ));

    let fetcher = BenefitFetcher::new(
        FetchClient::new(FetchClientConfig::default())?,
        config.understanding_base_url.clone(),
    );
    let benefits = Arc::new(Benefits::new(
        BenefitCache::new(config.benefits_cache_path.clone()),
        Arc::new(fetcher),
    ));

    let server = WcagA11yServer::new(
        loaded,
        analyzer,
        update_service,
        cache,
        benefits,
        Arc::new(config),
    );

    if let Ok(addr) = std::env::var("MCP_TCP_LISTEN_ADDR") {
        let listener = TcpListener::bind(&addr).await?;
        info!(listen_addr = %addr, "MCP server ready, serving on TCP");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = server.clone();
            tokio::spawn(async move {
                tracing::info!(peer = %peer, "MCP client connected");
                let service = server.serve(stream).await.inspect_err(|e| {
                    tracing::error!(error = %e, "MCP server error");
                })?;
                service.waiting().await?;
                tracing::info!(peer = %peer, "MCP client disconnected");
                Ok::<(), anyhow::Error>(())
            });
        }
    } else {
        info!("MCP server ready, serving on stdio");
        let service = server.serve(stdio()).await.inspect_err(|e| {
            tracing::error!(error = %e, "MCP server error");
        })?;
        service.waiting().await?;
        info!("MCP server shut down");
    }
    Ok(())
}
