//! Main entry point: wires the crawl pipeline and the HTTP surface.

mod app;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use docrag::{
    build_provider, build_reranker, Config, ContentExtractor, CrawlScheduler, Embedder,
    ExtractorConfig, FetcherConfig, IngestProcessor, PostgresStore, RetrievalEngine,
    SchedulerConfig, StealthFetcher,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::{build_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,docrag=debug,sqlx=warn,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting documentation knowledge engine");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Lazy pool: the first query establishes connections. The migration
    // right below doubles as the startup reachability check.
    let store = Arc::new(
        PostgresStore::connect(&config.database, config.embedding.dimension, config.vector_index)
            .context("Failed to build database pool")?,
    );
    store.migrate().await.context("Failed to run schema migration")?;
    store
        .assert_contextual_mode(config.processor.contextual_chunks)
        .await
        .context("Persisted chunk shape conflicts with USE_CONTEXTUAL_CHUNKS")?;
    tracing::info!("Database schema ready");

    let provider = build_provider(&config.embedding).context("Failed to build embedding provider")?;
    let embedder = Arc::new(Embedder::new(provider));
    let reranker = build_reranker(&config.reranker, embedder.clone());

    let retrieval = Arc::new(RetrievalEngine::new(
        store.clone(),
        embedder.clone(),
        reranker,
        config.search.clone(),
    ));

    let fetcher = Arc::new(StealthFetcher::new(FetcherConfig::from_crawler(&config.crawler)));
    let extractor = ContentExtractor::new(ExtractorConfig {
        content_selector: config.content_selector.clone(),
        ..ExtractorConfig::default()
    });
    let processor = Arc::new(IngestProcessor::new(
        fetcher,
        extractor,
        embedder,
        store.clone(),
        config.processor.clone(),
    ));

    let scheduler = Arc::new(CrawlScheduler::new(
        store.clone(),
        processor,
        SchedulerConfig::new(&config.crawler, &config.processor),
    ));
    scheduler
        .seed(&config.crawler.target_url)
        .await
        .context("Failed to seed the crawl frontier")?;

    let shutdown = CancellationToken::new();
    let crawl_task = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    let state = AppState {
        db_pool: store.pool().clone(),
        store: store.clone(),
        retrieval,
    };
    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Serving on {addr}");
    tracing::info!("Query tool:  POST http://localhost:{}/tools/perform_rag_query", config.port);
    tracing::info!("Health:      GET  http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    crawl_task.await.context("Crawl task panicked")?;
    tracing::info!("Shutdown complete");

    Ok(())
}
