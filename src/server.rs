//! MCP server initialization for stdio and streamable HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that wire up the
//! database, embedder, background refresh, and MCP tool handler into a running
//! server.

use crate::config::TesseraConfig;
use crate::db::{self, Store};
use crate::embedding::Embedder;
use crate::tools::{Background, TesseraTools};
use anyhow::{Context, Result};
use rmcp::ServiceExt;
use std::sync::Arc;

struct SharedState {
    store: Arc<Store>,
    embedder: Arc<Embedder>,
    config: Arc<TesseraConfig>,
    background: Arc<Background>,
}

impl SharedState {
    fn tools(&self) -> TesseraTools {
        TesseraTools::new(
            self.store.clone(),
            self.embedder.clone(),
            self.config.clone(),
            self.background.clone(),
        )
    }
}

/// Shared setup: open the store (one writer, a pool of readers), build the
/// embedder, probe the embedding service, start the background refresh queue.
async fn setup_shared_state(config: TesseraConfig) -> Result<SharedState> {
    let db_path = config.resolved_db_path();
    let store = Store::open(&db_path, config.storage.read_connections)?;
    tracing::info!(
        db = %db_path.display(),
        readers = store.reader_count(),
        "database ready"
    );

    let embedder = Arc::new(Embedder::from_config(&config.embedding)?);

    // The probe uses a blocking HTTP client, which must stay off the async threads.
    let probe = Arc::clone(&embedder);
    let ready = tokio::task::spawn_blocking(move || probe.refresh_readiness())
        .await
        .context("readiness probe task failed")?;
    if ready {
        tracing::info!(
            provider = %config.embedding.provider,
            model = %embedder.model_name(),
            dims = embedder.current_dimensions(),
            "embedding service ready"
        );
    } else {
        tracing::warn!(
            provider = %config.embedding.provider,
            fallback = true,
            dims = embedder.current_dimensions(),
            "embedding service unavailable, using hashing fallback until it responds"
        );
    }

    // Check for embedding model mismatch
    let stored = db::migrations::get_embedding_model(&store.read());
    if let Ok(Some(stored_model)) = stored {
        if ready && stored_model != embedder.model_name() && stored_model != "unknown" {
            tracing::warn!(
                stored = %stored_model,
                current = %embedder.model_name(),
                "embedding model changed; older vectors stay searchable only by same-width queries. Run `tessera reindex` to refresh them"
            );
        }
    }

    let store = Arc::new(store);
    let config = Arc::new(config);
    let background = Arc::new(Background::start(store.clone(), embedder.clone(), config.clone()));

    Ok(SharedState {
        store,
        embedder,
        config,
        background,
    })
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: TesseraConfig) -> Result<()> {
    tracing::info!("starting Tessera MCP server on stdio");

    let state = setup_shared_state(config).await?;
    let transport = rmcp::transport::stdio();

    let server = state.tools().serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP at `/mcp`.
pub async fn serve_http(config: TesseraConfig) -> Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;
    let bind_addr = format!("{host}:{port}");

    tracing::info!(addr = %bind_addr, "starting Tessera MCP server on HTTP");

    let state = Arc::new(setup_shared_state(config).await?);

    let factory_state = Arc::clone(&state);
    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(factory_state.tools()),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    Ok(())
}
