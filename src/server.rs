//! Server initialization for the stdio (MCP) and HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that wire up the
//! database, operation log and coordinator into a running server.

use anyhow::{Context, Result};
use rmcp::ServiceExt;
use std::sync::{Arc, Mutex};

use cairn::config::CairnConfig;
use cairn::db;
use cairn::graph::coordinator::Coordinator;
use cairn::graph::log::OperationLog;
use cairn::graph::saga;
use cairn::http;

use crate::tools::CairnTools;

/// Shared setup: open the database and the operation log, report leftovers
/// from an earlier crash, and build the coordinator.
pub fn open_coordinator(config: &CairnConfig) -> Result<Arc<Coordinator>> {
    let db_path = config.resolved_db_path();
    let policy = config.index.policy()?;
    let conn = db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    // Check for an index built under another endpoint policy
    if let Ok(Some(stored)) = db::migrations::get_index_endpoints(&conn) {
        if stored != policy.endpoints.as_str() {
            tracing::warn!(
                stored = %stored,
                configured = %policy.endpoints,
                "index endpoint policy changed, run `cairn repair` to rebuild the knowledge index"
            );
        }
    }
    if db::migrations::is_index_stale(&conn).unwrap_or(false) {
        tracing::warn!("knowledge index is flagged stale, run `cairn repair`");
    }
    match saga::pending(&conn) {
        Ok(pending) if !pending.is_empty() => tracing::warn!(
            count = pending.len(),
            "interrupted entity deletes found, run `cairn repair` to finish them"
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "could not read pending cascades"),
    }

    let log = OperationLog::open(&db_path)?;
    tracing::info!("operation log ready");

    Ok(Arc::new(Coordinator::new(
        Arc::new(Mutex::new(conn)),
        Arc::new(log),
        policy,
    )))
}

fn close_log(coordinator: &Coordinator) {
    if let Err(e) = coordinator.log().close() {
        tracing::warn!(error = %e, "failed to close operation log cleanly");
    }
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: CairnConfig) -> Result<()> {
    tracing::info!("starting cairn MCP server on stdio");

    let coordinator = open_coordinator(&config)?;

    let tools = CairnTools::new(Arc::clone(&coordinator));
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    close_log(&coordinator);
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the JSON HTTP API, with the MCP tools mounted at `/mcp` over
/// Streamable HTTP.
pub async fn serve_http(config: CairnConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting cairn HTTP server");

    let coordinator = open_coordinator(&config)?;

    let mcp_coordinator = Arc::clone(&coordinator);
    let mcp = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(CairnTools::new(Arc::clone(&mcp_coordinator))),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = http::router(Arc::clone(&coordinator)).nest_service("/mcp", mcp);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "listening on http://{bind_addr} (MCP at /mcp)");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    close_log(&coordinator);
    Ok(())
}
