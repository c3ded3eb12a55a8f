use std::sync::Arc;

use axum::{routing::get, Json, Router};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};

use weaviate_mcp_server::auth::headers::PublishedHeaders;
use weaviate_mcp_server::auth::refresher;
use weaviate_mcp_server::config::Config;
use weaviate_mcp_server::server::GatewayServer;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "weaviate-mcp-server"}))
}

fn mount_path(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        "/mcp".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env()?);
    log::info!(
        "weaviate MCP gateway starting for {}",
        config.weaviate_base_url()
    );

    let published = PublishedHeaders::default();
    let refresher_state = refresher::start(&config.vertex, published.clone());

    let server = GatewayServer::new(config.clone(), published, refresher_state);
    let tool_names = server.tool_names();
    log::info!("registered tools: {}", tool_names.join(", "));

    let ct = tokio_util::sync::CancellationToken::new();
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig {
            cancellation_token: ct.child_token(),
            ..Default::default()
        },
    );

    let path = mount_path(&config.mcp_path);
    let router = Router::new()
        .route("/health", get(health))
        .route(
            "/tools",
            get(move || {
                let names = tool_names.clone();
                async move { Json(serde_json::json!(names)) }
            }),
        )
        .nest_service(&path, service);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("MCP endpoint at http://{}{}", addr, path);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutdown signal received");
            ct.cancel();
        })
        .await?;

    Ok(())
}
