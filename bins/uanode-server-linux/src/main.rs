use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uanode_core::{MemoryNodeStore, NodeId, NodeStore, StoreError};
use uanode_protocol::{format_timestamp, EndpointDescription, ReferenceDescription};
use uanode_server::{build_sample_address_space, ServerConfig, UaServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,uanode_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("uanode server starting...");

    let config = load_config()?;
    let demo = config.demo.clone();
    let server = UaServer::start(config.clone(), move |store, timers| {
        build_sample_address_space(store, timers, &demo).map(|_| ())
    })
    .await
    .context("failed to start server")?;

    let http_handle = config.http_addr().map(|addr| {
        let state = AppState {
            store: server.store(),
            endpoints: server.endpoints().to_vec(),
        };
        tokio::spawn(async move {
            if let Err(e) = start_http_server(addr, state).await {
                tracing::error!("HTTP server error: {}", e);
            }
        })
    });

    tracing::info!("Server is now listening ... (press CTRL+C to stop)");
    tracing::info!("   WebSocket: {}", server.endpoint_url());
    if let Some(addr) = config.http_addr() {
        tracing::info!("   HTTP API:  http://{}/uanode/v1/api", addr);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C, shutting down...");

    server.stop().await;
    if let Some(handle) = http_handle {
        handle.abort();
    }

    tracing::info!("terminated");
    Ok(())
}

/// Config from the file named by the first argument or `UANODE_CONFIG`,
/// else defaults.
fn load_config() -> anyhow::Result<ServerConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("UANODE_CONFIG").ok());
    match path {
        Some(path) => {
            tracing::info!("loading config from {}", path);
            ServerConfig::from_json_file(&path).with_context(|| format!("loading {}", path))
        }
        None => Ok(ServerConfig::default()),
    }
}

#[derive(Clone)]
struct AppState {
    store: Arc<MemoryNodeStore>,
    endpoints: Vec<EndpointDescription>,
}

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

/// Start the read-only HTTP API server
async fn start_http_server(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/uanode", get(discovery_handler))
        .route("/uanode/v1/api/nodes/:node_id", get(read_handler))
        .route("/uanode/v1/api/browse/:node_id", get(browse_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Discovery endpoint handler
async fn discovery_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "endpoints": state.endpoints,
        "server": {
            "id": "uanode-server",
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

fn parse_node_id(text: &str) -> Result<NodeId, (StatusCode, Json<serde_json::Value>)> {
    text.parse().map_err(|e: uanode_core::NodeIdParseError| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": e.to_string() })),
        )
    })
}

fn store_error(e: StoreError) -> (StatusCode, Json<serde_json::Value>) {
    let http = match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    (
        http,
        Json(json!({ "statusCode": e.status_code(), "message": e.to_string() })),
    )
}

/// Current value of one variable
async fn read_handler(Path(node_id): Path<String>, State(state): State<AppState>) -> ApiResult {
    let node_id = parse_node_id(&node_id)?;
    let dv = state.store.read(&node_id).map_err(store_error)?;
    Ok(Json(json!({
        "nodeId": node_id,
        "value": dv.value,
        "statusCode": dv.status,
        "sourceTimestamp": format_timestamp(dv.source_timestamp),
    })))
}

/// Children of one node
async fn browse_handler(Path(node_id): Path<String>, State(state): State<AppState>) -> ApiResult {
    let node_id = parse_node_id(&node_id)?;
    let references: Vec<ReferenceDescription> = state
        .store
        .children(&node_id)
        .map_err(store_error)?
        .into_iter()
        .map(ReferenceDescription::from)
        .collect();
    Ok(Json(json!({ "nodeId": node_id, "references": references })))
}
