// HTTP server for the MCP endpoint
//
// Routes:
// - POST /mcp      JSON-RPC 2.0 (one message per request)
// - GET  /health   liveness
// - GET  /metrics  Prometheus text format (when enabled)
//
// CORS applies to every route; Host/Origin checks guard /mcp only.

use crate::backends::{BackendKind, Gateways};
use crate::config::Config;
use crate::gateway::{PolicyMode, RequestMetadata};
use crate::mcp::protocol::{
    InitializeResult, McpError, McpMethod, McpRequest, McpResponse, ServerInfo, Tool,
    ToolCallParams, ToolResult, PROTOCOL_VERSION,
};
use crate::mcp::transport::{cors_layer, guard_transport, TransportGuard};
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, Instrument};

/// Header identifying the caller's MCP session
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shared state of the HTTP handlers
#[derive(Debug, Clone)]
pub struct AppState {
    gateways: Gateways,
    token: Option<String>,
    metrics_enabled: bool,
    transport: Arc<TransportGuard>,
}

impl AppState {
    pub fn new(gateways: Gateways, token: Option<String>, metrics_enabled: bool) -> Self {
        Self {
            gateways,
            token,
            metrics_enabled,
            transport: Arc::new(TransportGuard::default()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Gateways::from_config(config)?,
            config.security.token.clone(),
            config.metrics.enabled,
        )
        .with_transport(TransportGuard::from_config(&config.transport)))
    }

    pub fn with_transport(mut self, transport: TransportGuard) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// The tools of every enabled backend
    pub fn tools(&self) -> Vec<Tool> {
        self.gateways
            .kinds()
            .map(|kind| Tool::command(kind.tool_name(), kind.description()))
            .collect()
    }

    /// Usage notes for `initialize`, following each backend's policy mode
    pub fn instructions(&self) -> String {
        let mut text = String::from("Run administrative commands through the gateway tools.");
        for kind in self.gateways.kinds() {
            let Some(gateway) = self.gateways.get(kind) else {
                continue;
            };
            let access = match gateway.policy().mode() {
                PolicyMode::ReadOnly => "accepts read-only commands",
                PolicyMode::WriteAllowed => "accepts commands that may modify the deployment",
            };
            text.push_str(&format!(" {} {}.", kind.tool_name(), access));
        }
        text.push_str(" Credentials are supplied by the gateway.");
        text
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let guard = middleware::from_fn_with_state(state.transport.clone(), guard_transport);
    let mut app = Router::new()
        .route("/mcp", post(mcp_handler).route_layer(guard))
        .route("/health", get(health_handler));
    if state.metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }
    app.layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Start the MCP server and run until Ctrl-C
pub async fn serve(config: &Config) -> Result<()> {
    metrics::init().context("Failed to initialize metrics")?;
    let state = Arc::new(AppState::from_config(config)?);
    if state.gateways.is_empty() {
        anyhow::bail!("No backend is enabled");
    }
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.ip, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.ip, config.server.port
            )
        })?;

    info!(workers = config.server.workers, "Starting MCP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind MCP server")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("MCP server error")?;

    info!("MCP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}

/// JSON-RPC endpoint handler
async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            Json(McpResponse::err(Value::Null, McpError::invalid_request("Unauthorized"))),
        )
            .into_response();
    }

    let request: McpRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejected malformed JSON-RPC message: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(McpResponse::err(Value::Null, McpError::parse_error(e.to_string()))),
            )
                .into_response();
        }
    };

    if request.is_notification() {
        debug!(method = %request.method, "Notification received");
        return StatusCode::ACCEPTED.into_response();
    }
    let id = request.id.clone().unwrap_or_default();

    let response = match dispatch(&state, &headers, request).await {
        Ok(result) => McpResponse::ok(id, result),
        Err(error) => McpResponse::err(id, error),
    };
    Json(response).into_response()
}

/// Answer one JSON-RPC request
async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    request: McpRequest,
) -> Result<Value, McpError> {
    match McpMethod::from(request.method.as_str()) {
        McpMethod::Initialize => {
            let requested = request
                .params
                .as_ref()
                .and_then(|params| params.get("protocolVersion"))
                .and_then(Value::as_str)
                .unwrap_or(PROTOCOL_VERSION);
            to_value(InitializeResult {
                protocol_version: requested.to_string(),
                capabilities: json!({ "tools": { "listChanged": false } }),
                server_info: ServerInfo {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                instructions: Some(state.instructions()),
            })
        }
        McpMethod::Ping => Ok(json!({})),
        McpMethod::ToolsList => Ok(json!({ "tools": state.tools() })),
        McpMethod::ToolsCall => {
            let params: ToolCallParams = request
                .params
                .ok_or_else(|| McpError::invalid_params("Missing tool call parameters"))
                .and_then(|params| {
                    serde_json::from_value(params)
                        .map_err(|e| McpError::invalid_params(e.to_string()))
                })?;
            to_value(call_tool(state, headers, params).await?)
        }
        McpMethod::Initialized | McpMethod::Unknown(_) => {
            Err(McpError::method_not_found(request.method))
        }
    }
}

/// Run a gateway tool on behalf of the caller
async fn call_tool(
    state: &AppState,
    headers: &HeaderMap,
    params: ToolCallParams,
) -> Result<ToolResult, McpError> {
    let gateway = BackendKind::from_tool_name(&params.name)
        .and_then(|kind| state.gateways.get(kind))
        .ok_or_else(|| McpError::invalid_params(format!("Unknown tool: {}", params.name)))?;
    let command = params
        .command_str()
        .ok_or_else(|| McpError::invalid_params("Missing string argument 'command_str'"))?;

    let client_id = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    let span = info_span!(
        "tool_call",
        request_id = %uuid::Uuid::new_v4(),
        client_id = %client_id,
        tool = %params.name,
    );

    let metadata = request_metadata(headers);
    let result = async {
        debug!("Running {}", params.name);
        match gateway.run(command, &metadata).await {
            Ok(output) => ToolResult::text(output),
            Err(e) => {
                info!(kind = e.kind(), "Tool call failed");
                ToolResult::error(e.to_string())
            }
        }
    }
    .instrument(span)
    .await;
    Ok(result)
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::internal_error(e.to_string()))
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

/// Every readable header, for the credential resolver
fn request_metadata(headers: &HeaderMap) -> RequestMetadata {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
        .collect()
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
