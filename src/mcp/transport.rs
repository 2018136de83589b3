//! Transport security for the MCP endpoint
//!
//! DNS rebinding protection checks `Host` and `Origin` against allow-lists.
//! A pattern is either exact (`localhost:8080`), or ends in `:*` to accept
//! any port, and its host part may end in `*` (`*:*`, `http://*:*`).
//!
//! CORS is always on so browser-based clients can reach the endpoint.

use crate::config::TransportConfig;
use crate::mcp::protocol::{McpError, McpResponse};
use axum::{
    extract::{Request, State},
    http::{header, HeaderName, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

/// Host and Origin allow-lists
#[derive(Debug, Clone, Default)]
pub struct TransportGuard {
    enabled: bool,
    allowed_hosts: Vec<String>,
    allowed_origins: Vec<String>,
}

impl TransportGuard {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            enabled: config.dns_rebinding_protection,
            allowed_hosts: config.allowed_hosts.clone(),
            allowed_origins: config.allowed_origins.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn host_allowed(&self, host: Option<&str>) -> bool {
        match host {
            Some(host) => any_matches(&self.allowed_hosts, host),
            None => false,
        }
    }

    /// Requests without `Origin` come from non-browser clients
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            Some(origin) => any_matches(&self.allowed_origins, origin),
            None => true,
        }
    }
}

fn any_matches(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|pattern| pattern_matches(pattern, value))
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" || pattern == value {
        return true;
    }
    let Some(base) = pattern.strip_suffix(":*") else {
        return false;
    };
    let Some((host, port)) = value.rsplit_once(':') else {
        return false;
    };
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match base.strip_suffix('*') {
        Some(prefix) => host.starts_with(prefix),
        None => host == base,
    }
}

/// Reject requests whose `Host` or `Origin` is not allow-listed
pub async fn guard_transport(
    State(guard): State<Arc<TransportGuard>>,
    request: Request,
    next: Next,
) -> Response {
    if !guard.is_enabled() {
        return next.run(request).await;
    }

    let headers = request.headers();
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    if !guard.host_allowed(host) {
        warn!(
            host = host.unwrap_or("-"),
            "Rejected request with invalid Host header"
        );
        return reject(StatusCode::MISDIRECTED_REQUEST, "Invalid Host header");
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !guard.origin_allowed(origin) {
        warn!(
            origin = origin.unwrap_or("-"),
            "Rejected request with invalid Origin header"
        );
        return reject(StatusCode::FORBIDDEN, "Invalid Origin header");
    }

    next.run(request).await
}

fn reject(status: StatusCode, message: &str) -> Response {
    let body = McpResponse::err(Value::Null, McpError::invalid_request(message));
    (status, Json(body)).into_response()
}

/// Any origin may call; the session header is readable by scripts
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(super::server::SESSION_HEADER)])
}
