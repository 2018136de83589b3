//! MCP (Model Context Protocol) server
//!
//! Exposes one tool per enabled backend over JSON-RPC 2.0 on HTTP.
//!
//! 1. **Protocol Layer** (`protocol`): JSON-RPC 2.0 message types
//! 2. **Server Layer** (`server`): axum routes and tool dispatch
//! 3. **Transport Layer** (`transport`): Host/Origin allow-lists and CORS

pub mod protocol;

pub mod server;

pub mod transport;

pub use protocol::{
    Content, InitializeResult, McpError, McpMethod, McpRequest, McpResponse, ServerInfo, Tool,
    ToolCallParams, ToolResult,
};

pub use server::{router, serve, AppState};
pub use transport::TransportGuard;
