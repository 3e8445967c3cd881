//! Gasoline Tools - MCP tool surface
//!
//! The agent-facing half of the bridge:
//! - Protocol / Dispatcher: JSON-RPC 2.0 wire types and method routing
//! - Handler: the five tools (`observe`, `analyze`, `generate`,
//!   `configure`, `interact`) over the core stores
//! - Commands: correlation ids, pilot gate and the sync/async wait
//! - Stdio: line and `Content-Length` framed transport

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod dispatcher;
pub mod handler;
pub mod protocol;
pub mod resources;
pub mod response;
pub mod schema;
pub mod stdio;

mod analyze;
mod configure;
mod generate;
mod interact;
mod observe;

pub use commands::{new_correlation_id, wants_sync};
pub use dispatcher::McpHandler;
pub use handler::{ToolConfig, ToolHandler};
pub use protocol::{ContentBlock, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpToolDef, ToolResult};
pub use response::{ErrorCode, ToolError, ToolOutcome};
pub use schema::{tool_definitions, TOOL_NAMES};
pub use stdio::{serve_stdio, STDIO_CLIENT_ID};
