//! MCP (Model Context Protocol) module
//!
//! JSON-RPC dispatch, the `send_gmail` tool, and the stdio, streamable HTTP
//! and legacy SSE transports.

pub mod http;
pub mod server;
pub mod sse;
pub mod tools;
pub mod types;
