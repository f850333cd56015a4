//! Gmail MCP Server Library
//!
//! A Model Context Protocol (MCP) server exposing one tool, `send_gmail`,
//! which sends email with optional attachments through the Gmail API.

pub mod config;
pub mod error;
pub mod gmail;
pub mod mcp;

pub use config::Config;
pub use error::{GmailMcpError, Result};
