//! Configuration management for the Gmail MCP Server
//!
//! Handles paths, environment variables, and configuration loading.

use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Configuration for the Gmail MCP Server
#[derive(Debug, Clone)]
pub struct Config {
    /// Authorized-user token file (access/refresh tokens)
    pub token_path: PathBuf,

    /// OAuth client secrets file downloaded from Google Cloud
    pub credentials_path: PathBuf,

    /// Directory that relative attachment paths resolve against and that
    /// every attachment read must stay inside
    pub attachments_base_dir: PathBuf,

    /// Attachment size limit in megabytes
    pub max_attachment_mb: u64,

    /// OAuth callback port for the `auth` command, 0 lets the OS pick one
    pub oauth_callback_port: u16,

    /// Gmail REST API base URL
    pub api_base_url: String,

    /// Gmail API scopes
    pub scopes: Vec<String>,
}

impl Config {
    /// Create a configuration from the process environment
    pub fn new() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token_path = lookup("GMAIL_TOKEN_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(defaults::TOKEN_FILE));

        let credentials_path = lookup("GMAIL_CREDENTIALS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(defaults::CREDENTIALS_FILE));

        let attachments_base_dir = lookup("ATTACHMENTS_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(defaults::ATTACHMENTS_BASE_DIR));

        let max_attachment_mb = parse_var(&lookup, "MAX_ATTACHMENT_MB")?
            .unwrap_or(defaults::MAX_ATTACHMENT_MB);
        if max_attachment_mb > defaults::MAX_ATTACHMENT_MB_LIMIT {
            return Err(ConfigError::InvalidValue {
                var: "MAX_ATTACHMENT_MB".to_string(),
                value: max_attachment_mb.to_string(),
            }
            .into());
        }

        let oauth_callback_port = parse_var(&lookup, "GMAIL_OAUTH_PORT")?.unwrap_or(0);

        let api_base_url = lookup("GMAIL_API_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| gmail::API_BASE_URL.to_string());

        Ok(Self {
            token_path,
            credentials_path,
            attachments_base_dir,
            max_attachment_mb,
            oauth_callback_port,
            api_base_url,
            scopes: vec![gmail::SEND_SCOPE.to_string()],
        })
    }

    /// Attachment size limit in bytes
    pub fn max_attachment_bytes(&self) -> u64 {
        self.max_attachment_mb.saturating_mul(1024 * 1024)
    }

    /// Check if the OAuth client secrets file exists
    pub fn credentials_exist(&self) -> bool {
        self.credentials_path.exists()
    }

    /// Check if a token file exists
    pub fn token_exists(&self) -> bool {
        self.token_path.exists()
    }
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }
            .into()
        }),
    }
}

/// Defaults used when the environment does not override them
pub mod defaults {
    pub const TOKEN_FILE: &str = "token.json";
    pub const CREDENTIALS_FILE: &str = "credentials.json";
    pub const ATTACHMENTS_BASE_DIR: &str = "/shared";
    pub const MAX_ATTACHMENT_MB: u64 = 20;

    /// Largest limit whose byte count still fits in a `u64`
    pub const MAX_ATTACHMENT_MB_LIMIT: u64 = u64::MAX >> 20;
}

/// Server identity and network defaults
pub mod server {
    /// Name reported in the MCP initialize handshake
    pub const NAME: &str = "gmail-mcp-server";

    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 3001;

    /// Streamable HTTP endpoint
    pub const MCP_PATH: &str = "/mcp";

    /// Legacy SSE endpoints
    pub const SSE_PATH: &str = "/sse";
    pub const SSE_MESSAGES_PATH: &str = "/messages/";
}

/// Gmail API constants
pub mod gmail {
    /// Base URL for Gmail API
    pub const API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

    /// User ID for the authenticated user
    pub const USER_ID: &str = "me";

    /// The only scope the server asks for
    pub const SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

    /// Token endpoint used when a token file does not name one
    pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
}
