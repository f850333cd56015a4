//! Error types for the Gmail MCP Server
//!
//! This module defines the error hierarchy for all operations in the server.

use thiserror::Error;

/// Main error type for the Gmail MCP Server
#[derive(Error, Debug)]
pub enum GmailMcpError {
    /// OAuth authentication errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Gmail API errors
    #[error("Gmail API error: {0}")]
    Gmail(#[from] GmailApiError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Attachment resolution errors
    #[error("{0}")]
    Attachment(#[from] AttachmentError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// OAuth authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("credentials file not found: {path}. Set GMAIL_CREDENTIALS_FILE or place credentials.json next to server.")]
    CredentialsNotFound { path: String },

    #[error("Invalid client secrets format: expected 'installed' or 'web' credentials")]
    InvalidSecretsFormat,

    #[error("No usable token in {path}; run `gmail-mcp-server auth` to authorize")]
    NotAuthenticated { path: String },

    #[error("Failed to refresh access token: {message}")]
    TokenRefreshFailed { message: String },

    #[error("OAuth callback error: {message}")]
    CallbackError { message: String },

    #[error("No authorization code provided")]
    NoAuthCode,

    #[error("Token exchange failed: {message}")]
    TokenExchangeFailed { message: String },
}

/// Gmail API errors
#[derive(Error, Debug)]
pub enum GmailApiError {
    #[error("API request failed: {message}")]
    RequestFailed { message: String },

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Insufficient permissions: {message}")]
    InsufficientPermissions { message: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

/// Attachment errors
#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("Attachment path not allowed (outside base dir): {path}")]
    OutsideBaseDir { path: String },

    #[error("Attachment too large: {size} bytes (max {max_mb}MB)")]
    TooLarge { size: u64, max_mb: u64 },

    #[error("attachment: provide either content_base64 OR path, not both")]
    ConflictingSources,

    #[error("attachment with content_base64 requires filename")]
    MissingFilename,

    #[error("attachment requires content_base64 or path")]
    MissingSource,

    #[error("attachment content_base64 is not valid base64: {message}")]
    InvalidBase64 { message: String },

    #[error("Attachment not readable: {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid email address: {email}")]
    InvalidEmail { email: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid parameter: {name} - {message}")]
    InvalidParameter { name: String, message: String },
}

/// MCP protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },
}

/// Result type alias for Gmail MCP operations
pub type Result<T> = std::result::Result<T, GmailMcpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_message_names_env_var() {
        let err = AuthError::CredentialsNotFound {
            path: "/app/secrets/credentials.json".to_string(),
        };
        let text = err.to_string();
        assert!(text.starts_with("credentials file not found: /app/secrets/credentials.json"));
        assert!(text.contains("GMAIL_CREDENTIALS_FILE"));
    }

    #[test]
    fn test_attachment_error_is_not_prefixed() {
        let err: GmailMcpError = AttachmentError::TooLarge {
            size: 30,
            max_mb: 20,
        }
        .into();
        assert_eq!(err.to_string(), "Attachment too large: 30 bytes (max 20MB)");
    }

    #[test]
    fn test_error_conversion() {
        let gmail_err: GmailMcpError = AuthError::NoAuthCode.into();
        assert!(matches!(gmail_err, GmailMcpError::Auth(_)));
    }
}
