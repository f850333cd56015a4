//! Gmail MCP Server - Rust Implementation
//!
//! A Model Context Protocol (MCP) server that sends email with attachments
//! through the Gmail API, over streamable HTTP, legacy SSE or stdio.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use gmail_mcp_server::config::{server, Config};
use gmail_mcp_server::error::{ConfigError, Result};
use gmail_mcp_server::gmail::auth::Authenticator;
use gmail_mcp_server::gmail::client::GmailClient;
use gmail_mcp_server::mcp::server::McpServer;
use gmail_mcp_server::mcp::tools::ToolHandler;
use gmail_mcp_server::mcp::{http, sse};

/// Gmail MCP Server
#[derive(Parser)]
#[command(name = "gmail-mcp-server")]
#[command(author, version, about = "Gmail MCP Server - send email with attachments over MCP")]
struct Cli {
    /// Transport to serve MCP over
    #[arg(short, long, value_enum, default_value_t = Transport::Http)]
    transport: Transport,

    /// Listen port for the HTTP transports
    #[arg(short, long, default_value_t = server::DEFAULT_PORT)]
    port: u16,

    /// Bind address for the HTTP transports
    #[arg(long, default_value = server::DEFAULT_HOST)]
    host: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Streamable HTTP on /mcp
    Http,
    /// Legacy HTTP+SSE on /sse
    Sse,
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize Gmail access and write the token file
    Auth,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdio transport output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new()?;

    match cli.command {
        Some(Commands::Auth) => {
            let authenticator = Authenticator::new(config);
            authenticator.authenticate_interactive().await?;
            eprintln!("Authentication completed successfully!");
            Ok(())
        }
        None => run_server(cli, config).await,
    }
}

async fn run_server(cli: Cli, config: Config) -> Result<()> {
    if !config.credentials_exist() && !config.token_exists() {
        warn!(
            credentials = %config.credentials_path.display(),
            token = %config.token_path.display(),
            "no Gmail credentials yet; send_gmail will fail until they are provided"
        );
    }

    let config = Arc::new(config);
    let authenticator = Arc::new(Authenticator::new(config.as_ref().clone()));
    let client = Arc::new(GmailClient::new(authenticator, config.api_base_url.clone()));
    let server = Arc::new(McpServer::new(ToolHandler::new(client, config.clone())));

    info!(
        transport = ?cli.transport,
        attachments_base_dir = %config.attachments_base_dir.display(),
        "starting {}",
        server::NAME
    );

    match cli.transport {
        Transport::Stdio => server.run_stdio().await,
        Transport::Http => {
            let addr = listen_addr(&cli.host, cli.port).await?;
            http::serve(addr, server, shutdown_signal()).await
        }
        Transport::Sse => {
            let addr = listen_addr(&cli.host, cli.port).await?;
            sse::serve(addr, server, shutdown_signal()).await
        }
    }
}

/// IP literals (v4, v6, bracketed v6) are used as-is, names are resolved
async fn listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let invalid = || ConfigError::InvalidValue {
        var: "--host".to_string(),
        value: host.to_string(),
    };

    tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(|| invalid().into())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
