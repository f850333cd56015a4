//! Streamable HTTP transport
//!
//! A single `/mcp` endpoint. `POST` carries one JSON-RPC message and gets a
//! JSON reply, `DELETE` ends a session. Sessions are created by `initialize`
//! and identified by the `Mcp-Session-Id` header.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::server::MCP_PATH;
use crate::error::Result;
use crate::mcp::server::McpServer;
use crate::mcp::types::{methods, JsonRpcError, JsonRpcResponse};

/// Session header, lower-case as HTTP/2 requires
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Sessions idle longer than this are dropped
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Per-session bookkeeping
#[derive(Debug, Clone)]
pub struct Session {
    pub protocol_version: String,
    pub last_seen: Instant,
}

/// Live sessions keyed by id
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    idle_timeout: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_idle_timeout(SESSION_IDLE_TIMEOUT)
    }
}

impl SessionStore {
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Register a new session and return its id; idle sessions are swept first
    pub fn create(&self, protocol_version: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write();

        let before = sessions.len();
        sessions.retain(|_, session| session.last_seen.elapsed() < self.idle_timeout);
        if sessions.len() < before {
            debug!(expired = before - sessions.len(), "idle MCP sessions dropped");
        }

        sessions.insert(
            id.clone(),
            Session {
                protocol_version: protocol_version.to_string(),
                last_seen: Instant::now(),
            },
        );
        id
    }

    /// Mark a session as used; `false` if it is unknown or has gone idle
    pub fn touch(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };

        if session.last_seen.elapsed() < self.idle_timeout {
            session.last_seen = Instant::now();
            return true;
        }

        sessions.remove(id);
        false
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
struct HttpState {
    server: Arc<McpServer>,
    sessions: Arc<SessionStore>,
}

/// Build the `/mcp` router
pub fn router(server: Arc<McpServer>) -> Router {
    router_with_sessions(server, Arc::new(SessionStore::default()))
}

/// Build the `/mcp` router around an existing session store
pub fn router_with_sessions(server: Arc<McpServer>, sessions: Arc<SessionStore>) -> Router {
    Router::new()
        .route(
            MCP_PATH,
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .with_state(HttpState { server, sessions })
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, server: Arc<McpServer>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "MCP streamable HTTP server listening on http://{}{}",
        listener.local_addr()?,
        MCP_PATH
    );

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("MCP HTTP server stopped");
    Ok(())
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn rpc_error(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::error(None, error))).into_response()
}

fn missing_session() -> Response {
    rpc_error(
        StatusCode::BAD_REQUEST,
        JsonRpcError::invalid_request("Bad Request: Missing session ID"),
    )
}

fn unknown_session() -> Response {
    rpc_error(
        StatusCode::NOT_FOUND,
        JsonRpcError::invalid_request("Session not found"),
    )
}

async fn handle_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                JsonRpcError::parse_error(format!("Parse error: {}", e)),
            );
        }
    };

    let is_initialize = message.get("method").and_then(Value::as_str) == Some(methods::INITIALIZE);

    if is_initialize {
        let Some(response) = state.server.handle_value(message).await else {
            return StatusCode::ACCEPTED.into_response();
        };

        if response.error.is_some() {
            return (StatusCode::OK, Json(response)).into_response();
        }

        let version = response
            .result
            .as_ref()
            .and_then(|r| r.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = state.sessions.create(&version);
        info!(session = %id, protocol_version = %version, "MCP session created");

        return (StatusCode::OK, [(SESSION_HEADER, id)], Json(response)).into_response();
    }

    match session_id(&headers) {
        None => return missing_session(),
        Some(id) if !state.sessions.touch(id) => return unknown_session(),
        Some(_) => {}
    }

    match state.server.handle_value(message).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// No server-initiated stream is offered
async fn handle_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST, DELETE")],
    )
        .into_response()
}

async fn handle_delete(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return missing_session();
    };

    match state.sessions.remove(id) {
        Some(_) => {
            debug!(session = %id, "MCP session terminated");
            StatusCode::OK.into_response()
        }
        None => unknown_session(),
    }
}
