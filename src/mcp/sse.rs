//! Legacy HTTP+SSE transport
//!
//! `GET /sse` opens an event stream whose first `endpoint` event names the
//! URL to POST messages to. Replies travel back over the stream as
//! `message` events.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::server::{SSE_MESSAGES_PATH, SSE_PATH};
use crate::error::Result;
use crate::mcp::server::McpServer;
use crate::mcp::types::JsonRpcResponse;

/// Replies buffered per stream before senders wait
const CHANNEL_CAPACITY: usize = 32;

/// Open streams keyed by session id
#[derive(Debug, Default)]
pub struct SseSessions {
    senders: RwLock<HashMap<String, mpsc::Sender<JsonRpcResponse>>>,
}

impl SseSessions {
    pub fn insert(&self, id: String, sender: mpsc::Sender<JsonRpcResponse>) {
        self.senders.write().insert(id, sender);
    }

    pub fn get(&self, id: &str) -> Option<mpsc::Sender<JsonRpcResponse>> {
        self.senders.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.senders.write().remove(id);
    }

    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes the session once its stream is dropped
struct SessionGuard {
    id: String,
    sessions: Arc<SseSessions>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        debug!(session = %self.id, "SSE stream closed");
    }
}

#[derive(Clone)]
struct SseState {
    server: Arc<McpServer>,
    sessions: Arc<SseSessions>,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: Option<String>,
}

/// Build the SSE router
pub fn router(server: Arc<McpServer>) -> Router {
    router_with_sessions(server, Arc::new(SseSessions::default()))
}

/// Build the SSE router around an existing session registry
pub fn router_with_sessions(server: Arc<McpServer>, sessions: Arc<SseSessions>) -> Router {
    Router::new()
        .route(SSE_PATH, get(handle_stream))
        .route(SSE_MESSAGES_PATH, post(handle_post))
        .with_state(SseState { server, sessions })
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, server: Arc<McpServer>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "MCP SSE server listening on http://{}{}",
        listener.local_addr()?,
        SSE_PATH
    );

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("MCP SSE server stopped");
    Ok(())
}

async fn handle_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<JsonRpcResponse>(CHANNEL_CAPACITY);
    let id = Uuid::new_v4().simple().to_string();
    state.sessions.insert(id.clone(), tx);
    info!(session = %id, "SSE stream opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?session_id={}", SSE_MESSAGES_PATH, id));

    let guard = SessionGuard {
        id,
        sessions: state.sessions.clone(),
    };

    let messages = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let response = rx.recv().await?;
        let data = serde_json::to_string(&response).unwrap_or_default();
        let event = Event::default().event("message").data(data);
        Some((Ok(event), (rx, guard)))
    });

    let events = stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(messages);

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn handle_post(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(id) = query.session_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "session_id is required").into_response();
    };

    let Some(sender) = state.sessions.get(&id) else {
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    };

    let message: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(session = %id, "unparseable SSE message: {}", e);
            return (StatusCode::BAD_REQUEST, "Could not parse message").into_response();
        }
    };

    let server = state.server.clone();
    tokio::spawn(async move {
        if let Some(response) = server.handle_value(message).await {
            if sender.send(response).await.is_err() {
                debug!(session = %id, "SSE client went away before the reply");
            }
        }
    });

    (StatusCode::ACCEPTED, "Accepted").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gmail::client::{MailSender, SentMessage};
    use crate::mcp::tools::ToolHandler;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NoopSender;

    #[async_trait]
    impl MailSender for NoopSender {
        async fn send_raw(&self, _raw: String) -> Result<SentMessage> {
            Ok(SentMessage {
                id: "noop".to_string(),
                thread_id: None,
                label_ids: vec![],
            })
        }
    }

    fn app() -> (Router, Arc<SseSessions>) {
        let config = Config::from_lookup(|_| None).unwrap();
        let server = Arc::new(McpServer::new(ToolHandler::new(
            Arc::new(NoopSender),
            Arc::new(config),
        )));
        let sessions = Arc::new(SseSessions::default());
        (router_with_sessions(server, sessions.clone()), sessions)
    }

    fn post_message(query: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("{}{}", SSE_MESSAGES_PATH, query))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_stream_announces_endpoint_and_cleans_up() {
        let (app, sessions) = app();
        let request = Request::builder()
            .method("GET")
            .uri(SSE_PATH)
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let first = String::from_utf8(first.to_vec()).unwrap();
        assert!(first.contains("event: endpoint"));
        assert!(first.contains("/messages/?session_id="));
        assert_eq!(sessions.len(), 1);

        drop(body);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_reply_delivered_on_stream() {
        let (app, sessions) = app();
        let (tx, mut rx) = mpsc::channel(4);
        sessions.insert("abc".to_string(), tx);

        let response = app
            .oneshot(post_message(
                "?session_id=abc",
                r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let reply = rx.recv().await.unwrap();
        assert_eq!(
            reply.id,
            Some(crate::mcp::types::RequestId::Number(7))
        );
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn test_post_session_errors() {
        let (app, _) = app();
        let ping = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;

        let missing = app.clone().oneshot(post_message("", ping)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let unknown = app
            .oneshot(post_message("?session_id=nope", ping))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_message() {
        let (app, sessions) = app();
        let (tx, _rx) = mpsc::channel(1);
        sessions.insert("abc".to_string(), tx);

        let response = app
            .oneshot(post_message("?session_id=abc", "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
