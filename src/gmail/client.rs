//! Gmail API client
//!
//! Sends pre-built messages through `users.messages.send`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::gmail::USER_ID;
use crate::error::{GmailApiError, Result};
use crate::gmail::auth::Authenticator;

/// Default back-off when a 429 carries no Retry-After header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Anything that can deliver an encoded message
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Send a base64url encoded RFC 5322 message
    async fn send_raw(&self, raw: String) -> Result<SentMessage>;
}

/// Request body for `users.messages.send`
#[derive(Debug, Clone, Serialize)]
struct SendMessageRequest {
    raw: String,
}

/// Message resource returned after sending
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    /// Message ID
    pub id: String,

    /// Thread ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Label IDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,
}

/// Gmail API client
pub struct GmailClient {
    /// HTTP client
    http_client: reqwest::Client,

    /// OAuth authenticator
    authenticator: Arc<Authenticator>,

    /// API base URL, e.g. `https://gmail.googleapis.com/gmail/v1`
    base_url: String,
}

impl GmailClient {
    /// Create a new Gmail client
    pub fn new(authenticator: Arc<Authenticator>, base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            authenticator,
            base_url: base_url.into(),
        }
    }

    fn send_url(&self) -> String {
        format!("{}/users/{}/messages/send", self.base_url, USER_ID)
    }
}

#[async_trait]
impl MailSender for GmailClient {
    async fn send_raw(&self, raw: String) -> Result<SentMessage> {
        let token = self.authenticator.get_access_token().await?;

        debug!(bytes = raw.len(), "sending message via Gmail API");

        let response = self
            .http_client
            .post(self.send_url())
            .bearer_auth(&token)
            .json(&SendMessageRequest { raw })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let sent: SentMessage = response.json().await?;
            info!(message_id = %sent.id, "message sent");
            return Ok(sent);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let text = response.text().await.unwrap_or_default();

        Err(status_error(status, retry_after, text).into())
    }
}

/// Map a failed send to a typed error
fn status_error(status: StatusCode, retry_after: Option<u64>, body: String) -> GmailApiError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => GmailApiError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GmailApiError::InsufficientPermissions {
                message: format!("{}: {}", status, body),
            }
        }
        _ => GmailApiError::RequestFailed {
            message: format!("Failed to send email ({}): {}", status, body),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::GmailMcpError;
    use std::collections::HashMap;

    async fn client_for(server: &mockito::ServerGuard, dir: &std::path::Path) -> GmailClient {
        std::fs::write(
            dir.join("token.json"),
            r#"{"token": "access-123", "expiry": "2999-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let vars: HashMap<&str, String> = HashMap::from([(
            "GMAIL_TOKEN_FILE",
            dir.join("token.json").display().to_string(),
        )]);
        let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
        GmailClient::new(
            Arc::new(Authenticator::new(config)),
            format!("{}/gmail/v1", server.url()),
        )
    }

    #[tokio::test]
    async fn test_send_posts_raw_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gmail/v1/users/me/messages/send")
            .match_header("authorization", "Bearer access-123")
            .match_body(mockito::Matcher::Json(serde_json::json!({"raw": "UkFX"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "18c0ffee", "threadId": "18c0ffee", "labelIds": ["SENT"]}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, dir.path()).await;

        let sent = client.send_raw("UkFX".to_string()).await.unwrap();
        assert_eq!(sent.id, "18c0ffee");
        assert_eq!(sent.label_ids, vec!["SENT".to_string()]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_maps_retry_after() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/gmail/v1/users/me/messages/send")
            .with_status(429)
            .with_header("retry-after", "17")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, dir.path()).await;

        let err = client.send_raw("UkFX".to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            GmailMcpError::Gmail(GmailApiError::RateLimited {
                retry_after_secs: 17
            })
        ));
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, None, "scope".into()),
            GmailApiError::InsufficientPermissions { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, None, String::new()),
            GmailApiError::RateLimited {
                retry_after_secs: DEFAULT_RETRY_AFTER_SECS
            }
        ));
        let failed = status_error(StatusCode::BAD_REQUEST, None, "bad raw".into());
        assert!(failed.to_string().contains("400"));
        assert!(failed.to_string().contains("bad raw"));
    }
}
