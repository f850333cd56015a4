//! MCP Tool definitions and handlers
//!
//! The server exposes a single tool, `send_gmail`.

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use validator::Validate;

use crate::config::Config;
use crate::error::{GmailMcpError, McpError, Result, ValidationError};
use crate::gmail::attachments::{load_attachment, AttachmentSpec};
use crate::gmail::client::MailSender;
use crate::gmail::message::{build_raw_email, BodyFormat, OutgoingEmail};
use crate::mcp::types::{CallToolResult, Tool};

pub const SEND_GMAIL: &str = "send_gmail";

const SEND_GMAIL_DESCRIPTION: &str = "Send an email with optional attachments.

attachments item supports:
- { \"filename\": \"...\", \"mime_type\": \"...\", \"content_base64\": \"...\" }
OR (volume/path)
- { \"path\": \"/shared/output/file.pptx\" }
- { \"path\": \"output/file.pptx\" }  # relative => resolved under the attachments base dir";

/// Arguments of `send_gmail`
#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct SendGmailArgs {
    /// Recipient address, or several separated by commas
    #[validate(length(min = 1))]
    pub to: String,

    pub subject: String,

    pub body: String,

    /// Whether `body` is plain text or HTML
    #[serde(default)]
    pub body_format: BodyFormat,

    #[serde(default)]
    pub attachments: Option<Vec<AttachmentSpec>>,
}

/// Tool handler
pub struct ToolHandler {
    sender: Arc<dyn MailSender>,
    config: Arc<Config>,
}

impl ToolHandler {
    /// Create a new tool handler
    pub fn new(sender: Arc<dyn MailSender>, config: Arc<Config>) -> Self {
        Self { sender, config }
    }

    /// List all available tools
    pub fn list_tools(&self) -> Vec<Tool> {
        vec![Tool {
            name: SEND_GMAIL.to_string(),
            description: Some(SEND_GMAIL_DESCRIPTION.to_string()),
            input_schema: send_gmail_schema(),
        }]
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: &str, args: Value) -> CallToolResult {
        let outcome = match name {
            SEND_GMAIL => self.handle_send_gmail(args).await,
            _ => Err(McpError::UnknownTool {
                name: name.to_string(),
            }
            .into()),
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                CallToolResult::error(e.to_string())
            }
        }
    }

    // ==================== Tool Handlers ====================

    async fn handle_send_gmail(&self, args: Value) -> Result<CallToolResult> {
        let args: SendGmailArgs = serde_json::from_value(args).map_err(|e| {
            GmailMcpError::from(McpError::InvalidArguments {
                message: e.to_string(),
            })
        })?;

        args.validate().map_err(|e| ValidationError::InvalidParameter {
            name: "to".to_string(),
            message: e.to_string(),
        })?;

        let specs = args.attachments.unwrap_or_default();
        let mut attachments = Vec::with_capacity(specs.len());
        for spec in &specs {
            attachments.push(load_attachment(spec, &self.config).await?);
        }

        let email = OutgoingEmail {
            to: args.to,
            subject: args.subject,
            body: args.body,
            body_format: args.body_format,
            attachments,
        };

        info!(
            to = %email.to,
            attachments = email.attachments.len(),
            "sending email"
        );

        let raw = build_raw_email(&email)?;
        let sent = self.sender.send_raw(raw).await?;

        Ok(CallToolResult::structured(json!({
            "ok": true,
            "message_id": sent.id,
        })))
    }
}

/// JSON Schema for `send_gmail`, derived from the argument type
pub fn send_gmail_schema() -> Value {
    let mut schema = serde_json::to_value(schema_for!(SendGmailArgs)).unwrap_or_else(|_| {
        json!({"type": "object"})
    });

    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::client::SentMessage;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::URL_SAFE, Engine};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailSender for RecordingSender {
        async fn send_raw(&self, raw: String) -> Result<SentMessage> {
            self.sent.lock().push(raw);
            Ok(SentMessage {
                id: "msg-1".to_string(),
                thread_id: None,
                label_ids: vec![],
            })
        }
    }

    fn handler(base: &std::path::Path) -> (ToolHandler, Arc<RecordingSender>) {
        let vars: HashMap<&str, String> =
            HashMap::from([("ATTACHMENTS_BASE_DIR", base.display().to_string())]);
        let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
        let sender = Arc::new(RecordingSender::default());
        (
            ToolHandler::new(sender.clone(), Arc::new(config)),
            sender,
        )
    }

    #[test]
    fn test_single_tool_listed() {
        let (handler, _) = handler(std::path::Path::new("/shared"));
        let tools = handler.list_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "send_gmail");
    }

    #[test]
    fn test_schema_shape() {
        let schema = send_gmail_schema();
        assert_eq!(schema["type"], "object");
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"to"));
        assert!(required.contains(&"subject"));
        assert!(required.contains(&"body"));
        assert!(!required.contains(&"body_format"));
        assert!(schema["properties"]["attachments"].is_object());
    }

    #[tokio::test]
    async fn test_send_with_path_attachment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deck.pptx"), b"pptx-bytes").unwrap();
        let (handler, sender) = handler(dir.path());

        let result = handler
            .call_tool(
                "send_gmail",
                json!({
                    "to": "team@example.com",
                    "subject": "Deck",
                    "body": "Attached",
                    "attachments": [{"path": "deck.pptx"}]
                }),
            )
            .await;

        assert!(!result.is_error);
        assert_eq!(
            result.structured_content,
            Some(json!({"ok": true, "message_id": "msg-1"}))
        );

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 1);
        let message = String::from_utf8(URL_SAFE.decode(&sent[0]).unwrap()).unwrap();
        assert!(message.contains("deck.pptx"));
    }

    #[tokio::test]
    async fn test_attachment_error_becomes_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, sender) = handler(dir.path());

        let result = handler
            .call_tool(
                "send_gmail",
                json!({
                    "to": "team@example.com",
                    "subject": "Deck",
                    "body": "Attached",
                    "attachments": [{"content_base64": "YQ=="}]
                }),
            )
            .await;

        assert!(result.is_error);
        let crate::mcp::types::ToolResultContent::Text { text } = &result.content[0];
        assert_eq!(text, "Error: attachment with content_base64 requires filename");
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_body_format_rejected() {
        let (handler, _) = handler(std::path::Path::new("/shared"));
        let result = handler
            .call_tool(
                "send_gmail",
                json!({"to": "a@example.com", "subject": "s", "body": "b", "body_format": "markdown"}),
            )
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_empty_recipient_rejected() {
        let (handler, _) = handler(std::path::Path::new("/shared"));
        let result = handler
            .call_tool("send_gmail", json!({"to": "", "subject": "s", "body": "b"}))
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (handler, _) = handler(std::path::Path::new("/shared"));
        let result = handler.call_tool("read_email", json!({})).await;
        assert!(result.is_error);
    }
}
