//! Attachment loading
//!
//! Attachments arrive either as inline base64 content or as a path on the
//! shared volume. Paths are confined to the configured base directory and
//! capped in size.

use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AttachmentError, Result};

/// Fallback MIME type
pub const OCTET_STREAM: &str = "application/octet-stream";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One attachment as supplied by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AttachmentSpec {
    /// File name shown to the recipient; derived from `path` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// MIME type; guessed from the file name when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Inline file content, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,

    /// File on the shared volume; relative paths resolve against the base dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A resolved attachment ready to be encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentData {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Resolve a spec into bytes plus metadata
pub async fn load_attachment(spec: &AttachmentSpec, config: &Config) -> Result<AttachmentData> {
    let filename = non_empty(&spec.filename);
    let mime_type = non_empty(&spec.mime_type);

    match (non_empty(&spec.content_base64), non_empty(&spec.path)) {
        (Some(_), Some(_)) => Err(AttachmentError::ConflictingSources.into()),
        (None, Some(path)) => {
            let path = resolve_attachment_path(path, &config.attachments_base_dir);

            let filename = match filename {
                Some(name) => name.to_string(),
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            };
            let mime_type = mime_type
                .map(str::to_string)
                .unwrap_or_else(|| guess_mime_type(&filename).to_string());

            let data = safe_read_file(
                &path,
                &config.attachments_base_dir,
                config.max_attachment_mb,
            )
            .await?;

            Ok(AttachmentData {
                filename,
                mime_type,
                data,
            })
        }
        (Some(content), None) => {
            let filename = filename.ok_or(AttachmentError::MissingFilename)?.to_string();
            let mime_type = mime_type
                .map(str::to_string)
                .unwrap_or_else(|| guess_mime_type(&filename).to_string());

            Ok(AttachmentData {
                filename,
                mime_type,
                data: decode_content(content)?,
            })
        }
        (None, None) => Err(AttachmentError::MissingSource.into()),
    }
}

/// Join relative paths onto the base directory
pub fn resolve_attachment_path(path: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Read a file that must live under `base_dir` and fit in `max_mb`
pub async fn safe_read_file(path: &Path, base_dir: &Path, max_mb: u64) -> Result<Vec<u8>> {
    let full = absolutize(path)?;
    let base = absolutize(base_dir)?;

    // Component-wise, so "/shared2" is not under "/shared"
    if !full.starts_with(&base) {
        return Err(AttachmentError::OutsideBaseDir {
            path: full.display().to_string(),
        }
        .into());
    }

    let unreadable = |source| AttachmentError::Unreadable {
        path: full.display().to_string(),
        source,
    };

    let size = tokio::fs::metadata(&full).await.map_err(unreadable)?.len();
    if size > max_mb.saturating_mul(BYTES_PER_MB) {
        return Err(AttachmentError::TooLarge { size, max_mb }.into());
    }

    Ok(tokio::fs::read(&full).await.map_err(unreadable)?)
}

/// Make a path absolute and fold `.`/`..` without touching the filesystem
fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Decode inline content; padding is optional and whitespace is ignored
fn decode_content(content: &str) -> Result<Vec<u8>> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();

    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=')))
        .map_err(|e| {
            AttachmentError::InvalidBase64 {
                message: e.to_string(),
            }
            .into()
        })
}

/// Guess a MIME type from a file name's extension
pub fn guess_mime_type(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("odp") => "application/vnd.oasis.opendocument.presentation",
        Some("key") => "application/vnd.apple.keynote",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("zip") => "application/zip",
        _ => OCTET_STREAM,
    }
}

/// Split `maintype/subtype`; a bare type gets `octet-stream` as subtype
pub fn split_mime_type(mime_type: &str) -> (String, String) {
    match mime_type.split_once('/') {
        Some((main, sub)) => (main.to_string(), sub.to_string()),
        None => (mime_type.to_string(), "octet-stream".to_string()),
    }
}
