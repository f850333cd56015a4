//! Outgoing message construction
//!
//! Builds the RFC 5322 message Gmail expects in the `raw` field of
//! `users.messages.send`.

use base64::{engine::general_purpose::URL_SAFE, Engine};
use lettre::message::Mailbox;
use mail_builder::headers::address::Address;
use mail_builder::MessageBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::gmail::attachments::{split_mime_type, AttachmentData};

/// Body content type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Plain,
    Html,
}

/// A fully resolved email ready to encode
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub body_format: BodyFormat,
    pub attachments: Vec<AttachmentData>,
}

/// Parse a comma separated recipient list
pub fn parse_recipients(to: &str) -> Result<Vec<Mailbox>> {
    let mut recipients = Vec::new();

    for entry in to.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mailbox: Mailbox = entry.parse().map_err(|_| ValidationError::InvalidEmail {
            email: entry.to_string(),
        })?;
        recipients.push(mailbox);
    }

    if recipients.is_empty() {
        return Err(ValidationError::MissingField {
            field: "to".to_string(),
        }
        .into());
    }

    Ok(recipients)
}

/// Render the MIME message
pub fn build_mime_message(email: &OutgoingEmail) -> Result<Vec<u8>> {
    let recipients = parse_recipients(&email.to)?;

    let to = Address::new_list(
        recipients
            .iter()
            .map(|mailbox| {
                Address::new_address(mailbox.name.clone(), mailbox.email.to_string())
            })
            .collect(),
    );

    let mut builder = MessageBuilder::new().to(to).subject(email.subject.as_str());

    builder = match email.body_format {
        BodyFormat::Plain => builder.text_body(email.body.as_str()),
        BodyFormat::Html => builder.html_body(email.body.as_str()),
    };

    for attachment in &email.attachments {
        let (main, sub) = split_mime_type(&attachment.mime_type);
        builder = builder.attachment(
            format!("{}/{}", main, sub),
            attachment.filename.as_str(),
            attachment.data.as_slice(),
        );
    }

    Ok(builder.write_to_vec()?)
}

/// Render and encode the message for the Gmail `raw` field
pub fn build_raw_email(email: &OutgoingEmail) -> Result<String> {
    let message = build_mime_message(email)?;
    Ok(URL_SAFE.encode(message))
}
