//! Gmail API module
//!
//! Authentication, attachment loading, message construction and the send
//! client.

pub mod attachments;
pub mod auth;
pub mod client;
pub mod message;
