//! Data model: decoded messages, sender addresses, and inline attachments.

pub mod address;
pub mod attachment;
pub mod message;
