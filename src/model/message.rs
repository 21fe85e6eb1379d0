//! The normalized in-memory message handed to the rule parsers.

use chrono::{DateTime, Utc};

use super::address::EmailAddress;
use super::attachment::Attachment;

/// One fetched message, decoded once and discarded after routing.
#[derive(Debug, Clone, Default)]
pub struct DecodedMessage {
    /// Sender (first `From:` address), encoded-words resolved.
    pub from: EmailAddress,

    /// Decoded subject line. Never an error placeholder: undecodable words
    /// are kept verbatim.
    pub subject: String,

    /// Parsed `Date:` header, if it could be understood.
    pub date: Option<DateTime<Utc>>,

    /// The `Message-ID` header value.
    pub message_id: String,

    /// Plain-text body: every `text/plain` part joined, or the HTML body
    /// flattened to text when the message has no plain part.
    pub text: String,

    /// Every `text/html` part joined (empty for plain-only messages).
    pub html: String,

    /// Non-body parts, including inline images.
    pub attachments: Vec<Attachment>,
}

impl DecodedMessage {
    /// Lowercased subject, for keyword classification.
    pub fn subject_lower(&self) -> String {
        self.subject.to_lowercase()
    }

    /// Find an attachment by its `Content-ID` (brackets optional).
    pub fn attachment_by_cid(&self, cid: &str) -> Option<&Attachment> {
        let wanted = cid.trim().trim_start_matches('<').trim_end_matches('>');
        self.attachments
            .iter()
            .find(|a| a.content_id.as_deref() == Some(wanted))
    }
}
