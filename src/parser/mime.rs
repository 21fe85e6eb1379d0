//! MIME decoding: raw RFC 5322 bytes → [`DecodedMessage`], plus the HTML
//! flattening helpers the rule parsers share.

use std::borrow::Cow;

use mail_parser::{MessageParser, MimeHeaders, PartType};
use tracing::debug;

use crate::error::{MailError, Result};
use crate::model::address::EmailAddress;
use crate::model::attachment::Attachment;
use crate::model::message::DecodedMessage;
use crate::parser::header::{self, HeaderBlock};

/// Decode a complete raw message (headers + body).
///
/// Uses `mail-parser` for the MIME tree, with the header decoders from
/// [`header`] for sender and subject so a bad charset never loses them.
/// Only an empty input is an error.
pub fn decode_message(raw_message: &[u8]) -> Result<DecodedMessage> {
    let raw = raw_message
        .strip_prefix(&b"\xEF\xBB\xBF"[..])
        .unwrap_or(raw_message);
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(MailError::Mime("empty message".into()));
    }

    let headers = HeaderBlock::from_message(raw);
    let mut decoded = DecodedMessage {
        from: EmailAddress::parse(&headers.decoded("from")),
        subject: headers.decoded("subject").trim().to_string(),
        date: headers.raw("date").and_then(header::parse_date),
        message_id: headers
            .raw("message-id")
            .map(|id| id.trim().to_string())
            .unwrap_or_default(),
        ..DecodedMessage::default()
    };

    let Some(msg) = MessageParser::default().parse(raw) else {
        debug!("mail-parser rejected message, using raw body");
        decoded.text = extract_body_fallback(raw);
        return Ok(decoded);
    };

    if decoded.from.address.is_empty() {
        if let Some(addr) = msg.from().and_then(|a| a.first()) {
            decoded.from = EmailAddress {
                display_name: addr.name().unwrap_or_default().to_string(),
                address: addr.address().unwrap_or_default().to_string(),
            };
        }
    }
    if decoded.subject.is_empty() {
        decoded.subject = msg.subject().unwrap_or_default().trim().to_string();
    }

    let mut texts: Vec<Cow<'_, str>> = Vec::new();
    let mut htmls: Vec<Cow<'_, str>> = Vec::new();

    for part in &msg.parts {
        let is_attachment = part
            .content_disposition()
            .map(|d| d.ctype().eq_ignore_ascii_case("attachment"))
            .unwrap_or(false);

        match &part.body {
            PartType::Text(text) if !is_attachment => texts.push(text.clone()),
            PartType::Html(html) if !is_attachment => htmls.push(html.clone()),
            PartType::Binary(data) | PartType::InlineBinary(data) => {
                decoded.attachments.push(Attachment {
                    filename: part.attachment_name().map(String::from),
                    content_type: content_type_of(part),
                    content_id: part
                        .content_id()
                        .map(|id| id.trim().trim_matches(|c: char| c == '<' || c == '>').to_string()),
                    is_inline: matches!(part.body, PartType::InlineBinary(_)) || !is_attachment,
                    data: data.to_vec(),
                });
            }
            _ => {}
        }
    }

    decoded.html = htmls.join(" ");
    decoded.text = if texts.is_empty() {
        html_to_text(&decoded.html)
    } else {
        texts.join("\n")
    };

    Ok(decoded)
}

/// `"type/subtype"` of a MIME part, defaulting to octet-stream.
fn content_type_of(part: &mail_parser::MessagePart<'_>) -> String {
    part.content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
            None => ct.ctype().to_ascii_lowercase(),
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Fallback body extraction when `mail-parser` cannot parse the message.
fn extract_body_fallback(data: &[u8]) -> String {
    match header::find_header_end(data) {
        Some(pos) => String::from_utf8_lossy(&data[pos..]).trim().to_string(),
        None => String::new(),
    }
}

/// Tags that start a new line when flattened.
const BLOCK_TAGS: [&str; 12] = [
    "br", "p", "div", "tr", "li", "table", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Convert HTML to line-oriented plain text.
///
/// - Line breaks from `<br>`, `<p>`, `<div>`, `<tr>`, `<li>`, headings
/// - Scripts and styles removed
/// - Common entities decoded
/// - Blank-line runs collapsed
pub fn html_to_text(html: &str) -> String {
    let mut text = remove_tag_block(html, "script");
    text = remove_tag_block(&text, "style");

    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    let mut naming = false;
    let mut tag_name = String::new();
    for ch in text.chars() {
        if !in_tag {
            if ch == '<' {
                in_tag = true;
                naming = true;
                tag_name.clear();
            } else {
                result.push(ch);
            }
            continue;
        }
        if ch == '>' {
            in_tag = false;
            if BLOCK_TAGS.contains(&tag_name.as_str()) {
                result.push('\n');
            } else if tag_name == "td" || tag_name == "th" {
                result.push(' ');
            }
        } else if naming {
            if ch.is_ascii_alphanumeric() {
                tag_name.push(ch.to_ascii_lowercase());
            } else if !(ch == '/' && tag_name.is_empty()) {
                naming = false;
            }
        }
    }

    let result = decode_entities(&result);

    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(result.len());
    for line in result.lines() {
        let trimmed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(&trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Flatten HTML to a single whitespace-normalized line of text.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    decode_entities(&out)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode the HTML entities that show up in transactional mail.
pub fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace('\u{a0}', " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&rsquo;", "'")
        .replace("&amp;", "&")
}

/// Remove an entire tag block (e.g. `<script>…</script>`).
fn remove_tag_block(html: &str, tag: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    let mut result = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open).map(|s| s + pos) {
        result.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => return result,
        }
    }
    result.push_str(&html[pos..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_message() {
        let raw = b"From: Amazon.com <shipment-tracking@amazon.com>\r\n\
Subject: =?UTF-8?Q?Shipped=3A_=22Desk_Lamp=22?=\r\n\
Date: Tue, 09 Sep 2025 10:00:00 +0000\r\n\
Message-ID: <abc@amazon.com>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Your order has shipped.\r\n";
        let msg = decode_message(raw).unwrap();
        assert_eq!(msg.from.address, "shipment-tracking@amazon.com");
        assert_eq!(msg.from.display_name, "Amazon.com");
        assert_eq!(msg.subject, "Shipped: \"Desk Lamp\"");
        assert_eq!(msg.message_id, "<abc@amazon.com>");
        assert!(msg.date.is_some());
        assert!(msg.text.contains("Your order has shipped."));
        assert!(msg.html.is_empty());
    }

    #[test]
    fn test_html_only_message_gets_text() {
        let raw = b"From: a@b.com\r\nSubject: Hi\r\nContent-Type: text/html\r\n\r\n<p>Out for <b>delivery</b></p>\r\n";
        let msg = decode_message(raw).unwrap();
        assert!(msg.html.contains("<b>delivery</b>"));
        assert_eq!(msg.text, "Out for delivery");
    }

    #[test]
    fn test_empty_message_is_error() {
        assert!(matches!(decode_message(b" \r\n "), Err(MailError::Mime(_))));
    }

    #[test]
    fn test_inline_image_captured() {
        let raw = b"From: USPS <USPSInformedDelivery@informeddelivery.usps.com>\r\n\
Subject: Your Daily Digest\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/related; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<img src=\"cid:scan1@usps\">\r\n\
--XX\r\n\
Content-Type: image/jpeg\r\n\
Content-ID: <scan1@usps>\r\n\
Content-Disposition: inline\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
/9j/4AAQ\r\n\
--XX--\r\n";
        let msg = decode_message(raw).unwrap();
        let image = msg.attachment_by_cid("<scan1@usps>").expect("inline image");
        assert!(image.is_image());
        assert!(image.is_inline);
        assert_eq!(&image.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_html_to_text_basic() {
        let text = html_to_text("<p>Hello <b>world</b></p><p>Second paragraph</p>");
        assert!(text.contains("Hello world"));
        assert!(text.contains("Second paragraph"));
    }

    #[test]
    fn test_html_to_text_entities_and_scripts() {
        assert_eq!(html_to_text("Tom &amp; Jerry &lt;3&gt;"), "Tom & Jerry <3>");
        assert_eq!(html_to_text("Before<SCRIPT>alert(1)</script>After"), "BeforeAfter");
    }

    #[test]
    fn test_html_to_text_separates_cells() {
        let text = html_to_text("<tr><td>FROM:</td><td>Alice</td></tr><tr><td>FROM: Bob</td></tr>");
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, vec!["FROM: Alice", "FROM: Bob"]);
    }

    #[test]
    fn test_strip_tags_flattens() {
        let flat = strip_tags("<td>FROM:</td>\n<td>Alice&nbsp;Smith</td>");
        assert_eq!(flat, "FROM: Alice Smith");
    }
}
