//! RFC 5322 header handling: raw byte decoding, folding, encoded-words
//! (RFC 2047), and date parsing.
//!
//! Nothing in here returns an error. Every decoder degrades to a best-effort
//! string so callers never need a fallback path of their own.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

/// Encoded words in the wild are frequently missing their `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Unfolded header block of one message.
#[derive(Debug, Clone, Default)]
pub struct HeaderBlock {
    /// `(lowercase_name, raw_value)` pairs in message order.
    entries: Vec<(String, String)>,
}

impl HeaderBlock {
    /// Split the raw message at the first blank line and unfold the headers.
    pub fn from_message(raw_message: &[u8]) -> Self {
        let end = find_header_end(raw_message).unwrap_or(raw_message.len());
        let text = decode_header_bytes(&raw_message[..end]);
        Self {
            entries: unfold_headers(&text),
        }
    }

    /// First raw (still encoded) value for a header name, case-insensitive.
    pub fn raw(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value with encoded-words resolved; empty when absent.
    pub fn decoded(&self, name: &str) -> String {
        self.raw(name).map(decode_encoded_words).unwrap_or_default()
    }
}

/// Byte offset of the blank line that ends the header block.
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    let lf = data.windows(2).position(|w| w == b"\n\n");
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&b"\xEF\xBB\xBF"[..]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            result.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    result
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// A word that cannot be decoded is kept verbatim; an unknown charset falls
/// back to lossy UTF-8.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two adjacent encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];
        match decode_one_word(after_start) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &after_start[consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=`; returns the text and bytes consumed.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded_text = &rest[..end];

    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => {
            let compact: String = encoded_text
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            match LENIENT_BASE64.decode(compact.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "Undecodable base64 encoded-word kept as-is");
                    return None;
                }
            }
        }
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some((decode_charset(charset, &bytes), consumed))
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode bytes using a named charset (RFC 2231 language suffix tolerated).
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    let label = charset.split('*').next().unwrap_or(charset);
    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) => {
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned()
        }
        None => {
            warn!(charset = label, "Unknown charset, falling back to UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, RFC 3339, and the usual broken real-world variants
/// (missing day-of-week, named zones, no zone at all).
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Comments such as "(PDT)" after the offset confuse chrono
    let no_comment = trimmed
        .split_once(" (")
        .map(|(head, _)| head)
        .unwrap_or(trimmed);
    let no_dow = strip_day_of_week(no_comment);
    let with_offset = replace_named_tz(&no_dow);

    const FORMATS: [&str; 5] = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%Y-%m-%d %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];

    for candidate in [&no_dow, &with_offset] {
        for fmt in &FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Attempt to parse a date using `mail-parser`'s built-in parser.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    let fake_msg = format!("Date: {input}\n\n");
    let parsed = mail_parser::MessageParser::default().parse(fake_msg.as_bytes())?;
    let rfc3339 = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches(',').trim().to_string();
        }
    }
    s.to_string()
}

/// Replace well-known US/European timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 11] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_base64_without_padding() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        let input = "Shipped: =?UTF-8?Q?=E2=80=9CWidget=E2=80=9D?= and more";
        assert_eq!(decode_encoded_words(input), "Shipped: “Widget” and more");
    }

    #[test]
    fn test_unknown_charset_falls_back() {
        let decoded = decode_encoded_words("=?x-made-up?B?SGVsbG8=?=");
        assert_eq!(decoded, "Hello");
    }

    #[test]
    fn test_unsupported_encoding_kept_verbatim() {
        let input = "=?UTF-8?X?abc?= tail";
        let decoded = decode_encoded_words(input);
        assert!(!decoded.is_empty());
        assert!(decoded.contains("abc"));
        assert!(decoded.ends_with("tail"));
    }

    #[test]
    fn test_broken_base64_kept_verbatim() {
        let decoded = decode_encoded_words("=?UTF-8?B?!!!?=");
        assert_eq!(decoded, "=?UTF-8?B?!!!?=");
    }

    #[test]
    fn test_truncated_word_does_not_panic() {
        assert_eq!(decode_encoded_words("Order =?UTF-8?Q?caf"), "Order =?UTF-8?Q?caf");
        assert_eq!(decode_encoded_words("=?UTF-8?Q?a=E"), "=?UTF-8?Q?a=E");
    }

    #[test]
    fn test_latin1_raw_header_bytes() {
        // "Subject: Café" in ISO-8859-1, not valid UTF-8
        let raw = b"Subject: Caf\xe9\n\nbody";
        let headers = HeaderBlock::from_message(raw);
        assert_eq!(headers.decoded("Subject"), "Café");
    }

    #[test]
    fn test_header_block_unfolds_and_ignores_body() {
        let raw = b"Subject: This is a long\r\n\tsubject line\r\nFrom: a@b.com\r\n\r\nSubject: not a header\r\n";
        let headers = HeaderBlock::from_message(raw);
        assert_eq!(headers.decoded("subject"), "This is a long subject line");
        assert_eq!(headers.raw("FROM"), Some("a@b.com"));
        assert_eq!(headers.raw("x-missing"), None);
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"From: a@b.com\nSubject: Hi\n\nBody\n"), Some(25));
        assert_eq!(find_header_end(b"From: a@b.com\r\n\r\nBody"), Some(13));
        assert_eq!(find_header_end(b"no blank line"), None);
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 +0000").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-04");
    }

    #[test]
    fn test_parse_date_with_comment() {
        let dt = parse_date("Fri, 12 Sep 2025 07:31:02 -0700 (PDT)").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2025-09-12 14:31");
    }

    #[test]
    fn test_parse_date_named_tz() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
    }

    #[test]
    fn test_parse_date_without_zone() {
        assert!(parse_date("04 Jan 2024 10:00:00").is_some());
    }

    #[test]
    fn test_parse_date_empty() {
        assert!(parse_date("   ").is_none());
    }
}
