//! USPS Informed Delivery "Daily Digest".
//!
//! Digest templates vary a lot, so every fact has a chain of fallbacks:
//! structured HTML ids first, then visible phrases, then loose counting.
//! Sender names only come from explicit `FROM:` markers (colon required),
//! which keeps phrases like "Awaiting From Sender" out of the name lists.

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{MailError, Result};
use crate::model::message::DecodedMessage;
use crate::parser::mime::html_to_text;
use crate::state::Value;

use super::images::{self, MailImages};
use super::RuleOptions;

pub const DASHBOARD_URL: &str = "https://informeddelivery.usps.com/portal/dashboard";

/// Placeholder for a mailpiece whose sender is unknown.
pub const UNKNOWN_SENDER: &str = "Envelope";

const MAX_MAIL_FROM: usize = 10;
const MAX_PKGS_FROM: usize = 10;
const MAX_BUCKET_NAMES: usize = 5;
const MAX_SEGMENT_CHARS: usize = 200;

const BRAND_NAMES: [&str; 5] = [
    "USPS",
    "USPS INFORMED DELIVERY",
    "UNITED STATES POSTAL SERVICE",
    "INFORMED DELIVERY",
    "U.S. POSTAL SERVICE",
];

/// Bucket sections, in the order they usually appear.
pub const BUCKETS: [(&str, &str); 4] = [
    ("expected_today", r"(?i)Expected\s+Today"),
    ("expected_1_2_days", r"(?i)Expected\s+1\s*[-–—]\s*2\s+Days"),
    ("awaiting_from_sender", r"(?i)Awaiting\s+From\s+Sender"),
    ("outbound", r"(?i)\bOutbound\b"),
];

static RE_SECTIONS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    BUCKETS
        .iter()
        .map(|(key, pattern)| (*key, Regex::new(pattern).unwrap()))
        .collect()
});

static RE_MAIL_COUNTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)id="(?:bg-total-mailpieces|total-mailpieces[^"]*)"\s*>\s*(\d+)"#).unwrap()
});
static RE_PKG_COUNTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)id="(?:bg-total-packages|total-packages[^"]*)"\s*>\s*(\d+)"#).unwrap()
});
static RE_MAIL_EXPECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bMail(?:pieces)?\s+Expected\s+Today\b[^0-9]{0,20}(\d+)").unwrap()
});
static RE_PKG_EXPECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bPackages?\s+Expected\s+Today\b[^0-9]{0,20}(\d+)").unwrap()
});
static RE_MAIL_PIECES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+(?:pieces?\s+of\s+mail|mail\s*pieces?)\b").unwrap()
});
static RE_PACKAGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s+packages?\b").unwrap());

static RE_FROM_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFROM\s*[:：]\s*").unwrap());
static RE_PACKAGE_NOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\(\s*packages?\s*\)").unwrap());
static RE_CORP_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:inc|llc|l\.l\.c|ltd|co|corp|plc)\.?$").unwrap());

static RE_MAIL_FROM_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)id=["']campaign-from-span-id["'][^>]*>\s*([^<>\r\n]+)"#).unwrap()
});
static RE_SHIPPER_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)id=["']pra-shipper-name-id["'][^>]*>\s*([^<>\r\n]+)"#).unwrap()
});

static RE_ITEM_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s*item(?:s|\(s\))?").unwrap());
static RE_TRACKING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b9\d{15,}\b").unwrap());

// Label cleanup, applied in order.
static RE_LABEL_TAILS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\bLearn more about your mail\b|\bOutbound\b|\b\d+\s*item(?:s|\(s\))?|\bExpected\s+Today\b|\bExpected\s+1\s*[-–—]\s*2\s+Days\b|\bAwaiting\s+From\s+Sender\b).*$",
    )
    .unwrap()
});
static RE_DIGIT_BLOB: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{6,}").unwrap());
static RE_TRAILING_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFROM\s*$").unwrap());
static RE_TRAILING_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[•–—\-:;,]+\s*$").unwrap());

/// One delivery bucket of the digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Bucket {
    pub count: i64,
    pub from: Vec<String>,
}

impl Bucket {
    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("count".to_string(), Value::Int(self.count));
        map.insert("from".to_string(), Value::List(self.from.clone()));
        Value::Map(map)
    }
}

/// Facts extracted from one digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DigestRecord {
    pub subject: String,
    pub digest_date: Option<NaiveDate>,
    pub mail_expected: Option<i64>,
    pub pkgs_expected: Option<i64>,
    /// Not de-duplicated: one entry per mailpiece.
    pub mail_from: Vec<String>,
    pub pkgs_from: Vec<String>,
    /// Only the sections present in the digest.
    pub buckets: BTreeMap<&'static str, Bucket>,
    pub mail_images: Option<MailImages>,
}

impl DigestRecord {
    /// Present fields as state entries.
    pub fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut out = vec![
            ("type", Value::from("digest")),
            ("dashboard_url", Value::from(DASHBOARD_URL)),
        ];
        if !self.subject.is_empty() {
            out.push(("subject", Value::from(self.subject.as_str())));
            out.push(("subject_digest", Value::from(self.subject.as_str())));
        }
        if let Some(date) = self.digest_date {
            out.push(("digest_date", Value::from(date.to_string())));
        }
        if let Some(n) = self.mail_expected {
            out.push(("mail_expected", Value::Int(n)));
        }
        if let Some(n) = self.pkgs_expected {
            out.push(("pkgs_expected", Value::Int(n)));
        }
        // A counted digest owns its sender lists, even when they are empty.
        if self.mail_expected.is_some() || !self.mail_from.is_empty() {
            out.push(("mail_from", Value::List(self.mail_from.clone())));
        }
        if self.pkgs_expected.is_some() || !self.pkgs_from.is_empty() {
            out.push(("pkgs_from", Value::List(self.pkgs_from.clone())));
        }
        if !self.buckets.is_empty() {
            let buckets = self
                .buckets
                .iter()
                .map(|(key, bucket)| (key.to_string(), bucket.to_value()))
                .collect();
            out.push(("buckets", Value::Map(buckets)));
        }
        if let Some(images) = &self.mail_images {
            out.push(("mail_images", images.to_value()));
            out.push(("images", Value::List(images.urls.clone())));
        }
        out
    }

    /// Whether the digest is dated `today`.
    pub fn is_for(&self, today: NaiveDate) -> bool {
        self.digest_date == Some(today)
    }

    pub fn is_today(&self) -> bool {
        self.is_for(Local::now().date_naive())
    }
}

/// A sender name found after a `FROM:` marker.
#[derive(Debug, Clone, PartialEq)]
struct SenderEntry {
    name: String,
    /// Annotated `(package)` / `(packages)`.
    package: bool,
    /// Byte offset of the marker in the body.
    offset: usize,
}

#[derive(Debug, Clone)]
struct Section {
    key: &'static str,
    range: Range<usize>,
}

/// Parse a digest; images are written as a side effect when configured.
pub fn parse(message: &DecodedMessage, options: &RuleOptions) -> Result<Option<DigestRecord>> {
    if message.text.trim().is_empty() && message.html.trim().is_empty() {
        return Err(MailError::Parse {
            rule: "usps_digest",
            reason: "digest has no body".into(),
        });
    }

    let body = if message.html.trim().is_empty() {
        message.text.clone()
    } else {
        html_to_text(&message.html)
    };

    let sections = split_sections(&body);
    let entries = sender_entries(&body);

    let mut buckets: BTreeMap<&'static str, Bucket> = BTreeMap::new();
    for section in &sections {
        let bucket = buckets.entry(section.key).or_default();
        let segment = &body[section.range.clone()];
        let seg_entries: Vec<&SenderEntry> = entries
            .iter()
            .filter(|e| section.range.contains(&e.offset))
            .collect();
        merge_bucket(bucket, segment, &seg_entries);
    }

    let pkgs_from = package_senders(&message.html, &entries, &sections);
    let mut mail_from = mail_senders(&message.html, &entries, &pkgs_from);

    if let Some(awaiting) = buckets.get_mut("awaiting_from_sender") {
        let wanted = (awaiting.count.max(0) as usize).min(MAX_BUCKET_NAMES);
        for name in &pkgs_from {
            if awaiting.from.len() >= wanted {
                break;
            }
            if !awaiting.from.contains(name) {
                awaiting.from.push(name.clone());
            }
        }
    }

    let mail_expected = first_count(&RE_MAIL_COUNTER, &message.html)
        .or_else(|| first_count(&RE_MAIL_EXPECTED, &body))
        .or_else(|| first_count(&RE_MAIL_PIECES, &body))
        .or_else(|| (!mail_from.is_empty()).then(|| mail_from.len() as i64));

    let pkgs_expected = first_count(&RE_PKG_COUNTER, &message.html)
        .or_else(|| first_count(&RE_PKG_EXPECTED, &body))
        .or_else(|| first_count(&RE_PACKAGES, &body))
        .or_else(|| (!buckets.is_empty()).then(|| buckets.values().map(|b| b.count).sum()));

    if let Some(expected) = mail_expected {
        let expected = (expected.max(0) as usize).min(MAX_MAIL_FROM);
        if expected > mail_from.len() {
            mail_from.resize(expected, UNKNOWN_SENDER.to_string());
        }
    }

    let mail_images = images::save_mail_images(message, &mail_from, options);

    let record = DigestRecord {
        subject: message.subject.trim().to_string(),
        digest_date: message.date.map(|d| d.with_timezone(&Local).date_naive()),
        mail_expected,
        pkgs_expected,
        mail_from,
        pkgs_from,
        buckets,
        mail_images,
    };

    let has_facts = record.mail_expected.is_some()
        || record.pkgs_expected.is_some()
        || !record.buckets.is_empty()
        || record.mail_images.is_some();
    Ok(has_facts.then_some(record))
}

fn first_count(re: &Regex, haystack: &str) -> Option<i64> {
    re.captures(haystack).and_then(|caps| caps[1].parse().ok())
}

/// Locate bucket headers; each section runs to the next header.
fn split_sections(body: &str) -> Vec<Section> {
    let mut hits: Vec<(usize, &'static str)> = RE_SECTIONS
        .iter()
        .flat_map(|(key, re)| re.find_iter(body).map(move |m| (m.start(), *key)))
        .collect();
    hits.sort_unstable();
    hits.dedup_by_key(|(start, _)| *start);

    hits.iter()
        .enumerate()
        .map(|(i, (start, key))| Section {
            key: *key,
            range: *start..hits.get(i + 1).map_or(body.len(), |(next, _)| *next),
        })
        .collect()
}

/// Count and sample names of one section: `N item(s)`, else unique names,
/// else tracking-number-like tokens.
fn merge_bucket(bucket: &mut Bucket, segment: &str, entries: &[&SenderEntry]) {
    let names = dedup(entries.iter().map(|e| e.name.clone()));
    let count = match first_count(&RE_ITEM_COUNT, segment) {
        Some(n) => n,
        None if !names.is_empty() => names.len() as i64,
        None => RE_TRACKING.find_iter(segment).count() as i64,
    };
    bucket.count += count;
    for name in names {
        if bucket.from.len() < MAX_BUCKET_NAMES && !bucket.from.contains(&name) {
            bucket.from.push(name);
        }
    }
}

/// Every name listed after a `FROM:` marker, in body order.
fn sender_entries(body: &str) -> Vec<SenderEntry> {
    let markers: Vec<_> = RE_FROM_MARKER.find_iter(body).collect();
    let mut entries = Vec::new();

    for (i, marker) in markers.iter().enumerate() {
        let end = markers.get(i + 1).map_or(body.len(), |next| next.start());
        let segment: String = body[marker.end()..end]
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(MAX_SEGMENT_CHARS)
            .collect();

        let mut found: Vec<SenderEntry> = Vec::new();
        for piece in segment.split(',') {
            let package = RE_PACKAGE_NOTE.is_match(piece);
            let name = clean_label(&RE_PACKAGE_NOTE.replace_all(piece, ""));
            if name.is_empty() {
                continue;
            }
            if RE_CORP_SUFFIX.is_match(&name) {
                if let Some(prev) = found.last_mut() {
                    prev.name = format!("{}, {}", prev.name, name);
                    prev.package |= package;
                    continue;
                }
            }
            found.push(SenderEntry {
                name,
                package,
                offset: marker.start(),
            });
        }
        entries.extend(found);
    }
    entries
}

/// Letter senders: campaign spans, else `FROM:` names that are not packages.
fn mail_senders(html: &str, entries: &[SenderEntry], pkgs_from: &[String]) -> Vec<String> {
    let spans: Vec<String> = RE_MAIL_FROM_SPAN
        .captures_iter(html)
        .map(|caps| clean_label(&caps[1]))
        .filter(|name| !name.is_empty())
        .collect();

    let names = if spans.is_empty() {
        entries
            .iter()
            .filter(|e| !e.package && !pkgs_from.contains(&e.name))
            .map(|e| e.name.clone())
            .collect()
    } else {
        spans
    };

    names
        .into_iter()
        .filter(|name| !is_brand(name))
        .take(MAX_MAIL_FROM)
        .collect()
}

/// Package senders: shipper spans, else annotated names, else names in bucket sections.
fn package_senders(html: &str, entries: &[SenderEntry], sections: &[Section]) -> Vec<String> {
    let spans: Vec<String> = RE_SHIPPER_SPAN
        .captures_iter(html)
        .map(|caps| clean_label(&caps[1]))
        .collect();
    let mut names = dedup(spans);

    if names.is_empty() {
        names = dedup(entries.iter().filter(|e| e.package).map(|e| e.name.clone()));
    }
    if names.is_empty() {
        names = dedup(
            entries
                .iter()
                .filter(|e| sections.iter().any(|s| s.range.contains(&e.offset)))
                .map(|e| e.name.clone()),
        );
    }
    names.truncate(MAX_PKGS_FROM);
    names
}

fn is_brand(name: &str) -> bool {
    let upper = name.to_uppercase();
    BRAND_NAMES.contains(&upper.as_str())
}

fn dedup(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Normalize a sender label: promo tails, tracking blobs and stray
/// punctuation removed, ALL-CAPS converted to title case.
pub fn clean_label(raw: &str) -> String {
    let label = RE_FROM_MARKER.replace(raw.trim(), "");
    let label = RE_LABEL_TAILS.replace(&label, "");
    let label = RE_DIGIT_BLOB.replace_all(&label, "");
    let label = label.trim();
    let label = RE_TRAILING_FROM.replace(label, "");
    let label = RE_TRAILING_PUNCT.replace(label.trim(), "");
    let label = label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == ' ' || c == ',')
        .to_string();
    smart_case(&label)
}

/// Title-case a label written entirely in capitals; leave mixed case alone.
fn smart_case(s: &str) -> String {
    let has_upper = s.chars().any(char::is_uppercase);
    let has_lower = s.chars().any(char::is_lowercase);
    if !has_upper || has_lower {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for ch in s.chars() {
        if prev_alpha {
            out.extend(ch.to_lowercase());
        } else {
            out.extend(ch.to_uppercase());
        }
        prev_alpha = ch.is_alphabetic();
    }
    out
}
