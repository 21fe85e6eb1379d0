//! Mailpiece scan extraction for USPS digests.
//!
//! Digest HTML references the scans as `cid:` images. The matching inline
//! parts are written to the configured directory; a write failure is logged
//! and never fails the parse.

use std::collections::BTreeMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::message::DecodedMessage;
use crate::state::Value;

use super::RuleOptions;

static RE_CAMPAIGN_IMG_CID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)id=["']campaign-representative-image-src-id["'][^>]+src=["']cid:([^"']+)"#,
    )
    .unwrap()
});
static RE_MAILPIECE_IMG_CID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)id=["']mailpiece-div-id["'].*?src=["']cid:([^"']+)"#).unwrap()
});
static RE_ANY_IMG_CID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)src=["']cid:([^"']+)"#).unwrap());

/// Scans written for one digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MailImages {
    /// Absolute paths of the written files.
    pub files: Vec<String>,
    /// `<image_url_prefix>/<file name>` for each written file.
    pub urls: Vec<String>,
}

impl MailImages {
    pub fn count(&self) -> usize {
        self.files.len()
    }

    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("count".to_string(), Value::Int(self.count() as i64));
        map.insert("files".to_string(), Value::List(self.files.clone()));
        map.insert("urls".to_string(), Value::List(self.urls.clone()));
        Value::Map(map)
    }
}

/// Content ids of mailpiece scans, in document order.
///
/// Tagged scan blocks win; otherwise every `cid:` image in the HTML counts.
pub fn mailpiece_cids(html: &str) -> Vec<String> {
    let mut cids = Vec::new();
    for re in [&*RE_CAMPAIGN_IMG_CID, &*RE_MAILPIECE_IMG_CID] {
        for caps in re.captures_iter(html) {
            push_unique(&mut cids, caps[1].trim());
        }
    }
    if cids.is_empty() {
        for caps in RE_ANY_IMG_CID.captures_iter(html) {
            push_unique(&mut cids, caps[1].trim());
        }
    }
    cids
}

fn push_unique(cids: &mut Vec<String>, cid: &str) {
    if !cid.is_empty() && !cids.iter().any(|c| c == cid) {
        cids.push(cid.to_string());
    }
}

/// Write the digest's scans; `None` when disabled or nothing to write.
///
/// The N-th scan is named after the N-th mail sender, or `mail` past the end.
pub fn save_mail_images(
    message: &DecodedMessage,
    mail_from: &[String],
    options: &RuleOptions,
) -> Option<MailImages> {
    let dir = options.image_dir.as_deref()?;
    let cids = mailpiece_cids(&message.html);
    if cids.is_empty() {
        return None;
    }

    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "Cannot create image directory");
        return Some(MailImages::default());
    }

    let date_tag = message
        .date
        .unwrap_or_else(Utc::now)
        .format("%Y%m%d_%H%M%S")
        .to_string();

    let mut images = MailImages::default();
    for (idx, cid) in cids.iter().enumerate() {
        let Some(part) = message
            .attachment_by_cid(cid)
            .filter(|a| a.is_image() && !a.data.is_empty())
        else {
            debug!(cid = %cid, "No inline image for content id");
            continue;
        };

        let sender = mail_from.get(idx).map(String::as_str).unwrap_or("mail");
        let file_name = format!(
            "usps_{date_tag}_{:02}_{}{}",
            idx + 1,
            sanitize_filename_part(sender, 64),
            part.extension()
        );
        let path = dir.join(&file_name);
        match std::fs::write(&path, &part.data) {
            Ok(()) => {
                images.files.push(path.display().to_string());
                images.urls.push(format!(
                    "{}/{}",
                    options.image_url_prefix.trim_end_matches('/'),
                    file_name
                ));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write mail scan"),
        }
    }

    debug!(written = images.count(), found = cids.len(), "Saved mail scans");
    Some(images)
}

/// Make a string safe for use as part of a file name.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '+' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        "mailpiece".to_string()
    } else {
        sanitized
    }
}
