//! Message routing and the per-sender rule parsers.
//!
//! Each [`Rule`] decides from sender and subject whether it applies to a
//! message, then turns the message into a typed record. Rules are pure
//! apart from the optional digest image side effect.

pub mod amazon;
pub mod images;
pub mod usps_delivered;
pub mod usps_digest;

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::UspsConfig;
use crate::error::Result;
use crate::model::message::DecodedMessage;
use crate::state::{Namespace, Value, FLAG_DIGEST_TODAY};

pub use amazon::AmazonRecord;
pub use usps_delivered::DeliveredRecord;
pub use usps_digest::DigestRecord;

/// Settings the rule parsers need beyond the message itself.
#[derive(Debug, Clone, Default)]
pub struct RuleOptions {
    /// Where digest scans are written; `None` disables extraction.
    pub image_dir: Option<PathBuf>,
    pub image_url_prefix: String,
}

impl From<&UspsConfig> for RuleOptions {
    fn from(usps: &UspsConfig) -> Self {
        Self {
            image_dir: usps.image_dir.clone(),
            image_url_prefix: usps.image_url_prefix.clone(),
        }
    }
}

/// A known sender rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Amazon,
    UspsDigest,
    UspsDelivered,
}

impl Rule {
    pub const ALL: [Rule; 3] = [Rule::Amazon, Rule::UspsDigest, Rule::UspsDelivered];

    pub fn name(self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::UspsDigest => "usps_digest",
            Self::UspsDelivered => "usps_delivered",
        }
    }

    /// State namespace the rule writes to.
    pub fn namespace(self) -> Namespace {
        match self {
            Self::Amazon => Namespace::Amazon,
            Self::UspsDigest | Self::UspsDelivered => Namespace::Usps,
        }
    }

    /// Flag set whenever a record of this rule is merged.
    pub fn flag(self) -> &'static str {
        match self {
            Self::Amazon => "got_amazon",
            Self::UspsDigest => "got_usps_digest",
            Self::UspsDelivered => "got_usps_delivered",
        }
    }

    /// Whether the rule applies, judged from sender and subject only.
    pub fn applies_to(self, message: &DecodedMessage) -> bool {
        let sender = message.from.match_key();
        match self {
            Self::Amazon => sender.contains("amazon"),
            Self::UspsDelivered => is_usps(&sender) && is_delivered_subject(&message.subject_lower()),
            Self::UspsDigest => {
                let subject = message.subject_lower();
                is_usps(&sender) && !is_delivered_subject(&subject) && is_digest_subject(&subject)
            }
        }
    }

    /// Run the rule's parser. `Ok(None)` means nothing worth keeping.
    pub fn parse(
        self,
        message: &DecodedMessage,
        options: &RuleOptions,
    ) -> Result<Option<ParsedRecord>> {
        Ok(match self {
            Self::Amazon => amazon::parse(message)?.map(ParsedRecord::Amazon),
            Self::UspsDigest => usps_digest::parse(message, options)?.map(ParsedRecord::UspsDigest),
            Self::UspsDelivered => usps_delivered::parse(message).map(ParsedRecord::UspsDelivered),
        })
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn is_usps(sender: &str) -> bool {
    sender.contains("informeddelivery")
        || sender.contains("usps informed delivery")
        || sender.contains("uspsinformeddelivery@")
        || (sender.contains("usps") && sender.contains("delivery"))
}

fn is_delivered_subject(subject: &str) -> bool {
    let subject = subject.trim();
    subject.contains("your mail was delivered")
        || subject.contains("mail delivery notification")
        || subject.contains("mailpiece delivered")
        || subject.contains("mail piece delivered")
        || subject.starts_with("delivered")
        || subject.ends_with("delivered")
}

fn is_digest_subject(subject: &str) -> bool {
    subject.contains("daily digest")
        || subject.contains("ready to view")
        || subject.contains("informed delivery")
        || subject.contains("coming to you soon")
}

/// Output of one rule for one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ParsedRecord {
    Amazon(AmazonRecord),
    UspsDigest(DigestRecord),
    UspsDelivered(DeliveredRecord),
}

impl ParsedRecord {
    pub fn rule(&self) -> Rule {
        match self {
            Self::Amazon(_) => Rule::Amazon,
            Self::UspsDigest(_) => Rule::UspsDigest,
            Self::UspsDelivered(_) => Rule::UspsDelivered,
        }
    }

    /// Present fields only; absent ones never reach the state.
    pub fn fields(&self) -> Vec<(&'static str, Value)> {
        match self {
            Self::Amazon(r) => r.fields(),
            Self::UspsDigest(r) => r.fields(),
            Self::UspsDelivered(r) => r.fields(),
        }
    }

    /// Flags driven by the record's content, beyond `got_<rule>`.
    pub fn flags(&self) -> Vec<(&'static str, bool)> {
        match self {
            Self::UspsDigest(r) => vec![(FLAG_DIGEST_TODAY, r.is_today())],
            _ => Vec::new(),
        }
    }
}

/// Route one message through every applicable rule.
///
/// With non-blank `sender_filters`, only senders matching one of them are
/// considered. A failing rule is logged and skipped.
pub fn route(
    message: &DecodedMessage,
    sender_filters: &[String],
    options: &RuleOptions,
) -> Vec<ParsedRecord> {
    let filtering = sender_filters.iter().any(|f| !f.trim().is_empty());
    if filtering && !message.from.matches_any(sender_filters) {
        debug!(from = %message.from, "Sender not in filters, skipping");
        return Vec::new();
    }

    let mut records = Vec::new();
    for rule in Rule::ALL.into_iter().filter(|r| r.applies_to(message)) {
        match rule.parse(message, options) {
            Ok(Some(record)) => {
                debug!(rule = rule.name(), subject = %message.subject, "Rule matched");
                records.push(record);
            }
            Ok(None) => debug!(rule = rule.name(), subject = %message.subject, "Rule found nothing"),
            Err(e) => warn!(
                rule = rule.name(),
                subject = %message.subject,
                error = %e,
                "Rule failed, skipping message"
            ),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::address::EmailAddress;

    fn message(from: &str, subject: &str, text: &str) -> DecodedMessage {
        DecodedMessage {
            from: EmailAddress::parse(from),
            subject: subject.to_string(),
            text: text.to_string(),
            ..DecodedMessage::default()
        }
    }

    fn usps(subject: &str) -> DecodedMessage {
        message(
            "USPS Informed Delivery <USPSInformedDelivery@email.informeddelivery.usps.com>",
            subject,
            "2 pieces of mail",
        )
    }

    #[test]
    fn test_amazon_classification() {
        let msg = message("Amazon.com <shipment-tracking@amazon.com>", "Shipped", "");
        assert!(Rule::Amazon.applies_to(&msg));
        assert!(!Rule::UspsDigest.applies_to(&msg));
        assert!(!Rule::UspsDelivered.applies_to(&msg));
    }

    #[test]
    fn test_usps_delivered_wins_over_digest() {
        let msg = usps("Your Mail Was Delivered Fri, Sep 12 - Informed Delivery");
        assert!(Rule::UspsDelivered.applies_to(&msg));
        assert!(!Rule::UspsDigest.applies_to(&msg));
    }

    #[test]
    fn test_usps_digest_subjects() {
        for subject in [
            "Your Daily Digest for Fri, 9/12 is ready to view",
            "USPS Informed Delivery",
            "Mail is coming to you soon",
        ] {
            assert!(Rule::UspsDigest.applies_to(&usps(subject)), "{subject}");
        }
        assert!(!Rule::UspsDigest.applies_to(&usps("Update your preferences")));
    }

    #[test]
    fn test_usps_sender_variants() {
        let msg = message("usps.delivery@example.com", "Mailpiece delivered", "");
        assert!(Rule::UspsDelivered.applies_to(&msg));
        let msg = message("alerts@usps.com", "Mailpiece delivered", "");
        assert!(!Rule::UspsDelivered.applies_to(&msg));
    }

    #[test]
    fn test_route_respects_sender_filters() {
        let msg = message(
            "Amazon.com <shipment-tracking@amazon.com>",
            "Shipped: Order 111-2222222-3333333",
            "",
        );
        let options = RuleOptions::default();
        assert_eq!(route(&msg, &["usps".to_string()], &options), Vec::new());

        let records = route(&msg, &["AMAZON".to_string()], &options);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rule(), Rule::Amazon);
    }

    #[test]
    fn test_blank_filters_route_everything() {
        let msg = message(
            "Amazon.com <shipment-tracking@amazon.com>",
            "Shipped: Order 111-2222222-3333333",
            "",
        );
        let filters = vec![" ".to_string(), String::new()];
        assert_eq!(route(&msg, &filters, &RuleOptions::default()).len(), 1);
    }

    #[test]
    fn test_route_skips_failing_rule() {
        let mut msg = usps("Your Daily Digest");
        msg.text.clear();
        assert!(route(&msg, &[], &RuleOptions::default()).is_empty());
    }

    #[test]
    fn test_unknown_sender_routes_nothing() {
        let msg = message("news@example.com", "Delivered: weekly newsletter", "");
        assert!(route(&msg, &[], &RuleOptions::default()).is_empty());
    }

    #[test]
    fn test_record_serializes_with_rule_tag() {
        let record = ParsedRecord::UspsDelivered(DeliveredRecord::default());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["rule"], "usps_delivered");
    }
}
