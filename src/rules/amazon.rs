//! Amazon order and shipment notifications.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::error::{MailError, Result};
use crate::model::message::DecodedMessage;
use crate::parser::mime::{decode_entities, strip_tags};
use crate::state::Value;

/// Shipment lifecycle event, ordered from least to most terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DeliveryEvent {
    Ordered,
    Shipped,
    OutForDelivery,
    Delivered,
}

impl DeliveryEvent {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ordered => "Ordered",
            Self::Shipped => "Shipped",
            Self::OutForDelivery => "Out for delivery",
            Self::Delivered => "Delivered",
        }
    }
}

impl std::fmt::Display for DeliveryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

static RE_ORDERED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*ordered:|\b(?:order confirmed|order confirmation|order placed|we['’]ve received your order|your order has been placed)\b",
    )
    .unwrap()
});
static RE_SHIPPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bshipped\b").unwrap());
static RE_OUT_FOR_DELIVERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bout for delivery\b").unwrap());
static RE_DELIVERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bdelivered\b").unwrap());

/// Visible card headline. Bare words only count when capitalized.
static RE_HEADLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:your package was delivered!?|delivered today|out for delivery|your (?:order|package) has shipped|order confirmed|order placed|we['’]ve received your order)|\b(?:Delivered|Shipped|Ordered)\b",
    )
    .unwrap()
});

static RE_ORDER_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{3}-\d{7}-\d{7})\b").unwrap());

static RE_TRACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https?://www\.amazon\.com/progress-tracker/package[^\s<>"']+"#).unwrap()
});

static RE_ETA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(Arriving|Delivery estimate|Estimated delivery|Arrives)\s*:?\s*(Today|Tomorrow|[A-Z][a-z]{2,9}\s+\d{1,2}(?:,\s*\d{4})?)",
    )
    .unwrap()
});

static RE_ITEM_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*\*\s+(.+)$").unwrap());
static RE_QUANTITY_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}Quantity:.*$").unwrap());

static RE_ITEM_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<a[^>]+href="https?://www\.amazon\.com/(?:dp|gp/product)/[^"]+"[^>]*>([^<]{2,300})</a>"#,
    )
    .unwrap()
});
static RE_ITEM_LI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<li[^>]*>\s*([^<]{2,200})\s*</li>").unwrap());
static RE_SUBJECT_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“]([^"”]{2,200})["”]"#).unwrap());

/// Facts extracted from one Amazon notification. `None` means absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AmazonRecord {
    pub subject: Option<String>,
    pub headline: Option<String>,
    pub event: Option<DeliveryEvent>,
    pub items: Vec<String>,
    pub track_url: Option<String>,
    pub order_id: Option<String>,
    pub shipment_id: Option<String>,
    pub package_index: Option<String>,
    pub eta: Option<String>,
}

impl AmazonRecord {
    /// Present fields as state entries.
    pub fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        let texts = [
            ("subject", &self.subject),
            ("headline", &self.headline),
            ("track_url", &self.track_url),
            ("order_id", &self.order_id),
            ("shipment_id", &self.shipment_id),
            ("package_index", &self.package_index),
            ("eta", &self.eta),
        ];
        for (key, value) in texts {
            if let Some(v) = value {
                out.push((key, Value::from(v.as_str())));
            }
        }
        if let Some(event) = self.event {
            out.push(("event", Value::from(event.label())));
        }
        if !self.items.is_empty() {
            out.push(("items", Value::List(self.items.clone())));
        }
        if let Some(entry) = self.history_entry() {
            out.push(("events", Value::List(vec![entry])));
        }
        out
    }

    /// `"<event> <order_id>"` when both are known.
    pub fn history_entry(&self) -> Option<String> {
        match (self.event, &self.order_id) {
            (Some(event), Some(order_id)) => Some(format!("{} {}", event.label(), order_id)),
            _ => None,
        }
    }

    fn has_facts(&self) -> bool {
        self.event.is_some()
            || self.order_id.is_some()
            || self.track_url.is_some()
            || self.eta.is_some()
            || !self.items.is_empty()
    }
}

/// Parse an Amazon notification.
///
/// Returns `Ok(None)` when the message carries no delivery facts at all.
pub fn parse(message: &DecodedMessage) -> Result<Option<AmazonRecord>> {
    if message.subject.trim().is_empty()
        && message.text.trim().is_empty()
        && message.html.trim().is_empty()
    {
        return Err(MailError::Parse {
            rule: "amazon",
            reason: "message has neither subject nor body".into(),
        });
    }

    let flat_html = strip_tags(&message.html);
    let headline = RE_HEADLINE
        .find(&flat_html)
        .map(|m| m.as_str().trim().to_string());

    let event = detect_event(&message.subject)
        .or_else(|| headline_event(&flat_html))
        .or_else(|| headline_event(&message.text));

    let track_url = RE_TRACK
        .find(&message.text)
        .or_else(|| RE_TRACK.find(&message.html))
        .map(|m| m.as_str().replace("&amp;", "&"));
    let tracker = track_url.as_deref().map(tracker_params).unwrap_or_default();

    let order_id = first_order_id(&message.subject)
        .or_else(|| first_order_id(&message.text))
        .or_else(|| first_order_id(&flat_html))
        .or(tracker.order_id);

    let eta = RE_ETA
        .captures(&message.text)
        .or_else(|| RE_ETA.captures(&flat_html))
        .map(|caps| format!("{} {}", caps[1].trim(), caps[2].trim()));

    let subject = non_empty(message.subject.trim()).or_else(|| headline.clone());

    let record = AmazonRecord {
        subject,
        headline,
        event,
        items: extract_items(message),
        track_url,
        order_id,
        shipment_id: tracker.shipment_id,
        package_index: tracker.package_index,
        eta,
    };

    Ok(record.has_facts().then_some(record))
}

/// Most terminal event keyword present in `text`.
pub fn detect_event(text: &str) -> Option<DeliveryEvent> {
    [
        (DeliveryEvent::Delivered, &*RE_DELIVERED),
        (DeliveryEvent::OutForDelivery, &*RE_OUT_FOR_DELIVERY),
        (DeliveryEvent::Shipped, &*RE_SHIPPED),
        (DeliveryEvent::Ordered, &*RE_ORDERED),
    ]
    .into_iter()
    .find(|(_, re)| re.is_match(text))
    .map(|(event, _)| event)
}

fn headline_event(text: &str) -> Option<DeliveryEvent> {
    RE_HEADLINE
        .find_iter(text)
        .filter_map(|m| {
            let headline = m.as_str();
            detect_event(headline)
                .or_else(|| {
                    headline
                        .eq_ignore_ascii_case("ordered")
                        .then_some(DeliveryEvent::Ordered)
                })
        })
        .max()
}

fn first_order_id(text: &str) -> Option<String> {
    RE_ORDER_ID.captures(text).map(|caps| caps[1].to_string())
}

#[derive(Debug, Default)]
struct TrackerParams {
    order_id: Option<String>,
    shipment_id: Option<String>,
    package_index: Option<String>,
}

fn tracker_params(track_url: &str) -> TrackerParams {
    let mut params = TrackerParams::default();
    let Ok(url) = Url::parse(track_url) else {
        tracing::debug!(url = track_url, "Unparseable tracker URL");
        return params;
    };
    for (key, value) in url.query_pairs() {
        let slot = match key.as_ref() {
            "orderId" => &mut params.order_id,
            "shipmentId" => &mut params.shipment_id,
            "packageIndex" => &mut params.package_index,
            _ => continue,
        };
        if slot.is_none() {
            *slot = non_empty(&value);
        }
    }
    params
}

/// Item titles: text bullets, else product links, else `<li>`, else the quoted subject title.
fn extract_items(message: &DecodedMessage) -> Vec<String> {
    let bullets: Vec<String> = RE_ITEM_BULLET
        .captures_iter(&message.text)
        .map(|caps| RE_QUANTITY_TAIL.replace(&caps[1], "").into_owned())
        .collect();
    if let Some(items) = dedup_items(bullets) {
        return items;
    }

    let links = RE_ITEM_LINK
        .captures_iter(&message.html)
        .map(|caps| caps[1].to_string())
        .collect();
    if let Some(items) = dedup_items(links) {
        return items;
    }

    let list_items = RE_ITEM_LI
        .captures_iter(&message.html)
        .map(|caps| caps[1].to_string())
        .collect();
    if let Some(items) = dedup_items(list_items) {
        return items;
    }

    RE_SUBJECT_TITLE
        .captures(&message.subject)
        .and_then(|caps| dedup_items(vec![caps[1].to_string()]))
        .unwrap_or_default()
}

fn dedup_items(raw: Vec<String>) -> Option<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for item in raw {
        let item = decode_entities(&item)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    (!out.is_empty()).then_some(out)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
