//! USPS "Your Mail Was Delivered" notifications.

use chrono::{Datelike, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::model::message::DecodedMessage;
use crate::state::Value;

use super::usps_digest::DASHBOARD_URL;

static RE_SUBJECT_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Your Mail Was Delivered\s+\w+,\s+([A-Za-z]{3})[a-z]*\.?\s+(\d{1,2})").unwrap()
});
static RE_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2}:\d{2})\s*([AP])\.?M\.?").unwrap());
static RE_OUT_FOR_DELIVERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bout for delivery\b").unwrap());
static RE_DELIVERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bdelivered\b").unwrap());

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Delivery status reported by the notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryStatus {
    OutForDelivery,
    Delivered,
}

impl DeliveryStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::OutForDelivery => "Out for Delivery",
            Self::Delivered => "Delivered",
        }
    }
}

/// Facts extracted from one delivered notice.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveredRecord {
    pub subject: String,
    pub date: Option<NaiveDate>,
    /// e.g. `"7:42 AM"`.
    pub time: Option<String>,
    pub status: Option<DeliveryStatus>,
}

impl DeliveredRecord {
    /// Friendly label such as `"today, September 12!"`.
    pub fn label(&self) -> Option<String> {
        self.date.map(|date| {
            format!("today, {} {}!", MONTHS[date.month0() as usize], date.day())
        })
    }

    /// Present fields as state entries.
    pub fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut out = vec![
            ("type", Value::from("delivered")),
            ("dashboard_url", Value::from(DASHBOARD_URL)),
        ];
        if !self.subject.is_empty() {
            out.push(("subject", Value::from(self.subject.as_str())));
            out.push(("subject_delivered", Value::from(self.subject.as_str())));
        }
        if let Some(date) = self.date {
            out.push(("last_delivered_date", Value::from(date.to_string())));
            out.push(("delivered_history", Value::List(vec![date.to_string()])));
        }
        if let Some(label) = self.label() {
            out.push(("last_delivered_label", Value::from(label)));
        }
        if let Some(time) = &self.time {
            out.push(("last_delivered_time", Value::from(time.as_str())));
        }
        if let Some(status) = self.status {
            out.push(("last_delivered_status", Value::from(status.label())));
        }
        out
    }
}

/// Parse a delivered notice. `None` when neither a date nor a status is found.
pub fn parse(message: &DecodedMessage) -> Option<DeliveredRecord> {
    let reference = message
        .date
        .map(|d| d.with_timezone(&Local).date_naive())
        .unwrap_or_else(|| Local::now().date_naive());

    let record = DeliveredRecord {
        subject: message.subject.trim().to_string(),
        date: subject_date(&message.subject, reference),
        time: RE_TIME
            .captures(&message.text)
            .map(|caps| format!("{} {}M", &caps[1], caps[2].to_ascii_uppercase())),
        status: detect_status(&message.subject).or_else(|| detect_status(&message.text)),
    };

    (record.date.is_some() || record.status.is_some()).then_some(record)
}

/// Delivery date from the subject, dated in the year of `reference`.
///
/// A date that would land after `reference` belongs to the previous year
/// (a December notice read in January).
pub fn subject_date(subject: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let caps = RE_SUBJECT_DATE.captures(subject)?;
    let month = month_number(&caps[1])?;
    let day: u32 = caps[2].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(reference.year(), month, day)?;
    if date > reference + chrono::Duration::days(1) {
        NaiveDate::from_ymd_opt(reference.year() - 1, month, day)
    } else {
        Some(date)
    }
}

fn month_number(abbr: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|name| name[..3].eq_ignore_ascii_case(abbr))
        .map(|i| i as u32 + 1)
}

fn detect_status(text: &str) -> Option<DeliveryStatus> {
    if RE_DELIVERED.is_match(text) {
        Some(DeliveryStatus::Delivered)
    } else if RE_OUT_FOR_DELIVERY.is_match(text) {
        Some(DeliveryStatus::OutForDelivery)
    } else {
        None
    }
}
