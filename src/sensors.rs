//! Sensor registry: how state fields are presented to consumers.
//!
//! Every sensor reads one primary field and optionally a few attribute
//! fields from the same namespace. Absent fields render as an empty string
//! or zero, never as an error.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use crate::state::{Namespace, State, Value};

/// How the primary field becomes the sensor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    /// Text as-is, `""` when absent.
    Text,
    /// Integer, `0` when absent.
    Count,
    /// First three list entries joined with `", "`.
    ListSummary,
    /// `"Today:N | Awaiting:M"` from the digest buckets.
    BucketSummary,
    /// Number of written scans.
    ImageCount,
    /// Delivery date, falling back to the friendly label.
    LastDelivered,
}

/// One presented sensor.
#[derive(Debug, Clone, Copy)]
pub struct SensorDescriptor {
    pub namespace: Namespace,
    /// Primary field; also the second half of the unique id.
    pub field: &'static str,
    pub name: &'static str,
    pub render: Render,
    /// Extra fields exposed as attributes.
    pub attributes: &'static [&'static str],
}

/// Rendered sensor, ready for JSON output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub unique_id: String,
    pub name: String,
    pub state: serde_json::Value,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

pub const SENSORS: &[SensorDescriptor] = &[
    SensorDescriptor {
        namespace: Namespace::Amazon,
        field: "subject",
        name: "Amazon Subject",
        render: Render::Text,
        attributes: &["track_url"],
    },
    SensorDescriptor {
        namespace: Namespace::Amazon,
        field: "event",
        name: "Amazon Last Event",
        render: Render::Text,
        attributes: &["eta", "track_url", "events"],
    },
    SensorDescriptor {
        namespace: Namespace::Amazon,
        field: "items",
        name: "Amazon Items",
        render: Render::ListSummary,
        attributes: &["items"],
    },
    SensorDescriptor {
        namespace: Namespace::Amazon,
        field: "track_url",
        name: "Amazon Track URL",
        render: Render::Text,
        attributes: &[],
    },
    SensorDescriptor {
        namespace: Namespace::Amazon,
        field: "order_id",
        name: "Amazon Order ID",
        render: Render::Text,
        attributes: &[],
    },
    SensorDescriptor {
        namespace: Namespace::Amazon,
        field: "shipment_id",
        name: "Amazon Shipment ID",
        render: Render::Text,
        attributes: &[],
    },
    SensorDescriptor {
        namespace: Namespace::Amazon,
        field: "package_index",
        name: "Amazon Package Index",
        render: Render::Text,
        attributes: &[],
    },
    SensorDescriptor {
        namespace: Namespace::Amazon,
        field: "eta",
        name: "Amazon ETA",
        render: Render::Text,
        attributes: &[],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "subject",
        name: "USPS Subject",
        render: Render::Text,
        attributes: &["type", "dashboard_url"],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "subject_digest",
        name: "USPS Digest Subject",
        render: Render::Text,
        attributes: &["digest_date", "dashboard_url"],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "subject_delivered",
        name: "USPS Delivered Subject",
        render: Render::Text,
        attributes: &["last_delivered_label", "dashboard_url"],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "mail_expected",
        name: "USPS Mailpieces Expected Today",
        render: Render::Count,
        attributes: &[],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "pkgs_expected",
        name: "USPS Packages Expected Today",
        render: Render::Count,
        attributes: &[],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "mail_from",
        name: "USPS Mail From",
        render: Render::ListSummary,
        attributes: &["mail_from", "dashboard_url"],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "pkgs_from",
        name: "USPS Packages From",
        render: Render::ListSummary,
        attributes: &["pkgs_from", "dashboard_url"],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "buckets",
        name: "USPS Digest Status",
        render: Render::BucketSummary,
        attributes: &["buckets", "dashboard_url"],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "mail_images",
        name: "USPS Scans",
        render: Render::ImageCount,
        attributes: &["images", "dashboard_url"],
    },
    SensorDescriptor {
        namespace: Namespace::Usps,
        field: "last_delivered_date",
        name: "USPS Last Delivered",
        render: Render::LastDelivered,
        attributes: &[
            "last_delivered_label",
            "last_delivered_time",
            "last_delivered_status",
            "delivered_history",
        ],
    },
];

/// Look a sensor up by its unique id.
pub fn find(unique_id: &str) -> Option<&'static SensorDescriptor> {
    SENSORS.iter().find(|s| s.unique_id() == unique_id)
}

/// Render every registered sensor.
pub fn read_all(state: &State) -> Vec<SensorReading> {
    SENSORS.iter().map(|s| s.read(state)).collect()
}

impl SensorDescriptor {
    /// `<namespace>_<field>`, stable across releases.
    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.namespace, self.field)
    }

    pub fn read(&self, state: &State) -> SensorReading {
        let attributes = self
            .attributes
            .iter()
            .map(|key| {
                let value = state
                    .get(self.namespace, key)
                    .map_or(serde_json::Value::Null, to_json);
                (key.to_string(), value)
            })
            .collect();

        SensorReading {
            unique_id: self.unique_id(),
            name: format!("Minimail {}", self.name),
            state: self.render_state(state),
            attributes,
        }
    }

    fn render_state(&self, state: &State) -> serde_json::Value {
        let value = state.get(self.namespace, self.field);
        match self.render {
            Render::Text => json!(value.and_then(Value::as_str).unwrap_or_default()),
            Render::Count => json!(value.and_then(Value::as_int).unwrap_or(0)),
            Render::ListSummary => {
                let items = value.and_then(Value::as_list).unwrap_or_default();
                json!(items.iter().take(3).cloned().collect::<Vec<_>>().join(", "))
            }
            Render::BucketSummary => {
                let count = |bucket: &str| {
                    value
                        .and_then(Value::as_map)
                        .and_then(|buckets| buckets.get(bucket))
                        .and_then(Value::as_map)
                        .and_then(|b| b.get("count"))
                        .and_then(Value::as_int)
                        .unwrap_or(0)
                };
                json!(format!(
                    "Today:{} | Awaiting:{}",
                    count("expected_today"),
                    count("awaiting_from_sender")
                ))
            }
            Render::ImageCount => json!(value
                .and_then(Value::as_map)
                .and_then(|m| m.get("count"))
                .and_then(Value::as_int)
                .unwrap_or(0)),
            Render::LastDelivered => {
                let text = value.and_then(Value::as_str).or_else(|| {
                    state
                        .get(self.namespace, "last_delivered_label")
                        .and_then(Value::as_str)
                });
                json!(text.unwrap_or_default())
            }
        }
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ids_are_namespace_field_and_distinct() {
        let ids: Vec<String> = SENSORS.iter().map(SensorDescriptor::unique_id).collect();
        assert!(ids.contains(&"amazon_event".to_string()));
        assert!(ids.contains(&"usps_mail_expected".to_string()));
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
    }

    #[test]
    fn test_absent_fields_render_empty() {
        let state = State::new(10);
        for reading in read_all(&state) {
            assert!(
                reading.state == json!("") || reading.state == json!(0),
                "{}: {}",
                reading.unique_id,
                reading.state
            );
        }
    }

    #[test]
    fn test_render_values() {
        let mut state = State::new(10);
        state.merge_fields(
            Namespace::Usps,
            [
                ("mail_expected", Value::Int(3)),
                (
                    "mail_from",
                    Value::List(vec!["A".into(), "B".into(), "C".into(), "D".into()]),
                ),
                ("last_delivered_label", Value::from("today, September 12!")),
            ],
        );
        let mut today = BTreeMap::new();
        today.insert("count".to_string(), Value::Int(2));
        let mut buckets = BTreeMap::new();
        buckets.insert("expected_today".to_string(), Value::Map(today));
        state.merge_fields(Namespace::Usps, [("buckets", Value::Map(buckets))]);

        let read = |id: &str| find(id).unwrap().read(&state).state;
        assert_eq!(read("usps_mail_expected"), json!(3));
        assert_eq!(read("usps_mail_from"), json!("A, B, C"));
        assert_eq!(read("usps_buckets"), json!("Today:2 | Awaiting:0"));
        assert_eq!(read("usps_last_delivered_date"), json!("today, September 12!"));
        assert_eq!(read("usps_mail_images"), json!(0));
    }

    #[test]
    fn test_attributes_include_absent_as_null() {
        let state = State::new(10);
        let reading = find("amazon_event").unwrap().read(&state);
        assert_eq!(reading.attributes["eta"], serde_json::Value::Null);
        assert_eq!(reading.name, "Minimail Amazon Last Event");
    }
}
