//! Persistent (process-lifetime) state and the field-level merger.
//!
//! The state is never replaced wholesale. Each parsed record is folded in
//! key by key: a present field overwrites the stored value, an absent field
//! leaves it alone, and accumulating fields append instead of overwrite.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MailError, Result};
use crate::rules::{ParsedRecord, Rule};

/// Flag set by a digest merge when the digest is dated today.
pub const FLAG_DIGEST_TODAY: &str = "usps_digest_today";

/// Top-level grouping of state fields by sender type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Amazon,
    Usps,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Amazon, Namespace::Usps];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::Usps => "usps",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

/// How an incoming field combines with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Replace the stored value.
    Overwrite,
    /// Append list entries not already stored, keeping the newest `history_limit`.
    Accumulate,
}

/// Merge policy of a field.
pub fn policy(namespace: Namespace, key: &str) -> MergePolicy {
    match (namespace, key) {
        (Namespace::Amazon, "events") | (Namespace::Usps, "delivered_history") => {
            MergePolicy::Accumulate
        }
        _ => MergePolicy::Overwrite,
    }
}

/// Data and flags learned from the mailbox during one polling session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct State {
    /// Namespace → field → latest value.
    pub data: BTreeMap<Namespace, BTreeMap<String, Value>>,
    /// Per-cycle indicators, recomputed from the freshest records.
    pub flags: BTreeMap<String, bool>,
    #[serde(skip)]
    history_limit: usize,
}

impl Default for State {
    fn default() -> Self {
        Self::new(10)
    }
}

impl State {
    /// Empty state with both namespaces present.
    pub fn new(history_limit: usize) -> Self {
        Self {
            data: Namespace::ALL
                .iter()
                .map(|ns| (*ns, BTreeMap::new()))
                .collect(),
            flags: BTreeMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Stored value of a field, if any.
    pub fn get(&self, namespace: Namespace, key: &str) -> Option<&Value> {
        self.data.get(&namespace).and_then(|fields| fields.get(key))
    }

    /// All fields of a namespace.
    pub fn fields(&self, namespace: Namespace) -> impl Iterator<Item = (&String, &Value)> {
        self.data.get(&namespace).into_iter().flatten()
    }

    /// Current value of a flag; unknown flags are `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Reset every flag at the start of a cycle whose fetch succeeded.
    pub fn begin_cycle(&mut self) {
        self.flags.clear();
        for rule in Rule::ALL {
            self.flags.insert(rule.flag().to_string(), false);
        }
        self.flags.insert(FLAG_DIGEST_TODAY.to_string(), false);
    }

    /// Fold one parsed record into the state and update the flags it drives.
    pub fn merge(&mut self, record: &ParsedRecord) {
        let rule = record.rule();
        let fields = record.fields();
        debug!(rule = rule.name(), fields = fields.len(), "Merging record");
        self.merge_fields(rule.namespace(), fields);

        self.flags.insert(rule.flag().to_string(), true);
        for (name, value) in record.flags() {
            self.flags.insert(name.to_string(), value);
        }
    }

    /// Overwrite-or-accumulate each field; fields not given are untouched.
    pub fn merge_fields<K, I>(&mut self, namespace: Namespace, fields: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let limit = self.history_limit;
        let stored = self.data.entry(namespace).or_default();

        for (key, value) in fields {
            let key = key.into();
            match (policy(namespace, &key), value) {
                (MergePolicy::Accumulate, Value::List(incoming)) => {
                    let slot = stored
                        .entry(key)
                        .or_insert_with(|| Value::List(Vec::new()));
                    if !matches!(slot, Value::List(_)) {
                        *slot = Value::List(Vec::new());
                    }
                    if let Value::List(items) = slot {
                        append_capped(items, incoming, limit);
                    }
                }
                (_, value) => {
                    stored.insert(key, value);
                }
            }
        }
    }

    /// Write the state as pretty JSON for external consumers.
    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| MailError::io(path, std::io::Error::other(e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MailError::io(parent, e))?;
        }
        std::fs::write(path, json).map_err(|e| MailError::io(path, e))?;
        info!(path = %path.display(), "Wrote state snapshot");
        Ok(())
    }
}

/// Append entries not yet present, then drop the oldest beyond `limit`.
fn append_capped(items: &mut Vec<String>, incoming: Vec<String>, limit: usize) {
    for entry in incoming {
        if !items.contains(&entry) {
            items.push(entry);
        }
    }
    if items.len() > limit {
        let excess = items.len() - limit;
        items.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn test_new_state_has_both_namespaces() {
        let state = State::new(5);
        assert!(state.data.contains_key(&Namespace::Amazon));
        assert!(state.data.contains_key(&Namespace::Usps));
        assert!(state.flags.is_empty());
    }

    #[test]
    fn test_disjoint_records_union() {
        let mut state = State::new(10);
        state.merge_fields(Namespace::Amazon, [("subject", text("A")), ("eta", text("Today"))]);
        state.merge_fields(Namespace::Amazon, [("order_id", text("111-2222222-3333333"))]);

        assert_eq!(state.get(Namespace::Amazon, "subject"), Some(&text("A")));
        assert_eq!(state.get(Namespace::Amazon, "eta"), Some(&text("Today")));
        assert_eq!(
            state.get(Namespace::Amazon, "order_id"),
            Some(&text("111-2222222-3333333"))
        );
    }

    #[test]
    fn test_overlapping_key_takes_newest() {
        let mut state = State::new(10);
        state.merge_fields(Namespace::Usps, [("mail_expected", Value::Int(2)), ("type", text("digest"))]);
        state.merge_fields(Namespace::Usps, [("mail_expected", Value::Int(5))]);

        assert_eq!(state.get(Namespace::Usps, "mail_expected"), Some(&Value::Int(5)));
        assert_eq!(state.get(Namespace::Usps, "type"), Some(&text("digest")));
    }

    #[test]
    fn test_partial_merge_never_wipes_namespace() {
        let mut state = State::new(10);
        state.merge_fields(
            Namespace::Usps,
            [
                ("mail_from", Value::List(vec!["Alice".into()])),
                ("pkgs_expected", Value::Int(1)),
            ],
        );
        let before = state.data[&Namespace::Usps].len();
        state.merge_fields(Namespace::Usps, Vec::<(String, Value)>::new());
        state.merge_fields(Namespace::Usps, [("subject", text("hi"))]);
        assert_eq!(state.data[&Namespace::Usps].len(), before + 1);
        assert!(state.data[&Namespace::Amazon].is_empty());
    }

    #[test]
    fn test_accumulating_field_appends_and_caps() {
        let mut state = State::new(3);
        for entry in ["a", "b", "c", "d"] {
            state.merge_fields(Namespace::Amazon, [("events", Value::List(vec![entry.into()]))]);
        }
        assert_eq!(
            state.get(Namespace::Amazon, "events"),
            Some(&Value::List(vec!["b".into(), "c".into(), "d".into()]))
        );
    }

    #[test]
    fn test_accumulating_field_skips_duplicates() {
        let mut state = State::new(10);
        state.merge_fields(Namespace::Usps, [("delivered_history", Value::List(vec!["2025-09-12".into()]))]);
        state.merge_fields(Namespace::Usps, [("delivered_history", Value::List(vec!["2025-09-12".into()]))]);
        assert_eq!(
            state.get(Namespace::Usps, "delivered_history"),
            Some(&Value::List(vec!["2025-09-12".into()]))
        );
    }

    #[test]
    fn test_accumulating_field_replaces_garbage() {
        let mut state = State::new(10);
        state.merge_fields(Namespace::Amazon, [("events", text("oops"))]);
        state.merge_fields(Namespace::Amazon, [("events", Value::List(vec!["x".into()]))]);
        assert_eq!(
            state.get(Namespace::Amazon, "events"),
            Some(&Value::List(vec!["x".into()]))
        );
    }

    #[test]
    fn test_begin_cycle_resets_flags() {
        let mut state = State::new(10);
        state.flags.insert("got_amazon".into(), true);
        state.begin_cycle();
        assert!(!state.flag("got_amazon"));
        assert!(state.flags.contains_key(FLAG_DIGEST_TODAY));
        assert!(!state.flag("never_set"));
    }

    #[test]
    fn test_snapshot_serializes_by_namespace() {
        let mut state = State::new(10);
        state.merge_fields(Namespace::Usps, [("mail_expected", Value::Int(3))]);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["data"]["usps"]["mail_expected"], 3);
        assert!(json["data"]["amazon"].is_object());
    }

    #[test]
    fn test_write_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("state.json");
        let mut state = State::new(10);
        state.merge_fields(Namespace::Amazon, [("event", text("Shipped"))]);
        state.write_snapshot(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"Shipped\""));
    }
}
