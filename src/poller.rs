//! The poll cycle: fetch → route → merge, and the interval loop around it.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::fetch::MailSource;
use crate::rules::{self, RuleOptions};
use crate::state::State;

/// Counters of one successful cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Messages returned by the source.
    pub fetched: usize,
    /// Messages that produced at least one record.
    pub matched: usize,
    /// Records merged into the state.
    pub merged: usize,
}

/// Owns one mail source and the state built from it.
pub struct Poller<S> {
    source: S,
    sender_filters: Vec<String>,
    options: RuleOptions,
    state: State,
    snapshot_file: Option<PathBuf>,
}

impl<S: MailSource> Poller<S> {
    pub fn new(source: S, sender_filters: Vec<String>, options: RuleOptions, state: State) -> Self {
        Self {
            source,
            sender_filters,
            options,
            state,
            snapshot_file: None,
        }
    }

    /// Rewrite this file with the state after every successful cycle.
    pub fn with_snapshot_file(mut self, path: Option<PathBuf>) -> Self {
        self.snapshot_file = path;
        self
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    /// Run one cycle.
    ///
    /// A fetch failure is returned as-is and leaves the state (flags
    /// included) exactly as it was.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        let messages = self.source.fetch()?;
        self.state.begin_cycle();

        let mut report = CycleReport {
            fetched: messages.len(),
            ..CycleReport::default()
        };

        // Newest-first batch; the freshest message must be merged last.
        for message in messages.iter().rev() {
            let records = rules::route(message, &self.sender_filters, &self.options);
            if !records.is_empty() {
                report.matched += 1;
            }
            for record in &records {
                self.state.merge(record);
                report.merged += 1;
            }
        }

        if let Some(path) = &self.snapshot_file {
            if let Err(e) = self.state.write_snapshot(path) {
                warn!(error = %e, "Failed to write state snapshot");
            }
        }

        info!(
            source = %self.source.describe(),
            fetched = report.fetched,
            matched = report.matched,
            merged = report.merged,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Run cycles back to back, sleeping `interval` between them.
    ///
    /// A failed cycle is logged and the loop goes on. Stops after
    /// `max_cycles` when given. `on_cycle` sees the state after each
    /// successful cycle.
    pub fn run<F>(&mut self, interval: Duration, max_cycles: Option<u64>, mut on_cycle: F)
    where
        F: FnMut(&CycleReport, &State),
    {
        let mut cycles: u64 = 0;
        loop {
            match self.run_cycle() {
                Ok(report) => on_cycle(&report, &self.state),
                Err(e) => error!(
                    source = %self.source.describe(),
                    error = %e,
                    "Poll cycle failed, keeping previous state"
                ),
            }

            cycles += 1;
            if max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            std::thread::sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailError;
    use crate::model::address::EmailAddress;
    use crate::model::message::DecodedMessage;
    use crate::state::{Namespace, Value};
    use std::collections::VecDeque;

    /// Replays canned fetch results.
    struct Scripted {
        batches: VecDeque<Result<Vec<DecodedMessage>>>,
    }

    impl MailSource for Scripted {
        fn fetch(&mut self) -> Result<Vec<DecodedMessage>> {
            self.batches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn amazon(subject: &str) -> DecodedMessage {
        DecodedMessage {
            from: EmailAddress::parse("Amazon.com <shipment-tracking@amazon.com>"),
            subject: subject.to_string(),
            text: "Your order update.".into(),
            ..DecodedMessage::default()
        }
    }

    fn digest(text: &str) -> DecodedMessage {
        DecodedMessage {
            from: EmailAddress::parse(
                "USPS Informed Delivery <USPSInformedDelivery@email.informeddelivery.usps.com>",
            ),
            subject: "Your Daily Digest".into(),
            text: text.to_string(),
            ..DecodedMessage::default()
        }
    }

    fn poller(batches: Vec<Result<Vec<DecodedMessage>>>) -> Poller<Scripted> {
        Poller::new(
            Scripted {
                batches: batches.into(),
            },
            Vec::new(),
            RuleOptions::default(),
            State::new(10),
        )
    }

    fn auth_error() -> MailError {
        MailError::Auth {
            user: "me".into(),
            reason: "bad password".into(),
        }
    }

    #[test]
    fn test_freshest_message_wins() {
        // Newest first, as a source returns them.
        let batch = vec![
            amazon("Delivered: Order 111-1111111-1111111"),
            amazon("Shipped: Order 111-1111111-1111111"),
        ];
        let mut poller = poller(vec![Ok(batch)]);
        let report = poller.run_cycle().unwrap();

        assert_eq!(report, CycleReport { fetched: 2, matched: 2, merged: 2 });
        let state = poller.state();
        assert_eq!(state.get(Namespace::Amazon, "event"), Some(&Value::from("Delivered")));
        assert_eq!(
            state.get(Namespace::Amazon, "events"),
            Some(&Value::List(vec![
                "Shipped 111-1111111-1111111".into(),
                "Delivered 111-1111111-1111111".into(),
            ]))
        );
        assert!(state.flag("got_amazon"));
        assert!(!state.flag("got_usps_digest"));
    }

    #[test]
    fn test_newer_empty_digest_clears_senders() {
        let batch = vec![
            digest("Mail Expected Today: 0"),
            digest("FROM: Alice\nFROM: Bob"),
        ];
        let mut poller = poller(vec![Ok(batch)]);
        poller.run_cycle().unwrap();

        let state = poller.state();
        assert_eq!(state.get(Namespace::Usps, "mail_expected"), Some(&Value::Int(0)));
        assert_eq!(state.get(Namespace::Usps, "mail_from"), Some(&Value::List(Vec::new())));
    }

    #[test]
    fn test_auth_failure_leaves_state_untouched() {
        let mut poller = poller(vec![
            Ok(vec![amazon("Shipped: Order 111-1111111-1111111")]),
            Err(auth_error()),
        ]);
        poller.run_cycle().unwrap();
        let before = poller.state().clone();

        let err = poller.run_cycle().unwrap_err();
        assert!(err.is_connection_level());
        assert_eq!(poller.state(), &before);
        assert!(poller.state().flag("got_amazon"));
    }

    #[test]
    fn test_empty_cycle_resets_flags_keeps_data() {
        let mut poller = poller(vec![
            Ok(vec![amazon("Shipped: Order 111-1111111-1111111")]),
            Ok(Vec::new()),
        ]);
        poller.run_cycle().unwrap();
        poller.run_cycle().unwrap();

        assert!(!poller.state().flag("got_amazon"));
        assert_eq!(
            poller.state().get(Namespace::Amazon, "event"),
            Some(&Value::from("Shipped"))
        );
    }

    #[test]
    fn test_run_continues_after_failure() {
        let mut poller = poller(vec![
            Err(auth_error()),
            Ok(vec![amazon("Shipped: Order 111-1111111-1111111")]),
        ]);
        let mut seen = Vec::new();
        poller.run(Duration::ZERO, Some(2), |report, _| seen.push(*report));

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].merged, 1);
    }

    #[test]
    fn test_snapshot_written_after_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        let mut poller = poller(vec![Ok(vec![amazon("Shipped: Order 111-1111111-1111111")])])
            .with_snapshot_file(Some(path.clone()));
        poller.run_cycle().unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["data"]["amazon"]["order_id"], "111-1111111-1111111");
        assert_eq!(json["flags"]["got_amazon"], true);
    }
}
