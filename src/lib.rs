//! `minimail`: delivery tracking from an IMAP mailbox.
//!
//! Polls a mailbox, recognizes Amazon shipment notices and USPS Informed
//! Delivery mail, and keeps the extracted facts in a field-merged state
//! that sensors render for a dashboard.

pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod parser;
pub mod poller;
pub mod rules;
pub mod sensors;
pub mod state;
