//! Mail sources: where a poll cycle gets its messages from.
//!
//! [`ImapSource`] is the production source. [`EmlFiles`] replays saved
//! `.eml` files through the same pipeline.

pub mod eml;
pub mod imap;

pub use self::eml::EmlFiles;
pub use self::imap::ImapSource;

use crate::error::Result;
use crate::model::message::DecodedMessage;

/// A source of decoded messages for one poll cycle.
pub trait MailSource {
    /// Fetch the current batch, newest first.
    ///
    /// An `Err` means the whole batch failed (connection, login, folder);
    /// single unreadable messages are skipped by the source itself.
    fn fetch(&mut self) -> Result<Vec<DecodedMessage>>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Keep the `limit` highest ids, highest first.
pub fn newest_ids(ids: impl IntoIterator<Item = u32>, limit: usize) -> Vec<u32> {
    let mut ids: Vec<u32> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    let start = ids.len().saturating_sub(limit);
    ids.drain(..start);
    ids.reverse();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_ids_keeps_highest_first() {
        assert_eq!(newest_ids([3, 10, 7, 1, 8], 3), vec![10, 8, 7]);
    }

    #[test]
    fn test_newest_ids_limit_above_len() {
        assert_eq!(newest_ids([2, 1], 25), vec![2, 1]);
        assert!(newest_ids([], 5).is_empty());
    }

    #[test]
    fn test_newest_ids_zero_limit() {
        assert!(newest_ids([1, 2, 3], 0).is_empty());
    }
}
