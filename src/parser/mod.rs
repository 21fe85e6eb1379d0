//! Message decoding: RFC 2047 header words, dates, and MIME bodies.

pub mod header;
pub mod mime;
