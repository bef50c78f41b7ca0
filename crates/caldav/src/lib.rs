//! CalBridge CalDAV client
//!
//! Per-endpoint client for the CalDAV operations the sync engine needs:
//! discovery, event enumeration and transfer, and RFC 6578 incremental sync.

mod client;
mod error;
mod http;
mod ical;
mod response;
mod types;
mod xml;

pub use client::CalDavClient;
pub use error::CalDavError;
pub use ical::{EventIdentity, normalize_dtstart, parse_identity};
pub use types::{
    CalendarInfo, EMPTY_DEDUPE_KEY, MalformedCollector, MalformedRecord, RemoteEvent, SyncChange,
    SyncCollectionReport,
};
