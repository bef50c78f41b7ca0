//! Value types exchanged with CalDAV servers

/// Dedupe key of an event with both summary and start empty; excluded from
/// content-level duplicate detection.
pub const EMPTY_DEDUPE_KEY: &str = "|";

/// A discovered calendar collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarInfo {
    pub path: String,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

/// A calendar object fetched from a server, with its normalized identity
#[derive(Debug, Clone)]
pub struct RemoteEvent {
    /// Href of the object on its server
    pub path: String,
    /// Entity tag; used as the version of this object
    pub etag: String,
    /// Raw iCalendar text
    pub data: String,
    /// iCalendar UID; empty when the object carries none
    pub uid: String,
    /// SUMMARY; empty when absent
    pub summary: String,
    /// DTSTART normalized to canonical UTC form (`YYYYMMDDTHHMMSSZ`)
    pub dtstart_utc: String,
}

impl RemoteEvent {
    /// Content-level identity: the same real-world event re-imported under a
    /// different UID still produces the same key.
    pub fn dedupe_key(&self) -> String {
        format!("{}|{}", self.summary, self.dtstart_utc)
    }
}

/// One unparseable remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub path: String,
    pub message: String,
}

/// Collects malformed objects encountered during enumeration
///
/// Malformed objects are operator-surfaced, never sync failures.
#[derive(Debug, Default)]
pub struct MalformedCollector {
    records: Vec<MalformedRecord>,
}

impl MalformedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.records.push(MalformedRecord {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn records(&self) -> &[MalformedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A changed member reported by sync-collection
#[derive(Debug, Clone)]
pub struct SyncChange {
    pub path: String,
    pub etag: String,
    pub data: String,
}

/// Parsed result of an RFC 6578 sync-collection REPORT
#[derive(Debug, Clone, Default)]
pub struct SyncCollectionReport {
    pub sync_token: String,
    pub changed: Vec<SyncChange>,
    pub deleted: Vec<String>,
}
