//! Lazy, restartable iteration over a store snapshot.

use super::codec;
use super::record::IdentityRecord;
use crate::error::StoreError;
use crate::identifier::Identifier;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum ScanSource {
    /// Raw store file contents, decoded line by line as the scan advances
    Text(Arc<str>),
    /// Already-decoded records (in-memory backends)
    Records(Arc<Vec<IdentityRecord>>),
}

/// An entry that could not be decoded, kept verbatim.
#[derive(Debug, Clone)]
pub struct CorruptLine {
    /// Always [`StoreError::CorruptEntry`]
    pub error: StoreError,
    pub raw: String,
}

/// A finite sequence of records taken from one consistent snapshot.
///
/// Entries that fail to decode are skipped with a warning rather than ending
/// the scan; [`Scan::corrupt_entries`] lists them. [`Scan::restart`] rewinds
/// to the first entry of the same snapshot; call `IdentityStore::scan` again
/// for a fresh one.
#[derive(Debug, Clone)]
pub struct Scan {
    source: ScanSource,
    position: usize,
    line: usize,
    corrupt: Vec<CorruptLine>,
    /// Current record per identifier; lines that disagree are stale duplicates
    latest: Option<Arc<BTreeMap<Identifier, IdentityRecord>>>,
    yielded: HashSet<Identifier>,
}

impl Scan {
    fn new(source: ScanSource) -> Self {
        Self {
            source,
            position: 0,
            line: 0,
            corrupt: Vec::new(),
            latest: None,
            yielded: HashSet::new(),
        }
    }

    pub(crate) fn from_text(text: impl Into<Arc<str>>) -> Self {
        Self::new(ScanSource::Text(text.into()))
    }

    pub(crate) fn from_records(records: Vec<IdentityRecord>) -> Self {
        Self::new(ScanSource::Records(Arc::new(records)))
    }

    pub(crate) fn empty() -> Self {
        Self::from_records(Vec::new())
    }

    /// Yields each identifier once, only in the form `latest` holds for it.
    ///
    /// `latest` must be the decoded state of the same text, with later
    /// duplicate lines having replaced earlier ones.
    pub(crate) fn keeping_latest(mut self, latest: Arc<BTreeMap<Identifier, IdentityRecord>>) -> Self {
        self.latest = Some(latest);
        self
    }

    /// Number of entries skipped as corrupt since the last restart.
    pub fn skipped(&self) -> usize {
        self.corrupt.len()
    }

    /// Entries skipped as corrupt since the last restart, in file order.
    pub fn corrupt_entries(&self) -> &[CorruptLine] {
        &self.corrupt
    }

    /// Rewinds the scan to the beginning of its snapshot.
    pub fn restart(&mut self) {
        self.position = 0;
        self.line = 0;
        self.corrupt.clear();
        self.yielded.clear();
    }

    fn is_stale(&mut self, record: &IdentityRecord) -> bool {
        match &self.latest {
            Some(latest) => {
                latest.get(&record.identifier) != Some(record)
                    || !self.yielded.insert(record.identifier.clone())
            }
            None => false,
        }
    }

    fn next_from_text(&mut self, text: &str) -> Option<IdentityRecord> {
        while self.position < text.len() {
            let rest = &text[self.position..];
            let (raw_line, consumed) = match rest.find('\n') {
                Some(end) => (&rest[..end], end + 1),
                None => (rest, rest.len()),
            };
            self.position += consumed;
            self.line += 1;

            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match codec::decode_entry(line) {
                Ok(record) => {
                    if self.is_stale(&record) {
                        debug!("Skipping superseded entry for '{}' at line {}", record.identifier, self.line);
                        continue;
                    }
                    return Some(record);
                }
                Err(reason) => {
                    let error = StoreError::CorruptEntry { line: self.line, reason };
                    warn!("⚠️ Skipping {}", error);
                    self.corrupt.push(CorruptLine {
                        error,
                        raw: raw_line.to_string(),
                    });
                }
            }
        }
        None
    }
}

impl Iterator for Scan {
    type Item = IdentityRecord;

    fn next(&mut self) -> Option<Self::Item> {
        match self.source.clone() {
            ScanSource::Text(text) => self.next_from_text(&text),
            ScanSource::Records(records) => {
                let record = records.get(self.position).cloned();
                if record.is_some() {
                    self.position += 1;
                }
                record
            }
        }
    }
}
