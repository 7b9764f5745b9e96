//! A naive in-memory implementation of [`Log`](super::Log).

use core::ops::Bound;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use bytes::Bytes;

use crate::message::{Body, LogEntry, Promise};

use super::Log;

/// An in-memory [`Log`](super::Log) over a balanced tree keyed on promise,
/// giving ordered iteration for synchronization and logarithmic lookup.
pub struct InMemoryLog {
    entries: BTreeMap<Promise, LogEntry>,
    taken: Promise,
}

impl InMemoryLog {
    /// Constructs a log holding only the `0/0` sentinel.
    pub fn new() -> Self {
        let sentinel = LogEntry {
            promise: Promise::default(),
            previous: Promise::default(),
            body: Body::Entry(Bytes::new()),
        };
        let mut entries = BTreeMap::new();
        entries.insert(sentinel.promise, sentinel);
        InMemoryLog {
            entries,
            taken: Promise::default(),
        }
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for InMemoryLog {
    type Error = ();

    fn push(&mut self, entry: LogEntry) -> Result<(), ()> {
        let head = self.head();
        if entry.promise <= head.promise {
            return Err(());
        }
        let joining = head.promise == Promise::default() && entry.body.is_government();
        if entry.previous != head.promise && !joining {
            return Err(());
        }
        self.entries.insert(entry.promise, entry);
        Ok(())
    }

    fn head(&self) -> &LogEntry {
        self.entries
            .values()
            .next_back()
            .unwrap_or_else(|| panic!("log lost its sentinel"))
    }

    fn trailer(&self) -> &LogEntry {
        self.entries
            .values()
            .next()
            .unwrap_or_else(|| panic!("log lost its sentinel"))
    }

    fn find(&self, promise: &Promise) -> Option<&LogEntry> {
        self.entries.get(promise)
    }

    fn since(&self, exclusive: &Promise, limit: usize) -> Vec<LogEntry> {
        self.entries
            .range((Bound::Excluded(*exclusive), Bound::Unbounded))
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    fn starting(&self, inclusive: &Promise, limit: usize) -> Vec<LogEntry> {
        self.entries
            .range(*inclusive..)
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    fn shift(&mut self, minimum: &Promise) -> usize {
        let mut shifted = 0;
        while self.entries.len() > 1 {
            let oldest = *self
                .entries
                .keys()
                .next()
                .unwrap_or_else(|| panic!("log lost its sentinel"));
            if oldest >= *minimum {
                break;
            }
            self.entries.remove(&oldest);
            shifted += 1;
        }
        shifted
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn last_taken(&self) -> Promise {
        self.taken
    }

    fn take_next(&mut self) -> Option<LogEntry> {
        let entry = self
            .entries
            .range((Bound::Excluded(self.taken), Bound::Unbounded))
            .map(|(_, entry)| entry.clone())
            .next()?;
        self.taken = entry.promise;
        Some(entry)
    }
}
