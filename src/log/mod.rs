//! Types related to atomic log storage.
//!
//! Every citizen owns an append-only chain of committed entries keyed by
//! promise. The [`Log`] trait is the seam at which a durable sink may be
//! layered; [`memory::InMemoryLog`] is the in-memory implementation the
//! engine is tested against.

use crate::message::{LogEntry, Promise};

use alloc::vec::Vec;

#[cfg(any(feature = "test", test))]
#[macro_use]
pub mod tests;
pub mod memory;

/// An interface for storage of a citizen's atomic log.
///
/// # Initial state
///
/// A fresh log contains a single sentinel entry at promise `0/0`. The head
/// of a log that has never synchronized is therefore `0/0`, which is how a
/// new citizen recognizes that its next commit must be the government that
/// admitted it. A government entry may be pushed onto the sentinel without a
/// matching `previous`, since a joining citizen's chain begins at its own
/// immigration.
///
/// # Truncation
///
/// The trailer is the oldest retained entry. [`shift`] discards entries from
/// the front while their promise is strictly less than the given minimum,
/// but never discards the head. Entries are immutable once pushed.
///
/// [`shift`]: Self::shift
pub trait Log {
    /// The type of error returned by fallible operations.
    type Error;

    /// Appends an entry at the head.
    ///
    /// # Errors
    ///
    /// If the entry does not chain onto the current head, or if there was
    /// any error modifying the log, an error is returned.
    fn push(&mut self, entry: LogEntry) -> Result<(), Self::Error>;

    /// The newest entry.
    fn head(&self) -> &LogEntry;

    /// The oldest retained entry.
    fn trailer(&self) -> &LogEntry;

    /// The entry at `promise`, or `None` if absent or discarded.
    fn find(&self, promise: &Promise) -> Option<&LogEntry>;

    /// Up to `limit` retained entries with a promise strictly greater than
    /// `exclusive`, in order.
    fn since(&self, exclusive: &Promise, limit: usize) -> Vec<LogEntry>;

    /// Up to `limit` retained entries with a promise greater than or equal
    /// to `inclusive`, in order.
    fn starting(&self, inclusive: &Promise, limit: usize) -> Vec<LogEntry>;

    /// Advances the trailer, discarding entries whose promise is strictly
    /// less than `minimum` while never discarding the head. Returns the
    /// number of entries discarded.
    fn shift(&mut self, minimum: &Promise) -> usize;

    /// The number of retained entries, the sentinel included.
    fn len(&self) -> usize;

    /// Whether the log holds no entries. Always `false` for a log seeded
    /// with its sentinel.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The promise of the last entry returned by [`take_next`], or the
    /// trailer's promise if none has been.
    ///
    /// [`take_next`]: Self::take_next
    fn last_taken(&self) -> Promise;

    /// The next retained entry not previously returned by this function, or
    /// `None` if the consumer has caught up with the head. A consumer that
    /// lags behind the trailer resumes at the trailer.
    fn take_next(&mut self) -> Option<LogEntry>;
}

/// An iterator yielding committed entries for the application layer.
///
/// A given entry will be yielded at most once over the lifetime of a
/// citizen.
pub struct CommittedIter<'a, L> {
    log: &'a mut L,
}

impl<'a, L> CommittedIter<'a, L> {
    pub(crate) fn new(log: &'a mut L) -> Self {
        CommittedIter { log }
    }
}

impl<L: Log> Iterator for CommittedIter<'_, L> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.log.take_next()
    }
}
