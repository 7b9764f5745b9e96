use bytes::Bytes;

use alloc::vec;
use alloc::vec::Vec;

use crate::government::Government;
use crate::message::{Body, LogEntry, Promise};

use super::Log;

/// Defines test functions for a type implementing [`Log`].
#[macro_export]
macro_rules! parliament_log_tests {
    ($ty:ty, $new:expr) => {
        $crate::parliament_log_test! { $ty, $new, test_log_sentinel }
        $crate::parliament_log_test! { $ty, $new, test_log_push }
        $crate::parliament_log_test! { $ty, $new, test_log_push_rejects_gaps }
        $crate::parliament_log_test! { $ty, $new, test_log_joins_at_government }
        $crate::parliament_log_test! { $ty, $new, test_log_shift }
        $crate::parliament_log_test! { $ty, $new, test_log_take_next }
    };
}

/// Defines a given test function for a type implementing [`Log`].
#[macro_export]
macro_rules! parliament_log_test {
    ($ty:ty, $new:expr, $test:ident) => {
        #[test]
        fn $test() {
            let mut log: $ty = $new;
            $crate::log::tests::$test(&mut log);
        }
    };
}

pub fn test_log_sentinel<L: Log>(log: &mut L) {
    assert_eq!(log.len(), 1);
    assert_eq!(log.head().promise, Promise::default());
    assert_eq!(log.trailer().promise, Promise::default());
    assert_eq!(log.since(&Promise::default(), 16), vec![]);
}

pub fn test_log_push<L: Log>(log: &mut L) {
    let entries = chain();
    for (index, entry) in entries.iter().cloned().enumerate() {
        log.push(entry).unwrap_or_else(|_| panic!());
        assert_eq!(log.len(), index + 2);
        assert_eq!(log.head(), &entries[index]);
    }
    assert_eq!(log.since(&entries[0].promise, 16), entries[1..].to_vec());
    assert_eq!(log.starting(&entries[1].promise, 1), entries[1..2].to_vec());
    assert_eq!(log.find(&entries[2].promise), Some(&entries[2]));
    assert_eq!(log.find(&Promise::new(9, 9)), None);
}

pub fn test_log_push_rejects_gaps<L: Log>(log: &mut L) {
    let entries = chain();
    log.push(entries[0].clone()).unwrap_or_else(|_| panic!());
    // skips entries[1], so the chain does not connect
    log.push(entries[2].clone()).unwrap_err();
    // and promises never move backwards
    log.push(entries[0].clone()).unwrap_err();
}

pub fn test_log_joins_at_government<L: Log>(log: &mut L) {
    // a plain entry cannot seed a chain
    log.push(LogEntry {
        promise: Promise::new(3, 1),
        previous: Promise::new(3, 0),
        body: Body::Entry(Bytes::from_static(b"orphan")),
    })
    .unwrap_err();
    // but a joining citizen's first commit is a government whose `previous`
    // belongs to a chain it never held
    let government = LogEntry {
        promise: Promise::new(3, 0),
        previous: Promise::new(2, 1),
        body: Body::Government(Government::default()),
    };
    log.push(government.clone()).unwrap_or_else(|_| panic!());
    assert_eq!(log.head(), &government);
}

pub fn test_log_shift<L: Log>(log: &mut L) {
    let entries = chain();
    for entry in entries.iter().cloned() {
        log.push(entry).unwrap_or_else(|_| panic!());
    }
    assert_eq!(log.shift(&Promise::default()), 0);
    assert_eq!(log.shift(&entries[1].promise), 2);
    assert_eq!(log.trailer(), &entries[1]);
    // the head is never discarded
    assert_eq!(log.shift(&Promise::new(9, 9)), entries.len() - 2);
    assert_eq!(log.trailer().promise, log.head().promise);
    assert_eq!(log.len(), 1);
}

pub fn test_log_take_next<L: Log>(log: &mut L) {
    let entries = chain();
    for entry in entries.iter().cloned() {
        log.push(entry).unwrap_or_else(|_| panic!());
    }
    assert_eq!(log.take_next(), Some(entries[0].clone()));
    assert_eq!(log.last_taken(), entries[0].promise);
    // a shift past the consumer resumes it at the trailer
    log.shift(&entries[2].promise);
    assert_eq!(log.take_next(), Some(entries[2].clone()));
    assert_eq!(log.take_next(), Some(entries[3].clone()));
    assert_eq!(log.take_next(), None);
}

//
// internal
//

fn boundary(government: u64) -> Government {
    let mut snapshot = Government::default();
    snapshot.promise = Promise::new(government, 0);
    snapshot
}

fn chain() -> Vec<LogEntry> {
    vec![
        LogEntry {
            promise: Promise::new(1, 0),
            previous: Promise::default(),
            body: Body::Government(boundary(1)),
        },
        LogEntry {
            promise: Promise::new(1, 1),
            previous: Promise::new(1, 0),
            body: Body::Entry(Bytes::from_static(b"one")),
        },
        LogEntry {
            promise: Promise::new(1, 2),
            previous: Promise::new(1, 1),
            body: Body::Entry(Bytes::from_static(b"two")),
        },
        LogEntry {
            promise: Promise::new(2, 0),
            previous: Promise::new(1, 2),
            body: Body::Government(boundary(2)),
        },
    ]
}
