use common::*;

mod common;

use bytes::Bytes;
use parliament::citizen::Enqueued;
use parliament::message::{Body, Promise, Republic};

#[test]
fn bootstrap_installs_a_dictatorship() {
    let mut cluster = Cluster::new(1);
    let government = cluster.government(0);
    assert_eq!(government.promise, Promise::new(1, 0));
    assert_eq!(government.majority, ids(&[0]));
    assert!(government.minority.is_empty());
    assert!(government.constituents.is_empty());
    assert!(cluster.citizens[0].is_leader());
    assert!(!cluster.citizens[0].is_collapsed());
    cluster.verify();
}

#[test]
fn a_dictator_commits_alone() {
    let mut cluster = Cluster::new(1);
    // nothing constrains a lone citizen's truncation floor, so the trailer
    // chases the head and the consumer resumes at the newest entry
    let committed: Vec<_> = cluster.citizens[0].take_committed().collect();
    assert_eq!(committed.len(), 1);
    assert!(matches!(committed[0].body, Body::Government(_)));
    assert_eq!(committed[0].promise, Promise::new(1, 0));
    let outcome = cluster.enqueue(0, b"first");
    assert!(outcome.enqueued);
    assert_eq!(outcome.promise, Some(Promise::new(1, 1)));
    let committed: Vec<_> = cluster.citizens[0].take_committed().collect();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].body, Body::Entry(Bytes::from_static(b"first")));
    assert_eq!(committed[0].previous, Promise::new(1, 0));
    cluster.verify();
}

#[test]
fn a_dictator_survives_draining_timers() {
    let mut cluster = Cluster::new(1);
    cluster.advance(10);
    // no peers, no collapse: the bootstrap government stands
    assert_eq!(cluster.government(0).promise, Promise::new(1, 0));
    assert!(!cluster.citizens[0].is_collapsed());
}

#[test]
fn wrong_republic_is_refused() {
    let mut cluster = Cluster::new(1);
    let outcome =
        cluster.citizens[0].enqueue(cluster.now, Republic(99), Bytes::from_static(b"lost"));
    assert_eq!(
        outcome,
        Enqueued {
            enqueued: false,
            leader: None,
            promise: None,
        }
    );
}

#[test]
#[should_panic(expected = "already a citizen")]
fn bootstrap_is_once() {
    let mut cluster = Cluster::new(1);
    cluster.citizens[0].bootstrap(0, properties(0));
}
