#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use itertools::repeat_n;

use parliament::citizen::{Citizen, Config, Enqueued};
use parliament::government::Government;
use parliament::log::memory::InMemoryLog;
use parliament::log::Log;
use parliament::message::{
    Body, CitizenId, Cookie, Envelope, LogEntry, Promise, Republic, Response,
};
use parliament::{majority_size, Minstd};

pub const REPUBLIC: Republic = Republic(61);
pub const CONFIG: Config = Config {
    parliament_size: 5,
    ping: 1,
    timeout: 2,
    sync_commit_limit: 24,
};
const MAX_STEPS: usize = 10_000;
const MAX_TICKS: u64 = 64;

pub type TestCitizen = Citizen<InMemoryLog, Minstd>;

pub struct Cluster {
    pub citizens: Vec<TestCitizen>,
    pub now: u64,
    pub config: ClusterConfig,
}

#[derive(Clone, Default)]
pub struct ClusterConfig {
    pub drops: BTreeSet<(Option<usize>, Option<usize>)>,
    pub down: BTreeSet<usize>,
}

pub struct TestLogger;

struct TestLoggerContext {
    citizen: Option<usize>,
    now: Option<u64>,
}

pub fn id(index: usize) -> CitizenId {
    CitizenId::from(index.to_string())
}

pub fn ids(indices: &[usize]) -> Vec<CitizenId> {
    indices.iter().map(|index| id(*index)).collect()
}

pub fn properties(index: usize) -> Bytes {
    Bytes::from(index.to_string())
}

pub fn citizen(index: usize) -> TestCitizen {
    Citizen::new(
        id(index),
        Cookie(index as u64),
        REPUBLIC,
        CONFIG,
        InMemoryLog::new(),
        Minstd::new(2 * index as u32 + 1),
    )
}

//
// Cluster impls
//

impl Cluster {
    /// A cluster of `size` citizens with citizen `0` bootstrapped and the
    /// rest waiting to immigrate.
    pub fn new(size: usize) -> Self {
        TestLogger::init();
        TestLogger::set_now(Some(0));
        let mut cluster = Cluster {
            citizens: (0..size).map(citizen).collect(),
            now: 0,
            config: ClusterConfig::default(),
        };
        TestLogger::set_citizen(Some(0));
        cluster.citizens[0].bootstrap(0, properties(0));
        cluster.drain();
        cluster
    }

    pub fn leader_index(&self) -> Option<usize> {
        self.citizens.iter().position(|citizen| citizen.is_leader())
    }

    /// Admits citizen `index` through the current leader and drains.
    pub fn immigrate(&mut self, index: usize) -> Enqueued {
        let leader = self.leader_index().expect("no leader to admit a citizen");
        TestLogger::set_citizen(Some(leader));
        let outcome = self.citizens[leader].immigrate(
            self.now,
            REPUBLIC,
            id(index),
            Cookie(index as u64),
            properties(index),
        );
        self.drain();
        outcome
    }

    /// Enqueues an entry at citizen `index` and drains.
    pub fn enqueue(&mut self, index: usize, data: &'static [u8]) -> Enqueued {
        TestLogger::set_citizen(Some(index));
        let outcome = self.citizens[index].enqueue(self.now, REPUBLIC, Bytes::from_static(data));
        self.drain();
        outcome
    }

    /// Processes timers and traffic at the current instant until nothing
    /// more is due.
    pub fn drain(&mut self) {
        for _ in 0..MAX_STEPS {
            for index in 0..self.citizens.len() {
                if self.config.is_node_down(index) {
                    let _ = self.citizens[index].outbox();
                    continue;
                }
                TestLogger::set_citizen(Some(index));
                self.citizens[index].timer_tick(self.now);
            }
            let mut batch: Vec<(usize, Envelope)> = Vec::new();
            for index in 0..self.citizens.len() {
                if self.config.is_node_down(index) {
                    let _ = self.citizens[index].outbox();
                    continue;
                }
                for envelope in self.citizens[index].outbox() {
                    batch.push((index, envelope));
                }
            }
            if batch.is_empty() && !self.due() {
                TestLogger::set_citizen(None);
                return;
            }
            for (from, envelope) in batch {
                self.deliver(from, envelope);
            }
        }
        panic!("cluster failed to quiesce at {}", self.now);
    }

    /// Advances the clock tick by tick, draining at each instant.
    pub fn advance(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.now += 1;
            TestLogger::set_now(Some(self.now));
            self.drain();
        }
    }

    /// Advances until the condition holds, a tick at a time.
    pub fn run_until(&mut self, mut condition: impl FnMut(&mut Cluster) -> bool) -> &mut Self {
        for _ in 0..MAX_TICKS {
            if condition(self) {
                return self;
            }
            self.advance(1);
        }
        panic!("condition failed after maximum simulation length");
    }

    pub fn inspect(&mut self, fun: impl FnOnce(&Self)) -> &mut Self {
        fun(self);
        self
    }

    pub fn modify(&mut self, fun: impl FnOnce(&mut Self)) -> &mut Self {
        fun(self);
        self
    }

    pub fn government(&self, index: usize) -> &Government {
        self.citizens[index].government()
    }

    pub fn entries(&self, index: usize) -> Vec<LogEntry> {
        self.citizens[index]
            .log()
            .starting(&Promise::default(), usize::MAX)
    }

    /// Checks every cross-citizen invariant that must hold in any history.
    pub fn verify(&self) {
        for (index, citizen) in self.citizens.iter().enumerate() {
            let entries = self.entries(index);
            let propagated = citizen.minimum().propagated;
            // the trailer never advances past the propagated minimum
            assert!(
                entries.len() == 1 || entries[0].promise >= propagated,
                "citizen {} truncated past its minimum",
                index
            );
            for pair in entries.windows(2) {
                // heads are strictly increasing and chains never branch
                assert!(pair[1].promise > pair[0].promise);
                if pair[0].promise != Promise::default() {
                    assert_eq!(
                        pair[1].previous, pair[0].promise,
                        "citizen {} broke its chain at {}",
                        index, pair[1].promise
                    );
                }
            }
            let governments: Vec<&LogEntry> = entries
                .iter()
                .filter(|entry| matches!(entry.body, Body::Government(_)))
                .collect();
            for pair in governments.windows(2) {
                // contested recoveries may burn government numbers, but the
                // sequence only ever climbs
                assert!(
                    pair[1].promise.government > pair[0].promise.government,
                    "citizen {} reordered its governments",
                    index
                );
                assert_eq!(pair[1].promise.round, 0);
            }
            for entry in &governments {
                if let Body::Government(government) = &entry.body {
                    let seats = government.majority.len() + government.minority.len();
                    assert_eq!(seats % 2, 1, "an even parliament at {}", entry.promise);
                    assert!(seats <= CONFIG.parliament_size);
                    assert_eq!(government.majority.len(), majority_size(seats));
                }
            }
        }
        // any entry held by two citizens is the same entry
        for index in 0..self.citizens.len() {
            for other in index + 1..self.citizens.len() {
                for entry in self.entries(index) {
                    if let Some(held) = self.citizens[other].log().find(&entry.promise) {
                        assert_eq!(
                            held, &entry,
                            "citizens {} and {} disagree at {}",
                            index, other, entry.promise
                        );
                    }
                }
            }
        }
    }

    fn due(&self) -> bool {
        self.citizens.iter().enumerate().any(|(index, citizen)| {
            !self.config.is_node_down(index)
                && citizen.next_timeout().map_or(false, |when| when <= self.now)
        })
    }

    fn index_of(&self, id: &CitizenId) -> Option<usize> {
        id.as_str().parse::<usize>().ok().filter(|index| *index < self.citizens.len())
    }

    fn deliver(&mut self, from: usize, envelope: Envelope) {
        let mut responses: BTreeMap<CitizenId, Option<Response>> = BTreeMap::new();
        let addressees = envelope.to.clone();
        let count = addressees.len();
        for (to, request) in Iterator::zip(
            addressees.into_iter(),
            repeat_n(envelope.request.clone(), count),
        ) {
            let target = self.index_of(&to);
            let response = match target {
                Some(target)
                    if !self.config.should_drop(from, target)
                        && !self.config.is_node_down(target) =>
                {
                    TestLogger::set_citizen(Some(target));
                    let response = self.citizens[target].request(self.now, request);
                    if self.config.should_drop(target, from) {
                        None
                    } else {
                        response
                    }
                }
                _ => None,
            };
            responses.insert(to, response);
        }
        TestLogger::set_citizen(Some(from));
        self.citizens[from].response(self.now, envelope, responses);
    }
}

//
// ClusterConfig impls
//

impl ClusterConfig {
    pub fn node_down(mut self, index: usize) -> Self {
        self.down.insert(index);
        self
    }

    pub fn isolate(mut self, index: usize) -> Self {
        self.drops.insert((Some(index), None));
        self.drops.insert((None, Some(index)));
        self
    }

    pub fn drop_to(mut self, index: usize) -> Self {
        self.drops.insert((None, Some(index)));
        self
    }

    pub fn drop_between(mut self, from: usize, to: usize) -> Self {
        self.drops.insert((Some(from), Some(to)));
        self.drops.insert((Some(to), Some(from)));
        self
    }

    pub fn is_node_down(&self, index: usize) -> bool {
        self.down.contains(&index)
    }

    pub fn should_drop(&self, from: usize, to: usize) -> bool {
        self.drops.contains(&(Some(from), Some(to)))
            || self.drops.contains(&(Some(from), None))
            || self.drops.contains(&(None, Some(to)))
            || self.down.contains(&from)
            || self.down.contains(&to)
    }
}

//
// TestLogger impls
//

thread_local! {
    static LOGGER_CONTEXT: RefCell<TestLoggerContext> = RefCell::new(TestLoggerContext::new());
}

impl TestLogger {
    pub fn init() {
        let _ignore = log::set_logger(&Self);
        log::set_max_level(log::LevelFilter::Debug);
    }

    pub fn set_citizen(citizen: Option<usize>) {
        LOGGER_CONTEXT.with(|context| {
            context.borrow_mut().citizen = citizen;
        });
    }

    pub fn set_now(now: Option<u64>) {
        LOGGER_CONTEXT.with(|context| {
            context.borrow_mut().now = now;
        });
    }
}

impl log::Log for TestLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        LOGGER_CONTEXT.with(|context| {
            let context = context.borrow();
            match (context.now, context.citizen) {
                (Some(now), Some(citizen)) => {
                    eprintln!("now {:03} [{}] {}", now, citizen, record.args())
                }
                (Some(now), None) => eprintln!("now {:03} {}", now, record.args()),
                _ => eprintln!("{}", record.args()),
            }
        })
    }

    fn flush(&self) {}
}

//
// TestLoggerContext impls
//

impl TestLoggerContext {
    const fn new() -> Self {
        Self {
            citizen: None,
            now: None,
        }
    }
}
