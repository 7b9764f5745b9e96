//! A keyed timer driven by an injected clock.
//!
//! Scheduling an event under a key replaces any prior event under the same
//! key, which is what makes timer-driven retry idempotent: re-arming a ping
//! or a collapse deadline is a plain overwrite. The scheduler never
//! preempts; the outer driver supplies `now` and collects whatever is due.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::message::CitizenId;

/// A scheduled event. The event is its own key: scheduling `Synchronize` for
/// a peer replaces the pending synchronize for that same peer, and there is
/// at most one pending `Collapse` and one pending `Propose`.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Timeout {
    /// Synchronize with one constituent.
    Synchronize(CitizenId),

    /// Give up on the current government and start a Paxos round.
    Collapse,

    /// Send the prepare messages of a Paxos round.
    Propose,
}

/// A deterministic keyed timer. Given identical `now` inputs and identical
/// scheduling calls, due events come back in a stable order: deadline first,
/// insertion order breaking ties.
#[derive(Default)]
pub struct Scheduler {
    events: BTreeMap<Timeout, (u64, u64)>,
    inserted: u64,
}

impl Scheduler {
    /// Constructs an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `event` at `when`, replacing any pending occurrence of the
    /// same event.
    pub fn schedule(&mut self, when: u64, event: Timeout) {
        let order = self.inserted;
        self.inserted += 1;
        self.events.insert(event, (when, order));
    }

    /// Removes the pending occurrence of `event`, if any.
    pub fn unschedule(&mut self, event: &Timeout) {
        self.events.remove(event);
    }

    /// Removes every pending event.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// The earliest pending deadline.
    pub fn next(&self) -> Option<u64> {
        self.events.values().map(|(when, _)| *when).min()
    }

    /// Removes and returns every event due at `now`, deadline order first
    /// and insertion order breaking ties.
    pub fn due(&mut self, now: u64) -> Vec<Timeout> {
        let mut due: Vec<(u64, u64, Timeout)> = self
            .events
            .iter()
            .filter(|(_, (when, _))| *when <= now)
            .map(|(event, (when, order))| (*when, *order, event.clone()))
            .collect();
        due.sort();
        for (_, _, event) in &due {
            self.events.remove(event);
        }
        due.into_iter().map(|(_, _, event)| event).collect()
    }
}
