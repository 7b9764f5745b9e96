//! The Paxos proposer that recovers from a collapse.
//!
//! A collapsing citizen prefers itself as leader, fills the majority from
//! reachable members of the current government in deterministic order, and
//! relegates disappeared peers to the minority. It then drives a classical
//! round: prepare at a fresh government promise, adopt the highest value any
//! acceptor already holds, accept, learn.

use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;

use log::{debug, info};

use crate::government::Government;
use crate::majority_size;
use crate::message::{Body, CitizenId, LogEntry, Message, Promise, Reply};
use crate::writer::{Outgoing, Proposal};

/// What the proposer wants after digesting a reply.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Nothing yet; the round is still gathering replies.
    Wait,

    /// Ship this and keep going.
    Send(Outgoing),

    /// The round is dead; schedule another attempt.
    Retry,
}

enum Phase {
    Preparing,
    Accepting,
    Learning,
}

struct Round {
    promise: Promise,
    government: Government,
    previous: Promise,
    promised: BTreeSet<CitizenId>,
    accepted: Option<LogEntry>,
    accepts: BTreeSet<CitizenId>,
    phase: Phase,
}

/// The leader half of Paxos recovery.
pub struct Proposer {
    id: CitizenId,
    immediate: bool,
    conflicted: Promise,
    pending: Vec<Proposal>,
    round: Option<Round>,
}

impl Proposer {
    /// Constructs a proposer for a collapsed citizen. `immediate` marks the
    /// sitting leader, which retries without delay; `pending` is the old
    /// writer's queue, re-mapped if this proposer's government wins.
    pub fn new(id: CitizenId, immediate: bool, pending: Vec<Proposal>) -> Self {
        Proposer {
            id,
            immediate,
            conflicted: Promise::default(),
            pending,
            round: None,
        }
    }

    /// Whether this proposer was the sitting leader.
    pub fn immediate(&self) -> bool {
        self.immediate
    }

    /// The promise of the round currently in flight, if any.
    pub fn round_promise(&self) -> Option<Promise> {
        self.round.as_ref().map(|round| round.promise)
    }

    /// The proposals awaiting re-mapping by whichever government wins.
    pub fn pending(&self) -> &[Proposal] {
        &self.pending
    }

    /// Starts a round: elects a shape from the reachable members and claims
    /// a promise above both the current government and every rejection seen
    /// so far. Returns `None` when too few members are reachable to form a
    /// majority; the caller clears its disappearance evidence and retries.
    pub fn prepare(
        &mut self,
        government: &Government,
        disappeared: &BTreeSet<CitizenId>,
        head: Promise,
    ) -> Option<Outgoing> {
        let shape = elect(&self.id, government, disappeared)?;
        let promise = government.promise.max(self.conflicted).increment_major();
        info!("preparing {} over {}", promise, government.promise);
        let to = shape.majority.clone();
        self.round = Some(Round {
            promise,
            government: shape,
            previous: head,
            promised: BTreeSet::new(),
            accepted: None,
            accepts: BTreeSet::new(),
            phase: Phase::Preparing,
        });
        Some(Outgoing {
            to,
            messages: vec![Message::Prepare { promise }],
        })
    }

    /// Digests one acceptor's reply to the round it was addressed to, named
    /// by `round`. Replies aimed at a dead or superseded round are ignored;
    /// in particular a stale rejection never tears down the round in
    /// flight. A rejection carries the competing promise, which is what the
    /// next attempt must climb over, so the correlation runs on the
    /// addressed round rather than the carried one.
    pub fn reply(&mut self, from: &CitizenId, round: Promise, reply: &Reply) -> Outcome {
        let current = match &mut self.round {
            Some(current) if current.promise == round => current,
            _ => return Outcome::Wait,
        };
        match reply {
            Reply::Reject { promise } => {
                debug!("round {} rejected at {}", round, promise);
                self.conflicted = self.conflicted.max(*promise);
                self.round = None;
                Outcome::Retry
            }
            Reply::Promised { promise, accepted } if *promise == round => {
                if matches!(current.phase, Phase::Learning) {
                    return Outcome::Wait;
                }
                current.promised.insert(from.clone());
                if let Some(entry) = accepted {
                    let higher = current
                        .accepted
                        .as_ref()
                        .map_or(true, |held| entry.promise > held.promise);
                    if higher {
                        current.accepted = Some(entry.clone());
                    }
                }
                let complete = current
                    .government
                    .majority
                    .iter()
                    .all(|member| current.promised.contains(member));
                if !complete || !matches!(current.phase, Phase::Preparing) {
                    return Outcome::Wait;
                }
                current.phase = Phase::Accepting;
                let body = match current.accepted.take() {
                    Some(prior) => {
                        info!("adopting value accepted at {}", prior.promise);
                        rebrand(prior.body, round)
                    }
                    None => {
                        let mut government = current.government.clone();
                        government.promise = round;
                        let mut next = round;
                        for proposal in &self.pending {
                            next = next.increment_minor();
                            government.map.insert(proposal.promise, next);
                        }
                        Body::Government(government)
                    }
                };
                let entry = LogEntry {
                    promise: round,
                    previous: current.previous,
                    body,
                };
                Outcome::Send(Outgoing {
                    to: current.government.majority.clone(),
                    messages: vec![Message::Accept {
                        promise: round,
                        entry,
                    }],
                })
            }
            Reply::Receipt { promise } if *promise == round => {
                if !matches!(current.phase, Phase::Accepting) {
                    return Outcome::Wait;
                }
                current.accepts.insert(from.clone());
                let complete = current
                    .government
                    .majority
                    .iter()
                    .all(|member| current.accepts.contains(member));
                if !complete {
                    return Outcome::Wait;
                }
                info!("learning {}", round);
                current.phase = Phase::Learning;
                Outcome::Send(Outgoing {
                    to: current.government.majority.clone(),
                    messages: vec![Message::Learn { promise: round }],
                })
            }
            _ => Outcome::Wait,
        }
    }
}

/// Elects a government shape: the electing citizen first, then reachable
/// parliament members in seniority order, disappeared members relegated to
/// the back of the minority. Returns `None` when the reachable members
/// cannot form a majority.
pub fn elect(
    id: &CitizenId,
    government: &Government,
    disappeared: &BTreeSet<CitizenId>,
) -> Option<Government> {
    let members: Vec<CitizenId> = government.parliament().cloned().collect();
    let size = majority_size(members.len());
    let reachable = members
        .iter()
        .filter(|member| *member == id || !disappeared.contains(member))
        .count();
    if reachable < size {
        return None;
    }
    let mut order = vec![id.clone()];
    order.extend(
        members
            .iter()
            .filter(|member| *member != id && !disappeared.contains(member))
            .cloned(),
    );
    order.extend(
        members
            .iter()
            .filter(|member| *member != id && disappeared.contains(member))
            .cloned(),
    );
    Some(Government {
        promise: Promise::default(),
        majority: order[..size].to_vec(),
        minority: order[size..].to_vec(),
        constituents: government.constituents.clone(),
        properties: government.properties.clone(),
        immigrated: government.immigrated.clone(),
        map: Default::default(),
        immigrate: None,
        exile: None,
    })
}

fn rebrand(body: Body, promise: Promise) -> Body {
    match body {
        Body::Government(mut government) => {
            if let Some(immigration) = &government.immigrate {
                government.immigrated.remove(&immigration.id);
                government
                    .immigrated
                    .insert(immigration.id.clone(), promise);
            }
            let map = core::mem::take(&mut government.map);
            for (was, now) in map {
                government.map.insert(
                    was,
                    Promise::new(promise.government, now.round),
                );
            }
            government.promise = promise;
            Body::Government(government)
        }
        body => body,
    }
}
