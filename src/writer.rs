//! The two-phase commit pipeline used by a leader while consensus holds.
//!
//! Client proposals queue behind at most two in-flight slots: the entry
//! being committed and, optionally, the next entry being written. The leader
//! packs a commit and the next write into one round only when neither is a
//! government boundary, so governments always land alone and clear the
//! pipeline. Any rejection collapses the leader into a Paxos round.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use log::debug;

use crate::message::{Body, CitizenId, Message, Promise};

/// A queued client proposal, owned by the writer until it commits or a new
/// government re-maps it.
#[derive(Clone, Debug, PartialEq)]
pub struct Proposal {
    /// The promise assigned to the proposal.
    pub promise: Promise,

    /// The voters whose receipts commit the proposal.
    pub quorum: Vec<CitizenId>,

    /// The proposal payload.
    pub body: Body,

    /// The promise this proposal held before a government re-mapped it.
    pub was: Option<Promise>,
}

/// A request the writer wants shipped, not yet wrapped in an envelope; the
/// citizen attaches the sync segment and routes it.
#[derive(Debug, PartialEq)]
pub struct Outgoing {
    /// The addressees.
    pub to: Vec<CitizenId>,

    /// The messages to deliver.
    pub messages: Vec<Message>,
}

struct Flight {
    proposal: Proposal,
    committing: bool,
}

/// The leader half of two-phase commit.
pub struct Writer {
    version: Promise,
    cursor: Promise,
    proposals: VecDeque<Proposal>,
    writing: VecDeque<Flight>,
}

impl Writer {
    /// Constructs an idle writer bound to a freshly enacted government.
    pub fn new(version: Promise) -> Self {
        Writer {
            cursor: version,
            version,
            proposals: VecDeque::new(),
            writing: VecDeque::new(),
        }
    }

    /// The government promise this writer stamps onto its messages.
    pub fn version(&self) -> Promise {
        self.version
    }

    /// Whether nothing is queued or in flight.
    pub fn idle(&self) -> bool {
        self.proposals.is_empty() && self.writing.is_empty()
    }

    /// Appends a proposal, assigning it the next minor promise.
    pub fn push(&mut self, quorum: Vec<CitizenId>, body: Body, was: Option<Promise>) -> Promise {
        self.cursor = self.cursor.increment_minor();
        let promise = self.cursor;
        self.proposals.push_back(Proposal {
            promise,
            quorum,
            body,
            was,
        });
        promise
    }

    /// Prepends a proposal carrying its own promise, so a government jumps
    /// the queue.
    pub fn unshift(&mut self, proposal: Proposal) {
        self.cursor = self.cursor.max(proposal.promise);
        self.proposals.push_front(proposal);
    }

    /// Moves the head proposal into flight if nothing is in flight, yielding
    /// the write to send to its quorum.
    pub fn nudge(&mut self) -> Option<Outgoing> {
        if !self.writing.is_empty() {
            return None;
        }
        let proposal = self.proposals.pop_front()?;
        debug!("writing {} to a quorum of {}", proposal.promise, proposal.quorum.len());
        let outgoing = Outgoing {
            to: proposal.quorum.clone(),
            messages: vec![Message::Write {
                version: self.version,
                promise: proposal.promise,
                body: proposal.body.clone(),
                was: proposal.was,
            }],
        };
        self.writing.push_back(Flight {
            proposal,
            committing: false,
        });
        Some(outgoing)
    }

    /// Advances the pipeline after a fully acknowledged round.
    ///
    /// For each acknowledged write, the slot moves to its commit phase and
    /// the next proposal may be piggybacked as a second write when neither
    /// entry is a government boundary. For each acknowledged commit, the
    /// slot retires and the queue is nudged. The caller has already
    /// established that the round carried this writer's version and that no
    /// response was a rejection.
    pub fn advance(&mut self, messages: &[Message]) -> Vec<Outgoing> {
        let mut outgoing = Vec::new();
        for message in messages {
            match message {
                Message::Write { promise, .. } => {
                    let slot = match self
                        .writing
                        .iter_mut()
                        .find(|flight| flight.proposal.promise == *promise && !flight.committing)
                    {
                        Some(flight) => flight,
                        None => continue,
                    };
                    slot.committing = true;
                    let to = slot.proposal.quorum.clone();
                    let boundary = slot.proposal.body.is_government();
                    let mut round = vec![Message::Commit {
                        version: self.version,
                        promise: *promise,
                    }];
                    if self.writing.len() == 1 && !boundary {
                        let piggyback = self
                            .proposals
                            .front()
                            .map_or(false, |next| !next.body.is_government());
                        if piggyback {
                            let next = self
                                .proposals
                                .pop_front()
                                .unwrap_or_else(|| panic!("piggyback vanished"));
                            round.push(Message::Write {
                                version: self.version,
                                promise: next.promise,
                                body: next.body.clone(),
                                was: next.was,
                            });
                            self.writing.push_back(Flight {
                                proposal: next,
                                committing: false,
                            });
                        }
                    }
                    outgoing.push(Outgoing {
                        to,
                        messages: round,
                    });
                }
                Message::Commit { promise, .. } => {
                    let retired = self
                        .writing
                        .front()
                        .map_or(false, |flight| {
                            flight.proposal.promise == *promise && flight.committing
                        });
                    if retired {
                        self.writing.pop_front();
                        debug!("committed {}", promise);
                        if let Some(nudged) = self.nudge() {
                            outgoing.push(nudged);
                        }
                    }
                }
                _ => {}
            }
        }
        outgoing
    }

    /// The proposals a superseding government must re-map: everything queued
    /// or in flight, governments excluded, in pipeline order.
    pub fn pending(&self) -> Vec<Proposal> {
        self.writing
            .iter()
            .map(|flight| &flight.proposal)
            .chain(self.proposals.iter())
            .filter(|proposal| !proposal.body.is_government())
            .cloned()
            .collect()
    }
}
