//! The Paxos acceptor used while consensus is being recovered.
//!
//! An acceptor enforces the one Paxos invariant that matters: never accept a
//! proposal below the highest promise it has granted. Two-phase traffic
//! arriving at an acceptor is rejected outright, which is what collapses a
//! leader that has not yet noticed the recovery.

use log::debug;

use crate::message::{LogEntry, Message, Promise, Reply};
use crate::recorder::Recorded;

/// The acceptor half of Paxos recovery.
pub struct Acceptor {
    promised: Promise,
    accepted: Option<LogEntry>,
}

impl Acceptor {
    /// Constructs an acceptor that will grant nothing at or below the
    /// currently enacted government.
    pub fn new(promised: Promise) -> Self {
        Acceptor {
            promised,
            accepted: None,
        }
    }

    /// The highest promise granted so far.
    pub fn promised(&self) -> Promise {
        self.promised
    }

    /// Dispatches a message against the acceptor's state.
    pub fn request(&mut self, message: &Message) -> Recorded {
        match message {
            Message::Prepare { promise } => {
                if *promise > self.promised {
                    debug!("promised {}", promise);
                    self.promised = *promise;
                    Recorded::Reply(Reply::Promised {
                        promise: *promise,
                        accepted: self.accepted.clone(),
                    })
                } else {
                    Recorded::Reply(Reply::Reject {
                        promise: self.promised,
                    })
                }
            }
            Message::Accept { promise, entry } => {
                if *promise >= self.promised {
                    debug!("accepted {}", promise);
                    self.promised = *promise;
                    self.accepted = Some(entry.clone());
                    Recorded::Reply(Reply::Receipt { promise: *promise })
                } else {
                    Recorded::Reply(Reply::Reject {
                        promise: self.promised,
                    })
                }
            }
            Message::Learn { promise } => match &self.accepted {
                Some(entry) if entry.promise == *promise => Recorded::Commit(
                    entry.clone(),
                    Reply::Receipt { promise: *promise },
                ),
                _ => Recorded::Reply(Reply::Reject {
                    promise: self.promised,
                }),
            },
            _ => Recorded::Reply(Reply::Reject {
                promise: self.promised,
            }),
        }
    }
}
