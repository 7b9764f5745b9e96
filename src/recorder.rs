//! The two-phase commit follower path.
//!
//! A recorder accepts a write from the current leader as a provisional
//! entry, then finalizes it on the matching commit. Any request carrying a
//! promise beyond its expected next slot, or any Paxos message, converts the
//! recorder into an acceptor; the conversion is one-way until the next
//! government enacts.

use log::debug;

use crate::message::{LogEntry, Message, Promise, Reply};

/// The outcome of dispatching a message to the recording slot.
#[derive(Debug, PartialEq)]
pub enum Recorded {
    /// Answer the sender; nothing changed locally.
    Reply(Reply),

    /// Commit the entry to the log, then answer the sender.
    Commit(LogEntry, Reply),

    /// The slot must convert to an acceptor and the message be redispatched.
    Convert,
}

/// The follower half of two-phase commit.
pub struct Recorder {
    version: Promise,
    provisional: Option<LogEntry>,
}

impl Recorder {
    /// Constructs a recorder bound to a freshly enacted government.
    pub fn new(version: Promise) -> Self {
        Recorder {
            version,
            provisional: None,
        }
    }

    /// The government promise of writes this recorder accepts.
    pub fn version(&self) -> Promise {
        self.version
    }

    /// Dispatches a write or commit against the current log head.
    pub fn request(&mut self, head: &LogEntry, message: &Message) -> Recorded {
        match message {
            Message::Write {
                version,
                promise,
                body,
                ..
            } => {
                if *version != self.version {
                    return Recorded::Reply(Reply::Reject {
                        promise: self.version,
                    });
                }
                let base = head.promise;
                let expected = if body.is_government() {
                    base.increment_major()
                } else {
                    base.increment_minor()
                };
                if *promise == expected {
                    debug!("recording {}", promise);
                    self.provisional = Some(LogEntry {
                        promise: *promise,
                        previous: base,
                        body: body.clone(),
                    });
                    Recorded::Reply(Reply::Receipt { promise: *promise })
                } else if *promise > expected {
                    Recorded::Convert
                } else {
                    Recorded::Reply(Reply::Reject {
                        promise: head.promise,
                    })
                }
            }
            Message::Commit {
                version, promise, ..
            } => {
                if *version != self.version {
                    return Recorded::Reply(Reply::Reject {
                        promise: self.version,
                    });
                }
                match self.provisional.take() {
                    Some(entry) if entry.promise == *promise => {
                        Recorded::Commit(entry, Reply::Receipt { promise: *promise })
                    }
                    Some(entry) => {
                        self.provisional = Some(entry);
                        Recorded::Convert
                    }
                    None => Recorded::Convert,
                }
            }
            _ => Recorded::Convert,
        }
    }
}
