//! Protocol data model shared by every component of the engine.
//!
//! This module provides the types exchanged between citizens. The top-level
//! outbound type is [`Envelope`]; the driver ships an envelope's [`Request`]
//! to each addressee and returns the gathered [`Response`]s (or `None` for an
//! unreachable peer) back into the sending citizen. No wire encoding is
//! prescribed; every type here is a plain data structure.

use core::cmp::Ordering;
use core::fmt;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use bytes::Bytes;

use crate::government::Government;

/// A two-part monotonic version: government number and round number, compared
/// lexicographically. Every position of the distributed log is identified by
/// a unique promise.
///
/// `g/0` denotes a government boundary. [`increment_major`] bumps the
/// government and resets the round; [`increment_minor`] bumps the round.
///
/// [`increment_major`]: Self::increment_major
/// [`increment_minor`]: Self::increment_minor
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Promise {
    /// The government number.
    pub government: u64,

    /// The round number within the government.
    pub round: u64,
}

/// A citizen's identity within a republic, a plain opaque name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CitizenId(String);

/// A generation marker assigned when a citizen process is created. A citizen
/// that restarts re-immigrates under a new cookie; messages from the previous
/// incarnation no longer validate.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Cookie(pub u64);

/// A cluster identifier shared by every citizen of one cluster. Requests
/// carrying a different republic are dropped.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Republic(pub u64);

/// The truncation state a citizen advertises: the government version it was
/// computed under, the floor it has adopted, and the floor it could reduce
/// to given what its constituents have reported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Minimum {
    /// The government promise this triple was computed under.
    pub version: Promise,

    /// The truncation floor adopted by this citizen. Entries with a promise
    /// strictly less than this are eligible for garbage collection.
    pub propagated: Promise,

    /// The floor this citizen could reduce to: the minimum over its own head
    /// and everything its constituents have reported under [`version`], or
    /// `0/0` when a constituent has yet to report.
    ///
    /// [`version`]: Self::version
    pub reduced: Promise,
}

/// The payload of a log entry: either a membership change or application
/// data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Body {
    /// A new government to enact.
    Government(Government),

    /// Arbitrary application data.
    Entry(Bytes),
}

/// An entry of the atomic log. `previous` is the promise of the entry
/// immediately preceding it in the canonical sequence; the chain never
/// branches after commit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    /// The promise uniquely identifying this entry's position.
    pub promise: Promise,

    /// The promise of the entry immediately preceding this one.
    pub previous: Promise,

    /// The entry payload.
    pub body: Body,
}

/// A message sent from one citizen to another inside a [`Request`].
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A log catch-up carrying commits in its sync segment.
    Synchronize,

    /// A reachability probe with nothing new to replicate.
    Ping,

    /// Two-phase commit, first phase: record a provisional entry.
    Write {
        /// The promise of the government the write was issued under. A
        /// recorder only accepts writes whose version matches its own
        /// exactly; a collapsed citizen has no writer at all, so nothing is
        /// ever issued under a collapsed government.
        version: Promise,
        /// The promise of the provisional entry.
        promise: Promise,
        /// The entry payload.
        body: Body,
        /// The promise this proposal held before a government re-mapped it.
        was: Option<Promise>,
    },

    /// Two-phase commit, second phase: finalize the provisional entry.
    Commit {
        /// The promise of the government the commit was issued under.
        version: Promise,
        /// The promise of the entry to finalize.
        promise: Promise,
    },

    /// Paxos, first phase: claim a round promise.
    Prepare {
        /// The round promise being claimed.
        promise: Promise,
    },

    /// Paxos, second phase: accept a value at a claimed promise.
    Accept {
        /// The round promise of the proposal.
        promise: Promise,
        /// The entry to accept.
        entry: LogEntry,
    },

    /// Paxos, final phase: commit the accepted value.
    Learn {
        /// The round promise of the accepted proposal.
        promise: Promise,
    },
}

/// A responder's verdict on a [`Request`].
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// The request was applied. Carries the responder's head promise.
    Receipt {
        /// The responder's head promise.
        promise: Promise,
    },

    /// The request conflicts with a higher promise or a newer government.
    /// Carries the promise that caused the rejection.
    Reject {
        /// The competing promise.
        promise: Promise,
    },

    /// A Paxos prepare was granted, together with the highest value this
    /// acceptor previously accepted, if any.
    Promised {
        /// The granted round promise.
        promise: Promise,
        /// The highest previously accepted value.
        accepted: Option<LogEntry>,
    },
}

/// The synchronization segment piggybacked on every outgoing request.
#[derive(Clone, Debug, PartialEq)]
pub struct Sync {
    /// The sender's cluster identifier.
    pub republic: Republic,

    /// The sender's identity.
    pub from: CitizenId,

    /// The promise of the government under which the sender immigrated, used
    /// by the receiver to validate the sender's generation.
    pub promise: Promise,

    /// The sender's truncation state.
    pub minimum: Minimum,

    /// The promise of the sender's log head.
    pub committed: Promise,

    /// Committed entries the receiver is believed to lack, in order.
    pub commits: Vec<LogEntry>,
}

/// The return synchronization segment carried by every [`Response`], letting
/// a sender that has fallen behind catch up from its own responder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncReply {
    /// The promise of the responder's log head.
    pub committed: Promise,

    /// Committed entries the requester was observed to lack, in order.
    pub commits: Vec<LogEntry>,
}

/// The request half of an exchange: one or more messages plus the mandatory
/// sync segment. The leader packs at most two two-phase messages into one
/// request, a commit of the previous entry and a write of the next.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// The messages to apply, in order.
    pub messages: Vec<Message>,

    /// The piggybacked synchronization segment.
    pub sync: Sync,
}

/// The response half of an exchange. A `None` in the driver's gathered map
/// denotes network failure and is treated as an unreachable exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// The responder's verdict.
    pub message: Reply,

    /// The responder's return sync segment.
    pub sync: SyncReply,

    /// The responder's truncation state.
    pub minimum: Minimum,

    /// Peers the responder knows to be unreachable, keyed by the time each
    /// first failed. Relayed up the synchronization tree so evidence about
    /// constituents reaches the leader.
    pub unreachable: BTreeMap<CitizenId, u64>,

    /// Peers the responder knows to have fully caught up under the current
    /// government. Relayed up the synchronization tree like `unreachable`.
    pub naturalized: Vec<CitizenId>,
}

/// An outbound envelope: a request addressed to one or more citizens. The
/// driver delivers the request to every addressee and hands the gathered
/// responses back to the sender's `response` operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// The sending citizen.
    pub from: CitizenId,

    /// The addressees.
    pub to: Vec<CitizenId>,

    /// The request to deliver.
    pub request: Request,
}

//
// Promise impls
//

impl Promise {
    /// Constructs a promise from its parts.
    pub fn new(government: u64, round: u64) -> Self {
        Promise { government, round }
    }

    /// The next government boundary: bumps the government number and resets
    /// the round to zero.
    pub fn increment_major(self) -> Self {
        Promise {
            government: self
                .government
                .checked_add(1)
                .unwrap_or_else(|| panic!("promise overflow")),
            round: 0,
        }
    }

    /// The next round within the same government.
    pub fn increment_minor(self) -> Self {
        Promise {
            government: self.government,
            round: self
                .round
                .checked_add(1)
                .unwrap_or_else(|| panic!("promise overflow")),
        }
    }

    /// Whether this promise denotes a government boundary.
    pub fn is_boundary(&self) -> bool {
        self.round == 0
    }
}

impl PartialOrd for Promise {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Promise {
    fn cmp(&self, other: &Self) -> Ordering {
        self.government
            .cmp(&other.government)
            .then(self.round.cmp(&other.round))
    }
}

impl fmt::Display for Promise {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}/{}", self.government, self.round)
    }
}

//
// CitizenId impls
//

impl CitizenId {
    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CitizenId {
    fn from(id: &str) -> Self {
        CitizenId(id.into())
    }
}

impl From<String> for CitizenId {
    fn from(id: String) -> Self {
        CitizenId(id)
    }
}

impl fmt::Display for CitizenId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, fmt)
    }
}

//
// Cookie impls
//

impl fmt::Display for Cookie {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("Cookie").field(&self.0).finish()
    }
}

//
// Republic impls
//

impl fmt::Display for Republic {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("Republic").field(&self.0).finish()
    }
}

//
// Minimum impls
//

impl fmt::Display for Minimum {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            version,
            propagated,
            reduced,
        } = self;
        fmt.debug_struct("Minimum")
            .field("version", &format_args!("{}", version))
            .field("propagated", &format_args!("{}", propagated))
            .field("reduced", &format_args!("{}", reduced))
            .finish()
    }
}

//
// Body impls
//

impl Body {
    /// Whether this payload is a membership change.
    pub fn is_government(&self) -> bool {
        matches!(self, Body::Government(_))
    }
}

//
// LogEntry impls
//

impl fmt::Display for LogEntry {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.body {
            Body::Government(_) => "government",
            Body::Entry(_) => "entry",
        };
        fmt.debug_struct("LogEntry")
            .field("promise", &format_args!("{}", self.promise))
            .field("previous", &format_args!("{}", self.previous))
            .field("kind", &kind)
            .finish()
    }
}

//
// Message impls
//

impl fmt::Display for Message {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Synchronize => fmt.write_str("Synchronize"),
            Message::Ping => fmt.write_str("Ping"),
            Message::Write {
                version, promise, ..
            } => write!(fmt, "Write({} at {})", promise, version),
            Message::Commit {
                version, promise, ..
            } => write!(fmt, "Commit({} at {})", promise, version),
            Message::Prepare { promise } => write!(fmt, "Prepare({})", promise),
            Message::Accept { promise, .. } => write!(fmt, "Accept({})", promise),
            Message::Learn { promise } => write!(fmt, "Learn({})", promise),
        }
    }
}

impl Message {
    /// The government promise a two-phase commit message was issued under,
    /// if it is one.
    pub fn version(&self) -> Option<Promise> {
        match self {
            Message::Write { version, .. } | Message::Commit { version, .. } => Some(*version),
            _ => None,
        }
    }
}

//
// Reply impls
//

impl fmt::Display for Reply {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Receipt { promise } => write!(fmt, "Receipt({})", promise),
            Reply::Reject { promise } => write!(fmt, "Reject({})", promise),
            Reply::Promised { promise, accepted } => {
                write!(fmt, "Promised({}, accepted: {})", promise, accepted.is_some())
            }
        }
    }
}
