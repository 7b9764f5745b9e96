//! The top-level participant: owns the log, the scheduler, both strategy
//! slots, the shaper, and the peer tables, and speaks the request/response
//! protocol.
//!
//! All operations on a citizen are serialized and run to completion; time is
//! injected as `now` and outbound traffic accumulates in an outbox the
//! driver drains. The two strategy slots are tagged variants: the writing
//! slot holds either the two-phase [`Writer`] or the recovering
//! [`Proposer`], the recording slot either the [`Recorder`] or the
//! [`Acceptor`]. Every dispatch goes through the slot, never around it.

use core::mem;

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec;
use alloc::vec::Vec;

use bytes::Bytes;
use log::{debug, info, warn};
use rand_core::RngCore;

use crate::acceptor::Acceptor;
use crate::government::{Government, Immigration};
use crate::log::{CommittedIter, Log};
use crate::message::{
    Body, CitizenId, Cookie, Envelope, LogEntry, Message, Minimum, Promise, Reply, Republic,
    Request, Response, Sync, SyncReply,
};
use crate::proposer::{Outcome, Proposer};
use crate::recorder::{Recorded, Recorder};
use crate::scheduler::{Scheduler, Timeout};
use crate::shaper::Shaper;
use crate::writer::{Outgoing, Proposal, Writer};

/// Configurable parameters of a citizen.
///
/// Every citizen of a republic must be configured identically, and `now`
/// must advance at the same rate everywhere, but the unit of time is the
/// caller's choice.
#[derive(Clone, Eq, PartialEq)]
pub struct Config {
    /// The parliament size membership grows toward; kept odd.
    pub parliament_size: usize,

    /// The delay between synchronizations with a caught-up constituent.
    pub ping: u64,

    /// How long a peer may stay silent before it is unreachable, and how
    /// long a voter waits for its leader before collapsing.
    pub timeout: u64,

    /// The most commits one synchronization will carry.
    pub sync_commit_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            parliament_size: 5,
            ping: 1,
            timeout: 2,
            sync_commit_limit: 24,
        }
    }
}

/// The outcome of [`enqueue`](Citizen::enqueue) and
/// [`immigrate`](Citizen::immigrate).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Enqueued {
    /// Whether the submission was admitted.
    pub enqueued: bool,

    /// The believed leader, when there is one to name. `None` while
    /// consensus is collapsed or the republic is unknown.
    pub leader: Option<CitizenId>,

    /// The promise assigned to an admitted entry.
    pub promise: Option<Promise>,
}

impl Enqueued {
    fn refused(leader: Option<CitizenId>) -> Self {
        Enqueued {
            enqueued: false,
            leader,
            promise: None,
        }
    }
}

/// What a citizen knows about one of the peers it synchronizes.
#[derive(Clone, Debug)]
struct Peer {
    committed: Promise,
    naturalized: bool,
    when: Option<u64>,
    reachable: bool,
    minimum: Option<Minimum>,
}

impl Default for Peer {
    fn default() -> Self {
        Peer {
            committed: Promise::default(),
            naturalized: false,
            when: None,
            reachable: true,
            minimum: None,
        }
    }
}

enum Writing {
    Writer(Writer),
    Proposer(Proposer),
}

enum Recording {
    Recorder(Recorder),
    Acceptor(Acceptor),
}

/// A participant in the cluster.
pub struct Citizen<L, Random> {
    id: CitizenId,
    cookie: Cookie,
    republic: Republic,
    config: Config,
    government: Government,
    log: L,
    scheduler: Scheduler,
    writing: Writing,
    recording: Recording,
    shaper: Shaper,
    peers: BTreeMap<CitizenId, Peer>,
    unreachable: BTreeMap<CitizenId, u64>,
    naturalized_evidence: BTreeSet<CitizenId>,
    propagated: Promise,
    outbox: Vec<Envelope>,
    random: Random,
}

impl<L, Random> Citizen<L, Random>
where
    L: Log,
    Random: RngCore,
{
    /// Constructs a citizen that has not yet joined any republic's history.
    /// It either [`bootstrap`]s a new cluster or waits to be immigrated into
    /// an existing one.
    ///
    /// [`bootstrap`]: Self::bootstrap
    pub fn new(
        id: CitizenId,
        cookie: Cookie,
        republic: Republic,
        config: Config,
        log: L,
        random: Random,
    ) -> Self {
        let version = Promise::default();
        Citizen {
            id,
            cookie,
            republic,
            config,
            government: Government::default(),
            log,
            scheduler: Scheduler::new(),
            writing: Writing::Writer(Writer::new(version)),
            recording: Recording::Recorder(Recorder::new(version)),
            shaper: Shaper::relay(),
            peers: BTreeMap::new(),
            unreachable: BTreeMap::new(),
            naturalized_evidence: BTreeSet::new(),
            propagated: Promise::default(),
            outbox: Vec::new(),
            random,
        }
    }

    /// This citizen's identity.
    pub fn id(&self) -> &CitizenId {
        &self.id
    }

    /// This citizen's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The currently enacted government.
    pub fn government(&self) -> &Government {
        &self.government
    }

    /// The believed leader.
    pub fn leader(&self) -> Option<&CitizenId> {
        self.government.leader()
    }

    /// Whether this citizen leads the current government.
    pub fn is_leader(&self) -> bool {
        self.government.leader() == Some(&self.id)
    }

    /// Whether consensus has collapsed and Paxos recovery is in progress.
    pub fn is_collapsed(&self) -> bool {
        matches!(self.writing, Writing::Proposer(_))
    }

    /// A view of the log storage.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// A mutable view of the log storage.
    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    /// The truncation state this citizen advertises.
    pub fn minimum(&self) -> Minimum {
        Minimum {
            version: self.government.promise,
            propagated: self.propagated,
            reduced: self.reduced(),
        }
    }

    /// The earliest pending timer deadline, for drivers that sleep.
    pub fn next_timeout(&self) -> Option<u64> {
        self.scheduler.next()
    }

    /// Drains the outbound envelopes accumulated by prior operations.
    pub fn outbox(&mut self) -> Vec<Envelope> {
        mem::take(&mut self.outbox)
    }

    /// An iterator yielding committed entries for the application layer.
    /// A given entry is yielded at most once over the citizen's lifetime.
    pub fn take_committed(&mut self) -> CommittedIter<'_, L> {
        CommittedIter::new(&mut self.log)
    }

    /// Installs a dictator government containing only this citizen.
    pub fn bootstrap(&mut self, now: u64, properties: Bytes) {
        assert!(
            self.government.promise == Promise::default(),
            "already a citizen under {}",
            self.government.promise
        );
        let promise = Promise::new(1, 0);
        let mut government = Government::default();
        government.promise = promise;
        government.majority = vec![self.id.clone()];
        government.properties.insert(self.id.clone(), properties.clone());
        government.immigrated.insert(self.id.clone(), promise);
        government.immigrate = Some(Immigration {
            id: self.id.clone(),
            properties,
            cookie: self.cookie,
        });
        info!("bootstrapping a republic led by {}", self.id);
        let entry = LogEntry {
            promise,
            previous: self.log.head().promise,
            body: Body::Government(government),
        };
        self.commit(now, entry);
    }

    /// Submits an entry for the distributed log.
    ///
    /// Fails when the republic is wrong, consensus has collapsed, or this
    /// citizen is not the leader; the outcome names the believed leader
    /// where one exists.
    pub fn enqueue(&mut self, _now: u64, republic: Republic, body: Bytes) -> Enqueued {
        if republic != self.republic || self.government.promise == Promise::default() {
            return Enqueued::refused(None);
        }
        let leader = self.government.leader().cloned();
        if leader.as_ref() != Some(&self.id) {
            return Enqueued::refused(leader);
        }
        if self.is_collapsed() {
            return Enqueued::refused(None);
        }
        let quorum = self.government.majority.clone();
        let (promise, outgoing) = match &mut self.writing {
            Writing::Writer(writer) => {
                let promise = writer.push(quorum, Body::Entry(body), None);
                (promise, writer.nudge())
            }
            Writing::Proposer(_) => return Enqueued::refused(None),
        };
        if let Some(outgoing) = outgoing {
            self.send(outgoing);
        }
        Enqueued {
            enqueued: true,
            leader: Some(self.id.clone()),
            promise: Some(promise),
        }
    }

    /// Requests admission of a new citizen.
    ///
    /// Fails like [`enqueue`], and also when the identity is already
    /// present; the caller must wait for an exile before retrying under the
    /// same name.
    ///
    /// [`enqueue`]: Self::enqueue
    pub fn immigrate(
        &mut self,
        _now: u64,
        republic: Republic,
        id: CitizenId,
        cookie: Cookie,
        properties: Bytes,
    ) -> Enqueued {
        if republic != self.republic || self.government.promise == Promise::default() {
            return Enqueued::refused(None);
        }
        let leader = self.government.leader().cloned();
        if leader.as_ref() != Some(&self.id) {
            return Enqueued::refused(leader);
        }
        if self.is_collapsed() {
            return Enqueued::refused(None);
        }
        if self.government.immigrated.contains(&id) {
            return Enqueued::refused(Some(self.id.clone()));
        }
        let immigration = Immigration {
            id,
            properties,
            cookie,
        };
        let shape = self.shaper.immigrate(&self.government, immigration);
        if let Some(shape) = shape {
            self.propose_government(shape);
        }
        Enqueued {
            enqueued: true,
            leader: Some(self.id.clone()),
            promise: None,
        }
    }

    /// Abandons two-phase commit and starts Paxos recovery. Driven by the
    /// collapse timer, by write rejections, and by tests that force the
    /// transition directly.
    pub fn collapse(&mut self, now: u64) {
        if self.government.promise == Promise::default() || self.is_collapsed() {
            return;
        }
        info!("collapsed at {}", self.government.promise);
        let leading = self.is_leader();
        if !leading {
            // the leader went silent on us; it runs for reelection from the
            // back of the pack
            if let Some(leader) = self.government.leader().cloned() {
                self.unreachable.entry(leader).or_insert(now);
            }
        }
        let pending = match &self.writing {
            Writing::Writer(writer) => writer.pending(),
            Writing::Proposer(proposer) => proposer.pending().to_vec(),
        };
        self.writing = Writing::Proposer(Proposer::new(self.id.clone(), leading, pending));
        if let Recording::Recorder(_) = self.recording {
            self.recording = Recording::Acceptor(Acceptor::new(self.government.promise));
        }
        self.scheduler.clear();
        let delay = if leading { 0 } else { self.jitter() };
        self.scheduler.schedule(now + delay, Timeout::Propose);
    }

    /// Fires every timer due at `now`.
    pub fn timer_tick(&mut self, now: u64) {
        for event in self.scheduler.due(now) {
            match event {
                Timeout::Synchronize(id) => self.synchronize(id),
                Timeout::Collapse => self.collapse(now),
                Timeout::Propose => self.propose_round(now),
            }
        }
    }

    /// The server side of the protocol. Applies the piggybacked sync,
    /// dispatches each message through the recording slot, and answers with
    /// this citizen's own sync, minimum, and reachability evidence. Returns
    /// `None` for traffic that does not validate; the driver reports the
    /// exchange as unreachable, which is all a stranger deserves to learn.
    pub fn request(&mut self, now: u64, mut request: Request) -> Option<Response> {
        if request.sync.republic != self.republic {
            warn!("dropping a request from republic {}", request.sync.republic);
            return None;
        }
        if self.government.promise != Promise::default() {
            match self.government.immigrated.promise_of(&request.sync.from) {
                Some(promise) if *promise == request.sync.promise => {}
                _ => {
                    warn!("dropping a request from a stale {}", request.sync.from);
                    return None;
                }
            }
        }
        let sender = request.sync.from.clone();
        let sender_committed = request.sync.committed;
        let commits = mem::take(&mut request.sync.commits);
        self.synchronized(now, commits);
        let minimum = request.sync.minimum;
        if minimum.version == self.government.promise && minimum.propagated > self.propagated {
            self.propagated = minimum.propagated;
            let shifted = self.log.shift(&self.propagated);
            if shifted > 0 {
                debug!("shifted {} entries, trailer now {}", shifted, self.log.trailer().promise);
            }
        }
        if sender != self.id
            && !self.is_collapsed()
            && self.government.majority.len() > 1
            && self.government.majority.contains(&self.id)
            && self.government.leader() == Some(&sender)
        {
            // the leader is alive, push the coup back
            self.scheduler
                .schedule(now + self.config.timeout, Timeout::Collapse);
        }
        let mut reply = Reply::Receipt {
            promise: self.log.head().promise,
        };
        for message in &request.messages {
            match message {
                Message::Synchronize | Message::Ping => {
                    reply = if sender_committed < self.log.head().promise {
                        Reply::Reject {
                            promise: self.log.head().promise,
                        }
                    } else {
                        Reply::Receipt {
                            promise: self.log.head().promise,
                        }
                    };
                }
                Message::Write { promise, body, .. } if *promise <= self.log.head().promise => {
                    // redelivery of an entry this citizen already holds
                    if let Some(existing) = self.log.find(promise) {
                        assert_eq!(&existing.body, body, "log diverged at {}", promise);
                    }
                    reply = Reply::Receipt { promise: *promise };
                }
                Message::Commit { promise, .. } if *promise <= self.log.head().promise => {
                    reply = Reply::Receipt { promise: *promise };
                }
                Message::Learn { promise } if *promise <= self.log.head().promise => {
                    reply = Reply::Receipt { promise: *promise };
                }
                message => {
                    reply = self.record(now, message);
                }
            }
            if let Reply::Reject { .. } = reply {
                break;
            }
        }
        let committed = self.log.head().promise;
        let commits = if sender_committed < committed {
            self.log.since(&sender_committed, self.config.sync_commit_limit)
        } else {
            Vec::new()
        };
        Some(Response {
            message: reply,
            sync: SyncReply { committed, commits },
            minimum: self.minimum(),
            unreachable: self.unreachable.clone(),
            naturalized: self.naturalized_evidence.iter().cloned().collect(),
        })
    }

    /// The client side of the protocol: digests the responses gathered for
    /// one of this citizen's own envelopes. `None` entries denote peers the
    /// transport could not reach.
    pub fn response(
        &mut self,
        now: u64,
        envelope: Envelope,
        responses: BTreeMap<CitizenId, Option<Response>>,
    ) {
        for (id, response) in &responses {
            if *id == self.id {
                continue;
            }
            match response {
                None => self.unreachable_exchange(now, id),
                Some(response) => self.reachable_exchange(now, id, response),
            }
        }
        match envelope.request.messages.first() {
            Some(Message::Synchronize) | Some(Message::Ping) => {
                self.synchronized_response(now, &envelope, &responses)
            }
            Some(Message::Write { .. }) | Some(Message::Commit { .. }) => {
                self.written_response(now, &envelope.request, &responses)
            }
            Some(Message::Prepare { .. })
            | Some(Message::Accept { .. })
            | Some(Message::Learn { .. }) => {
                self.recovered_response(now, &envelope.request, &responses)
            }
            None => {}
        }
        self.raise_minimum();
    }

    //
    // internal: the write path
    //

    fn propose_government(&mut self, mut shape: Government) {
        let promise = self.government.promise.increment_major();
        shape.promise = promise;
        if let Some(immigration) = shape.immigrate.clone() {
            shape.immigrated.insert(immigration.id, promise);
        }
        if let Writing::Writer(writer) = &self.writing {
            let mut next = promise;
            for proposal in writer.pending() {
                next = next.increment_minor();
                shape.map.insert(proposal.promise, next);
            }
        }
        info!("proposing {}", shape);
        let quorum = self.government.majority.clone();
        let outgoing = match &mut self.writing {
            Writing::Writer(writer) => {
                writer.unshift(Proposal {
                    promise,
                    quorum,
                    body: Body::Government(shape),
                    was: None,
                });
                writer.nudge()
            }
            // collapsed: recovery elects its own government instead
            Writing::Proposer(_) => None,
        };
        if let Some(outgoing) = outgoing {
            self.send(outgoing);
        }
    }

    fn written_response(
        &mut self,
        now: u64,
        request: &Request,
        responses: &BTreeMap<CitizenId, Option<Response>>,
    ) {
        let version = request.messages.iter().find_map(|message| message.version());
        let current = match &self.writing {
            Writing::Writer(writer) => writer.version(),
            Writing::Proposer(_) => return,
        };
        if version != Some(current) {
            // a round from a superseded government; its fate no longer matters
            return;
        }
        let rejected = responses.values().flatten().find_map(|response| match &response.message {
            Reply::Reject { promise } => Some(*promise),
            _ => None,
        });
        if let Some(promise) = rejected {
            info!("write rejected at {}", promise);
            self.collapse(now);
            return;
        }
        if responses.values().any(|response| response.is_none()) {
            // an unacknowledged write never advances; either the peer comes
            // back or the collapse timer settles it
            return;
        }
        let outgoings = match &mut self.writing {
            Writing::Writer(writer) => writer.advance(&request.messages),
            Writing::Proposer(_) => return,
        };
        for outgoing in outgoings {
            self.send(outgoing);
        }
    }

    //
    // internal: the recovery path
    //

    fn propose_round(&mut self, now: u64) {
        let mut disappeared: BTreeSet<CitizenId> = self.unreachable.keys().cloned().collect();
        for (id, peer) in &self.peers {
            if peer.when.is_some() {
                disappeared.insert(id.clone());
            }
        }
        let head = self.log.head().promise;
        let outgoing = match &mut self.writing {
            Writing::Proposer(proposer) => proposer.prepare(&self.government, &disappeared, head),
            Writing::Writer(_) => return,
        };
        match outgoing {
            Some(outgoing) => self.send(outgoing),
            None => {
                // desperation: nobody looks reachable, so assume the
                // evidence is stale and canvas everyone again
                info!("too few reachable members, clearing disappearances");
                self.unreachable.clear();
                for peer in self.peers.values_mut() {
                    peer.when = None;
                }
                self.scheduler
                    .schedule(now + self.config.timeout, Timeout::Propose);
            }
        }
    }

    fn recovered_response(
        &mut self,
        now: u64,
        request: &Request,
        responses: &BTreeMap<CitizenId, Option<Response>>,
    ) {
        // the round these replies are addressed to; the proposer discards
        // anything aimed at a round it has already abandoned
        let round = match request.messages.first() {
            Some(Message::Prepare { promise })
            | Some(Message::Accept { promise, .. })
            | Some(Message::Learn { promise }) => *promise,
            _ => return,
        };
        let mut outgoings = Vec::new();
        let mut rejected = false;
        let mut failed = false;
        let immediate = match &mut self.writing {
            Writing::Proposer(proposer) => {
                if proposer.round_promise() != Some(round) {
                    // stragglers from a round already abandoned
                    return;
                }
                for (id, response) in responses {
                    match response {
                        None => failed = true,
                        Some(response) => match proposer.reply(id, round, &response.message) {
                            Outcome::Wait => {}
                            Outcome::Send(outgoing) => outgoings.push(outgoing),
                            Outcome::Retry => rejected = true,
                        },
                    }
                }
                proposer.immediate()
            }
            // the round resolved underneath us, usually because a response
            // sync carried the winning government
            Writing::Writer(_) => return,
        };
        for outgoing in outgoings {
            self.send(outgoing);
        }
        // an acceptor that answered from behind cannot chain the decision;
        // pull it forward so the next round can land
        let head = self.log.head().promise;
        let laggards: Vec<CitizenId> = responses
            .iter()
            .filter_map(|(id, response)| match response {
                Some(response) if *id != self.id && response.sync.committed < head => {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect();
        for laggard in laggards {
            self.scheduler.schedule(now, Timeout::Synchronize(laggard));
        }
        if rejected {
            let delay = if immediate { 0 } else { self.jitter() };
            self.scheduler.schedule(now + delay, Timeout::Propose);
        } else if failed {
            self.scheduler
                .schedule(now + self.config.timeout, Timeout::Propose);
        }
    }

    fn record(&mut self, now: u64, message: &Message) -> Reply {
        loop {
            let recorded = match &mut self.recording {
                Recording::Recorder(recorder) => recorder.request(self.log.head(), message),
                Recording::Acceptor(acceptor) => acceptor.request(message),
            };
            match recorded {
                Recorded::Reply(reply) => return reply,
                Recorded::Commit(entry, reply) => {
                    let head = self.log.head().promise;
                    if entry.promise > head
                        && head != Promise::default()
                        && entry.previous != head
                    {
                        // this citizen is missing history; the decision has
                        // to arrive by synchronization instead
                        return Reply::Reject { promise: head };
                    }
                    self.commit(now, entry);
                    return reply;
                }
                Recorded::Convert => {
                    info!("recorder converting to acceptor at {}", self.government.promise);
                    self.recording = Recording::Acceptor(Acceptor::new(self.government.promise));
                }
            }
        }
    }

    //
    // internal: synchronization and reachability
    //

    fn synchronize(&mut self, id: CitizenId) {
        let committed = self
            .peers
            .get(&id)
            .map_or(Promise::default(), |peer| peer.committed);
        let limit = self.config.sync_commit_limit;
        let commits = if committed == Promise::default() {
            // an untouched peer may be a newcomer, whose chain must begin
            // with the government that admitted it
            match self.government.immigrated.promise_of(&id) {
                Some(promise) => self.log.starting(promise, limit),
                None => self.log.since(&committed, limit),
            }
        } else {
            self.log.since(&committed, limit)
        };
        let message = if commits.is_empty() {
            Message::Ping
        } else {
            Message::Synchronize
        };
        let sync = self.sync_segment(commits);
        self.outbox.push(Envelope {
            from: self.id.clone(),
            to: vec![id],
            request: Request {
                messages: vec![message],
                sync,
            },
        });
    }

    fn synchronized(&mut self, now: u64, commits: Vec<LogEntry>) {
        for entry in commits {
            let head = self.log.head().promise;
            if entry.promise <= head {
                if let Some(existing) = self.log.find(&entry.promise) {
                    assert_eq!(existing, &entry, "log diverged at {}", entry.promise);
                }
                continue;
            }
            if head == Promise::default() {
                let admitted = match &entry.body {
                    Body::Government(government) => government
                        .immigrate
                        .as_ref()
                        .map_or(false, |immigration| {
                            immigration.id == self.id && immigration.cookie == self.cookie
                        }),
                    Body::Entry(_) => false,
                };
                if !admitted {
                    break;
                }
                self.commit(now, entry);
            } else if entry.previous == head {
                self.commit(now, entry);
            } else {
                break;
            }
        }
    }

    fn reachable_exchange(&mut self, now: u64, id: &CitizenId, response: &Response) {
        {
            let peer = self.peers.entry(id.clone()).or_default();
            peer.reachable = true;
            peer.when = None;
            peer.committed = response.sync.committed;
            peer.minimum = Some(response.minimum);
        }
        self.unreachable.remove(id);
        self.synchronized(now, response.sync.commits.clone());
        for (reported, when) in &response.unreachable {
            if *reported == self.id || !self.government.immigrated.contains(reported) {
                continue;
            }
            self.unreachable.entry(reported.clone()).or_insert(*when);
        }
        let mut naturalized: Vec<CitizenId> = response.naturalized.clone();
        if response.sync.committed == self.log.head().promise {
            if let Some(peer) = self.peers.get_mut(id) {
                if !peer.naturalized {
                    peer.naturalized = true;
                    naturalized.push(id.clone());
                }
            }
        }
        for reported in naturalized {
            if reported != self.id && self.government.immigrated.contains(&reported) {
                self.naturalized_evidence.insert(reported);
            }
        }
        let mut shape = None;
        for reported in self.naturalized_evidence.iter().cloned().collect::<Vec<_>>() {
            shape = shape.or(self.shaper.naturalized(&self.government, &reported));
        }
        for reported in self.unreachable.keys().cloned().collect::<Vec<_>>() {
            shape = shape.or(self.shaper.unreachable(&self.government, &reported));
        }
        if let Some(shape) = shape {
            self.propose_government(shape);
        }
    }

    fn unreachable_exchange(&mut self, now: u64, id: &CitizenId) {
        let when = {
            let peer = self.peers.entry(id.clone()).or_default();
            if peer.when.is_none() {
                peer.when = Some(now);
            }
            peer.when.unwrap_or(now)
        };
        if now.saturating_sub(when) < self.config.timeout {
            return;
        }
        if let Some(peer) = self.peers.get_mut(id) {
            if peer.reachable {
                peer.reachable = false;
                warn!("{} is unreachable since {}", id, when);
            }
        }
        self.unreachable.entry(id.clone()).or_insert(when);
        let shape = self.shaper.unreachable(&self.government, id);
        if let Some(shape) = shape {
            self.propose_government(shape);
        }
    }

    fn synchronized_response(
        &mut self,
        now: u64,
        envelope: &Envelope,
        responses: &BTreeMap<CitizenId, Option<Response>>,
    ) {
        if self.is_collapsed() {
            return;
        }
        let to = match envelope.to.first() {
            Some(to) => to.clone(),
            None => return,
        };
        if self.government.constituency(&self.id).contains(&to) {
            let failed = responses.get(&to).map_or(true, |response| response.is_none());
            let caught = self
                .peers
                .get(&to)
                .map_or(false, |peer| peer.committed == self.log.head().promise);
            // a lagging constituent is pulsed again immediately, a caught-up
            // one on the ping cadence
            let delay = if failed || caught { self.config.ping } else { 0 };
            self.scheduler.schedule(now + delay, Timeout::Synchronize(to));
        }
        if self.is_leader() && self.government.majority.len() > 1 {
            let steady = self.government.majority[1..]
                .iter()
                .all(|member| self.peers.get(member).map_or(false, |peer| peer.when.is_none()));
            if steady {
                self.scheduler
                    .schedule(now + self.config.timeout, Timeout::Collapse);
            }
        }
    }

    fn reduced(&self) -> Promise {
        let constituency = self.government.constituency(&self.id);
        let mut floor = self.log.head().promise;
        for id in &constituency {
            match self.peers.get(id).and_then(|peer| peer.minimum) {
                Some(minimum) if minimum.version == self.government.promise => {
                    floor = floor.min(minimum.reduced);
                }
                _ => return Promise::default(),
            }
        }
        floor
    }

    fn raise_minimum(&mut self) {
        if self.is_collapsed() || !self.is_leader() {
            return;
        }
        let reduced = self.reduced();
        if reduced > self.propagated {
            self.propagated = reduced;
            let shifted = self.log.shift(&reduced);
            debug!("raised the truncation minimum to {}, shifted {}", reduced, shifted);
        }
    }

    //
    // internal: commit and enactment
    //

    fn commit(&mut self, now: u64, entry: LogEntry) {
        let head = self.log.head().promise;
        if entry.promise <= head {
            // redelivery is a no-op, but never a divergence
            if let Some(existing) = self.log.find(&entry.promise) {
                assert_eq!(existing, &entry, "log diverged at {}", entry.promise);
            }
            return;
        }
        debug!("committing {}", entry);
        let government = match &entry.body {
            Body::Government(government) => Some(government.clone()),
            Body::Entry(_) => None,
        };
        self.log
            .push(entry)
            .unwrap_or_else(|_| panic!("log chain broken at {}", head));
        if let Some(government) = government {
            self.enact(now, government);
        }
    }

    fn enact(&mut self, now: u64, mut government: Government) {
        assert!(
            government.promise.is_boundary() && government.promise > self.government.promise,
            "government {} enacted over {}",
            government.promise,
            self.government.promise
        );
        if let Some(exile) = government.exile.clone() {
            government.properties.remove(&exile);
            government.immigrated.remove(&exile);
            self.peers.remove(&exile);
            self.unreachable.remove(&exile);
            self.naturalized_evidence.remove(&exile);
        }
        info!("enacted {}", government);
        let immigrating = self.shaper.take_immigrating();
        let pending = match &self.writing {
            Writing::Writer(writer) => writer.pending(),
            Writing::Proposer(proposer) => proposer.pending().to_vec(),
        };
        self.government = government;
        self.scheduler.clear();
        let version = self.government.promise;
        let leading = self.government.leader() == Some(&self.id);
        let mut writer = Writer::new(version);
        if leading {
            let quorum = self.government.majority.clone();
            for proposal in pending {
                let original = proposal.was.unwrap_or(proposal.promise);
                writer.push(quorum.clone(), proposal.body, Some(original));
            }
        }
        self.writing = Writing::Writer(writer);
        self.recording = Recording::Recorder(Recorder::new(version));
        self.shaper = if leading {
            Shaper::assembly(self.config.parliament_size, immigrating)
        } else {
            Shaper::relay()
        };
        let constituency = self.government.constituency(&self.id);
        let mut peers = BTreeMap::new();
        for id in &constituency {
            let mut peer = self.peers.remove(id).unwrap_or_default();
            peer.naturalized = false;
            peer.minimum = None;
            peers.insert(id.clone(), peer);
        }
        self.peers = peers;
        // recovery may have succeeded despite stale disappearance evidence
        let voters: Vec<CitizenId> = self.government.parliament().cloned().collect();
        for voter in &voters {
            self.unreachable.remove(voter);
            if let Some(peer) = self.peers.get_mut(voter) {
                peer.when = None;
                peer.reachable = true;
            }
        }
        self.naturalized_evidence.clear();
        for id in &constituency {
            self.scheduler.schedule(now, Timeout::Synchronize(id.clone()));
        }
        if self.government.majority.len() > 1 && self.government.majority.contains(&self.id) {
            self.scheduler
                .schedule(now + self.config.timeout, Timeout::Collapse);
        }
        if leading {
            let mut shape = None;
            for id in self.unreachable.keys().cloned().collect::<Vec<_>>() {
                shape = shape.or(self.shaper.unreachable(&self.government, &id));
            }
            shape = shape.or(self.shaper.advance(&self.government));
            if let Some(shape) = shape {
                self.propose_government(shape);
            }
            let outgoing = match &mut self.writing {
                Writing::Writer(writer) => writer.nudge(),
                Writing::Proposer(_) => None,
            };
            if let Some(outgoing) = outgoing {
                self.send(outgoing);
            }
        }
    }

    //
    // internal: plumbing
    //

    fn sync_segment(&self, commits: Vec<LogEntry>) -> Sync {
        Sync {
            republic: self.republic,
            from: self.id.clone(),
            promise: self
                .government
                .immigrated
                .promise_of(&self.id)
                .copied()
                .unwrap_or_default(),
            minimum: self.minimum(),
            committed: self.log.head().promise,
            commits,
        }
    }

    fn send(&mut self, outgoing: Outgoing) {
        let sync = self.sync_segment(Vec::new());
        self.outbox.push(Envelope {
            from: self.id.clone(),
            to: outgoing.to,
            request: Request {
                messages: outgoing.messages,
                sync,
            },
        });
    }

    fn jitter(&mut self) -> u64 {
        self.random.next_u32() as u64 % self.config.timeout.max(1)
    }
}
