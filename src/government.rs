//! Membership snapshots and the topology derived from them.
//!
//! A government is installed by a committed log entry at a `g/0` promise and
//! is immutable once enacted. It names the voters (majority and minority),
//! the non-voting constituents, per-citizen properties, and the generation
//! bookkeeping used to validate peers across membership changes.

use core::fmt;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use bytes::Bytes;

use crate::message::{CitizenId, Cookie, Promise};

/// An immutable membership snapshot.
///
/// The leader is `majority[0]`. The parliament is `majority ∪ minority`;
/// constituents are every citizen outside the parliament. Synchronization
/// fans out along the topology: the leader to the rest of the majority, the
/// majority to the minority, the minority to the constituents.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Government {
    /// The `g/0` promise this government was committed at.
    pub promise: Promise,

    /// The voters forming a quorum; the first is the leader.
    pub majority: Vec<CitizenId>,

    /// The voters outside the majority.
    pub minority: Vec<CitizenId>,

    /// Non-voting citizens, replicated to but never consulted.
    pub constituents: Vec<CitizenId>,

    /// Opaque per-citizen properties supplied at immigration.
    pub properties: BTreeMap<CitizenId, Bytes>,

    /// Which government each current citizen immigrated under.
    pub immigrated: Immigrated,

    /// Re-mapping of proposals that were pending when this government was
    /// proposed: prior promise to post-government promise.
    pub map: BTreeMap<Promise, Promise>,

    /// The citizen admitted by this government, if any.
    pub immigrate: Option<Immigration>,

    /// The citizen expelled by this government, if any.
    pub exile: Option<CitizenId>,
}

/// A request to admit a new citizen, recorded in the government that admits
/// it so the newcomer can recognize its own naturalization papers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Immigration {
    /// The identity of the new citizen.
    pub id: CitizenId,

    /// The new citizen's properties.
    pub properties: Bytes,

    /// The new citizen's generation marker.
    pub cookie: Cookie,
}

/// A bijection between current citizens and the government promise each
/// immigrated under, usable as a generation cookie in either direction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Immigrated {
    promises: BTreeMap<CitizenId, Promise>,
    ids: BTreeMap<Promise, CitizenId>,
}

//
// Government impls
//

impl Government {
    /// The leader, `majority[0]`, or `None` before any government exists.
    pub fn leader(&self) -> Option<&CitizenId> {
        self.majority.first()
    }

    /// The voters: majority followed by minority.
    pub fn parliament(&self) -> impl Iterator<Item = &CitizenId> {
        self.majority.iter().chain(self.minority.iter())
    }

    /// Every citizen: parliament followed by constituents.
    pub fn citizens(&self) -> impl Iterator<Item = &CitizenId> {
        self.parliament().chain(self.constituents.iter())
    }

    /// Whether `id` holds a parliament seat.
    pub fn is_voter(&self, id: &CitizenId) -> bool {
        self.parliament().any(|member| member == id)
    }

    /// The peers `id` is responsible for synchronizing.
    ///
    /// The leader covers the rest of the majority; the other majority
    /// members share the minority round-robin; the minority shares the
    /// constituents round-robin. A majority of one covers its minority
    /// directly, or its constituents when the minority is empty, so nobody
    /// is left without an upstream.
    pub fn constituency(&self, id: &CitizenId) -> Vec<CitizenId> {
        if self.leader() == Some(id) {
            if self.majority.len() > 1 {
                return self.majority[1..].to_vec();
            }
            if !self.minority.is_empty() {
                return self.minority.clone();
            }
            return self.constituents.clone();
        }
        if let Some(seat) = self.majority.iter().position(|member| member == id) {
            let peers = self.majority.len() - 1;
            let wards = if self.minority.is_empty() {
                &self.constituents
            } else {
                &self.minority
            };
            return share(wards, peers, seat - 1);
        }
        if let Some(seat) = self.minority.iter().position(|member| member == id) {
            return share(&self.constituents, self.minority.len(), seat);
        }
        Vec::new()
    }
}

impl fmt::Display for Government {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Government")
            .field("promise", &format_args!("{}", self.promise))
            .field("majority", &self.majority)
            .field("minority", &self.minority)
            .field("constituents", &self.constituents)
            .finish()
    }
}

fn share(wards: &[CitizenId], peers: usize, seat: usize) -> Vec<CitizenId> {
    wards
        .iter()
        .enumerate()
        .filter(|(ward, _)| ward % peers == seat)
        .map(|(_, id)| id.clone())
        .collect()
}

//
// Immigrated impls
//

impl Immigrated {
    /// Records that `id` immigrated under the government at `promise`.
    pub fn insert(&mut self, id: CitizenId, promise: Promise) {
        self.promises.insert(id.clone(), promise);
        self.ids.insert(promise, id);
    }

    /// Forgets an exiled citizen.
    pub fn remove(&mut self, id: &CitizenId) {
        if let Some(promise) = self.promises.remove(id) {
            self.ids.remove(&promise);
        }
    }

    /// The promise `id` immigrated under.
    pub fn promise_of(&self, id: &CitizenId) -> Option<&Promise> {
        self.promises.get(id)
    }

    /// The citizen that immigrated under `promise`.
    pub fn id_at(&self, promise: &Promise) -> Option<&CitizenId> {
        self.ids.get(promise)
    }

    /// Whether `id` is a current citizen.
    pub fn contains(&self, id: &CitizenId) -> bool {
        self.promises.contains_key(id)
    }
}
