//! The advisory planner that proposes membership changes.
//!
//! Given the current government and the reachability evidence gathered by
//! the synchronization tree, the shaper emits candidate governments: admit a
//! newcomer, demote an unreachable voter, promote naturalized constituents
//! toward the configured parliament size, or expel a peer that stayed
//! unreachable. It emits at most one undecided shape at a time; the
//! `decided` latch holds from the moment a shape enters flight until the
//! next government enacts and a fresh shaper is built.
//!
//! Only the leader plans. Every other citizen carries the relay variant,
//! which swallows evidence and emits nothing; its observations travel back
//! up the synchronization tree inside responses instead.

use alloc::collections::{BTreeSet, VecDeque};
use alloc::vec::Vec;

use log::info;

use crate::government::{Government, Immigration};
use crate::message::CitizenId;
use crate::{majority_size, parliament_size};

/// The membership planner slot of a citizen.
pub enum Shaper {
    /// The leader variant, which gathers evidence and emits shapes.
    Assembly(Assembly),

    /// The non-leader variant. Evidence flows through it untouched.
    Relay,
}

/// The planning state carried by a leader.
pub struct Assembly {
    parliament: usize,
    decided: bool,
    immigrating: VecDeque<Immigration>,
    naturalized: Vec<CitizenId>,
    unreachable: BTreeSet<CitizenId>,
}

impl Shaper {
    /// Constructs the leader variant. `immigrating` carries admissions that
    /// queued behind the previous government.
    pub fn assembly(parliament: usize, immigrating: VecDeque<Immigration>) -> Self {
        Shaper::Assembly(Assembly {
            parliament,
            decided: false,
            immigrating,
            naturalized: Vec::new(),
            unreachable: BTreeSet::new(),
        })
    }

    /// Constructs the non-leader variant.
    pub fn relay() -> Self {
        Shaper::Relay
    }

    /// Whether a shape is already in flight.
    pub fn decided(&self) -> bool {
        match self {
            Shaper::Assembly(assembly) => assembly.decided,
            Shaper::Relay => false,
        }
    }

    /// Takes the queued admissions, for carry-over into the next shaper.
    pub fn take_immigrating(&mut self) -> VecDeque<Immigration> {
        match self {
            Shaper::Assembly(assembly) => core::mem::take(&mut assembly.immigrating),
            Shaper::Relay => VecDeque::new(),
        }
    }

    /// Queues an admission and plans.
    pub fn immigrate(
        &mut self,
        government: &Government,
        immigration: Immigration,
    ) -> Option<Government> {
        match self {
            Shaper::Assembly(assembly) => {
                assembly.immigrating.push_back(immigration);
                assembly.plan(government)
            }
            Shaper::Relay => None,
        }
    }

    /// Records that a peer caught up under the current government and plans.
    pub fn naturalized(&mut self, government: &Government, id: &CitizenId) -> Option<Government> {
        match self {
            Shaper::Assembly(assembly) => {
                if !assembly.naturalized.contains(id) {
                    assembly.naturalized.push(id.clone());
                }
                assembly.plan(government)
            }
            Shaper::Relay => None,
        }
    }

    /// Records that a peer went unreachable and plans.
    pub fn unreachable(&mut self, government: &Government, id: &CitizenId) -> Option<Government> {
        match self {
            Shaper::Assembly(assembly) => {
                assembly.unreachable.insert(id.clone());
                assembly.plan(government)
            }
            Shaper::Relay => None,
        }
    }

    /// Plans from the evidence already gathered, used to kick a freshly
    /// built shaper after enactment.
    pub fn advance(&mut self, government: &Government) -> Option<Government> {
        match self {
            Shaper::Assembly(assembly) => assembly.plan(government),
            Shaper::Relay => None,
        }
    }
}

impl Assembly {
    fn plan(&mut self, government: &Government) -> Option<Government> {
        if self.decided {
            return None;
        }
        let shape = self
            .reshape(government)
            .or_else(|| self.exile(government))
            .or_else(|| self.grow(government))
            .or_else(|| self.admit(government))?;
        self.decided = true;
        Some(shape)
    }

    /// Demotes unreachable voters, promoting naturalized constituents into
    /// the vacated seats when any are available.
    fn reshape(&self, government: &Government) -> Option<Government> {
        if !government.parliament().any(|member| self.unreachable.contains(member)) {
            return None;
        }
        let members: Vec<CitizenId> = government.parliament().cloned().collect();
        let size = members.len();
        let reachable: Vec<CitizenId> = members
            .iter()
            .filter(|member| !self.unreachable.contains(member))
            .cloned()
            .collect();
        let promoted: Vec<CitizenId> = self
            .naturalized
            .iter()
            .filter(|id| government.constituents.contains(id) && !self.unreachable.contains(*id))
            .take(size - reachable.len())
            .cloned()
            .collect();
        if reachable.len() + promoted.len() < majority_size(size) {
            return None;
        }
        let mut order = reachable;
        order.extend(promoted.iter().cloned());
        order.extend(
            members
                .iter()
                .filter(|member| self.unreachable.contains(member))
                .cloned(),
        );
        let majority = order[..majority_size(size)].to_vec();
        let minority = order[majority_size(size)..size].to_vec();
        if majority == government.majority && minority == government.minority {
            return None;
        }
        info!("reshaping around {} unreachable voters", self.unreachable.len());
        // voters squeezed out of the parliament by promotions fall back to
        // the constituency, where the exile path can reach them
        let demoted: Vec<CitizenId> = order[size..].to_vec();
        let mut shape = government.clone();
        shape.majority = majority;
        shape.minority = minority;
        shape.constituents.retain(|id| !promoted.contains(id));
        shape.constituents.extend(demoted);
        shape.map = Default::default();
        shape.immigrate = None;
        shape.exile = None;
        Some(shape)
    }

    /// Expels the first constituent that stayed unreachable past the
    /// timeout. Voters are never expelled directly; a reshape demotes them
    /// first.
    fn exile(&self, government: &Government) -> Option<Government> {
        let exile = government
            .constituents
            .iter()
            .find(|id| self.unreachable.contains(*id))?
            .clone();
        info!("exiling {}", exile);
        let mut shape = government.clone();
        shape.constituents.retain(|id| *id != exile);
        shape.map = Default::default();
        shape.immigrate = None;
        shape.exile = Some(exile);
        Some(shape)
    }

    /// Promotes naturalized constituents to grow the parliament toward the
    /// configured size, keeping the seat count odd.
    fn grow(&self, government: &Government) -> Option<Government> {
        let citizens = government.citizens().count();
        let target = parliament_size(self.parliament, citizens);
        let seats = government.parliament().count();
        if target <= seats {
            return None;
        }
        let promoted: Vec<CitizenId> = self
            .naturalized
            .iter()
            .filter(|id| government.constituents.contains(id) && !self.unreachable.contains(*id))
            .take(target - seats)
            .cloned()
            .collect();
        if promoted.len() < target - seats {
            return None;
        }
        info!("growing parliament from {} to {} seats", seats, target);
        let mut order: Vec<CitizenId> = government.parliament().cloned().collect();
        order.extend(promoted.iter().cloned());
        let mut shape = government.clone();
        shape.majority = order[..majority_size(target)].to_vec();
        shape.minority = order[majority_size(target)..].to_vec();
        shape.constituents.retain(|id| !promoted.contains(id));
        shape.map = Default::default();
        shape.immigrate = None;
        shape.exile = None;
        Some(shape)
    }

    /// Admits the next queued newcomer as a constituent.
    fn admit(&mut self, government: &Government) -> Option<Government> {
        let immigration = self.immigrating.pop_front()?;
        info!("admitting {}", immigration.id);
        let mut shape = government.clone();
        shape.constituents.push(immigration.id.clone());
        shape
            .properties
            .insert(immigration.id.clone(), immigration.properties.clone());
        shape.map = Default::default();
        shape.exile = None;
        shape.immigrate = Some(immigration);
        Some(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Cookie, Promise};
    use bytes::Bytes;

    fn ids(names: &[&str]) -> Vec<CitizenId> {
        names.iter().map(|name| CitizenId::from(*name)).collect()
    }

    fn government(majority: &[&str], minority: &[&str], constituents: &[&str]) -> Government {
        Government {
            promise: Promise::new(3, 0),
            majority: ids(majority),
            minority: ids(minority),
            constituents: ids(constituents),
            ..Default::default()
        }
    }

    fn immigration(id: &str) -> Immigration {
        Immigration {
            id: id.into(),
            properties: Bytes::from_static(b"props"),
            cookie: Cookie(1),
        }
    }

    #[test]
    fn admission_produces_a_constituent() {
        let mut shaper = Shaper::assembly(5, VecDeque::new());
        let government = government(&["0"], &[], &[]);
        let shape = shaper.immigrate(&government, immigration("1")).unwrap();
        assert_eq!(shape.majority, ids(&["0"]));
        assert_eq!(shape.constituents, ids(&["1"]));
        assert_eq!(shape.immigrate.as_ref().map(|im| im.id.clone()), Some("1".into()));
    }

    #[test]
    fn the_latch_holds_until_enactment() {
        let mut shaper = Shaper::assembly(5, VecDeque::new());
        let government1 = government(&["0"], &[], &[]);
        assert!(shaper.immigrate(&government1, immigration("1")).is_some());
        assert!(shaper.decided());
        // a second admission queues behind the latch
        assert!(shaper.immigrate(&government1, immigration("2")).is_none());
        // and survives into the next shaper
        let mut next = Shaper::assembly(5, shaper.take_immigrating());
        let government2 = government(&["0"], &[], &["1"]);
        let shape = next.advance(&government2).unwrap();
        assert_eq!(shape.constituents, ids(&["1", "2"]));
    }

    #[test]
    fn growth_waits_for_naturalization() {
        let mut shaper = Shaper::assembly(5, VecDeque::new());
        let government = government(&["0"], &[], &["1", "2"]);
        assert!(shaper.naturalized(&government, &"1".into()).is_none());
        let shape = shaper.naturalized(&government, &"2".into()).unwrap();
        assert_eq!(shape.majority, ids(&["0", "1"]));
        assert_eq!(shape.minority, ids(&["2"]));
        assert_eq!(shape.constituents, ids(&[]));
    }

    #[test]
    fn growth_keeps_parliaments_odd() {
        let mut shaper = Shaper::assembly(5, VecDeque::new());
        // two citizens can seat only a parliament of one
        let government = government(&["0"], &[], &["1"]);
        assert!(shaper.naturalized(&government, &"1".into()).is_none());
    }

    #[test]
    fn unreachable_voters_are_demoted() {
        let mut shaper = Shaper::assembly(5, VecDeque::new());
        let government = government(&["0", "1", "2"], &["3", "4"], &[]);
        let shape = shaper.unreachable(&government, &"1".into()).unwrap();
        assert_eq!(shape.majority, ids(&["0", "2", "3"]));
        assert_eq!(shape.minority, ids(&["4", "1"]));
    }

    #[test]
    fn unreachable_constituents_are_exiled() {
        let mut shaper = Shaper::assembly(5, VecDeque::new());
        let government = government(&["0"], &[], &["1"]);
        let shape = shaper.unreachable(&government, &"1".into()).unwrap();
        assert_eq!(shape.exile, Some("1".into()));
        assert_eq!(shape.constituents, ids(&[]));
    }

    #[test]
    fn relays_never_emit() {
        let mut shaper = Shaper::relay();
        let government = government(&["0"], &[], &["1"]);
        assert!(shaper.immigrate(&government, immigration("2")).is_none());
        assert!(shaper.naturalized(&government, &"1".into()).is_none());
        assert!(shaper.unreachable(&government, &"1".into()).is_none());
        assert!(!shaper.decided());
    }
}
