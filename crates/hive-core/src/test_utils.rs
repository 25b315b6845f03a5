//! Shared fixtures for unit tests, integration tests and benches.

use crate::engine::{Engine, EngineConfig};
use crate::facility::Role;
use crate::fixed::Fixed64;
use crate::hex::{Axial, Site};
use crate::id::*;
use crate::pathfind::{Neighbors, PathFinder};
use crate::registry::{Registry, RegistryBuilder};
use crate::storage::CapacityPolicy;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

// ---------------------------------------------------------------------------
// Goods & kinds
// ---------------------------------------------------------------------------

pub fn wood() -> GoodType {
    GoodType(0)
}

pub fn stone() -> GoodType {
    GoodType(1)
}

pub fn t(q: i32, r: i32) -> Axial {
    Axial::new(q, r)
}

/// Facility kinds registered by [`test_registry`], in registration order.
pub mod kinds {
    use crate::id::FacilityKindId;

    /// Offers wood. 2 slots of 5.
    pub const SOURCE: FacilityKindId = FacilityKindId(0);
    /// Wants 3 wood. Holds up to 5.
    pub const SINK: FacilityKindId = FacilityKindId(1);
    /// General storage, no buffers. 4 slots of 5.
    pub const WAREHOUSE: FacilityKindId = FacilityKindId(2);
    /// Publishes whatever it is told to. 4 slots of 5.
    pub const MANUAL: FacilityKindId = FacilityKindId(3);
}

pub fn test_registry() -> Registry {
    let mut b = RegistryBuilder::new();
    let wood = b.register_good("wood");
    b.register_good("stone");
    b.register_facility(
        "woodcutter",
        CapacityPolicy::Slotted {
            slots: 2,
            slot_size: 5,
        },
        Role::Source { good: wood },
    );
    b.register_facility(
        "sawmill",
        CapacityPolicy::Specific(BTreeMap::from([(wood, 5)])),
        Role::Sink {
            good: wood,
            target: 3,
        },
    );
    b.register_facility(
        "warehouse",
        CapacityPolicy::Slotted {
            slots: 4,
            slot_size: 5,
        },
        Role::Warehouse {
            buffers: BTreeMap::new(),
        },
    );
    b.register_facility(
        "workshop",
        CapacityPolicy::Slotted {
            slots: 4,
            slot_size: 5,
        },
        Role::Manual,
    );
    b.build().expect("test registry is valid")
}

pub fn test_engine() -> Engine {
    Engine::new(test_registry(), EngineConfig::default(), Box::new(BreadthFirst))
}

// ---------------------------------------------------------------------------
// Path finder
// ---------------------------------------------------------------------------

/// Uniform-cost search with deterministic tie-breaking (insertion order).
#[derive(Debug, Clone, Copy, Default)]
pub struct BreadthFirst;

struct Frontier {
    heap: BinaryHeap<Reverse<(u32, u64, Site)>>,
    cost: BTreeMap<Site, u32>,
    came_from: BTreeMap<Site, Site>,
    seq: u64,
}

impl Frontier {
    fn new(start: Site) -> Self {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((0, 0, start)));
        Self {
            heap,
            cost: BTreeMap::from([(start, 0)]),
            came_from: BTreeMap::new(),
            seq: 1,
        }
    }

    /// Pop the cheapest unsettled site.
    fn pop(&mut self) -> Option<(u32, Site)> {
        while let Some(Reverse((cost, _, site))) = self.heap.pop() {
            if self.cost.get(&site) == Some(&cost) {
                return Some((cost, site));
            }
        }
        None
    }

    fn expand(&mut self, neighbors: &Neighbors<'_>, site: Site, cost: u32, limit: u32) {
        for (next, step) in neighbors(site) {
            let total = cost.saturating_add(step);
            if total > limit || self.cost.get(&next).is_some_and(|&c| c <= total) {
                continue;
            }
            self.cost.insert(next, total);
            self.came_from.insert(next, site);
            self.heap.push(Reverse((total, self.seq, next)));
            self.seq += 1;
        }
    }

    fn path_to(&self, mut site: Site) -> Vec<Site> {
        let mut path = vec![site];
        while let Some(&prev) = self.came_from.get(&site) {
            path.push(prev);
            site = prev;
        }
        path.reverse();
        path
    }
}

impl PathFinder for BreadthFirst {
    fn find_path(
        &self,
        neighbors: &Neighbors<'_>,
        start: Site,
        goal: Site,
        max_cost: u32,
        punctual: bool,
    ) -> Option<Vec<Site>> {
        let near_goal = |site: Site| {
            site == goal || (!punctual && neighbors(site).iter().any(|&(n, _)| n == goal))
        };
        self.find_nearest(neighbors, start, &near_goal, max_cost)
    }

    fn find_nearest(
        &self,
        neighbors: &Neighbors<'_>,
        start: Site,
        is_goal: &dyn Fn(Site) -> bool,
        stop_cost: u32,
    ) -> Option<Vec<Site>> {
        let mut frontier = Frontier::new(start);
        while let Some((cost, site)) = frontier.pop() {
            if is_goal(site) {
                return Some(frontier.path_to(site));
            }
            frontier.expand(neighbors, site, cost, stop_cost);
        }
        None
    }

    fn find_best(
        &self,
        neighbors: &Neighbors<'_>,
        start: Site,
        score: &dyn Fn(Site) -> Option<Fixed64>,
        stop_cost: u32,
        best_possible: Fixed64,
    ) -> Option<Vec<Site>> {
        let mut frontier = Frontier::new(start);
        let mut best: Option<(Fixed64, Site)> = None;
        while let Some((cost, site)) = frontier.pop() {
            if let Some(s) = score(site) {
                if best.is_none_or(|(b, _)| s > b) {
                    best = Some((s, site));
                }
                if s >= best_possible {
                    break;
                }
            }
            frontier.expand(neighbors, site, cost, stop_cost);
        }
        best.map(|(_, site)| frontier.path_to(site))
    }
}
