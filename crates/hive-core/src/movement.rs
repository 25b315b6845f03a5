//! Goods in transit.
//!
//! A [`Movement`] carries one unit of one good from a provider facility to a
//! demander facility along a fixed path of alternating tile and border
//! [`Site`]s. Between hops the unit is held by a reservation in some
//! storage: first the provider's, then the gate it last entered. The
//! destination room is claimed by an allocation at creation, so the final
//! hop can never block.
//!
//! Each hop moves the movement forward by one tile (a border and the tile
//! behind it). An intermediate hop needs one unit of room in the gate on the
//! border being crossed; the final hop lands in the demander directly.

use crate::hex::{Axial, Border, Site};
use crate::id::{GoodType, HiveId, MovementId};
use crate::token::AllocationToken;
use std::collections::{BTreeMap, BTreeSet};

/// The next step of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    /// Border crossed.
    pub border: Border,
    /// Tile reached.
    pub tile: Axial,
    /// Whether `tile` is the demander.
    pub last: bool,
}

impl Hop {
    /// The storage site that must take the unit for this hop.
    pub fn wanted(&self) -> Site {
        if self.last {
            Site::Tile(self.tile)
        } else {
            Site::Border(self.border)
        }
    }
}

/// One unit of a good travelling between two facilities of a hive.
#[derive(Debug)]
pub struct Movement {
    pub(crate) good: GoodType,
    pub(crate) hive: HiveId,
    pub(crate) provider: Axial,
    pub(crate) demander: Axial,
    /// Remaining path; `path[0]` is the current tile.
    pub(crate) path: Vec<Site>,
    /// Where the unit is stored right now.
    pub(crate) holder: Site,
    /// Reservation on the unit at `holder`.
    pub(crate) hold: AllocationToken,
    /// Room claimed at the demander.
    pub(crate) target: AllocationToken,
    pub(crate) hops: u32,
}

impl Movement {
    /// `path` runs from `provider` to `demander`; `hold` reserves the unit at
    /// the provider and `target` claims room at the demander.
    pub(crate) fn new(
        good: GoodType,
        hive: HiveId,
        (provider, demander): (Axial, Axial),
        path: Vec<Site>,
        hold: AllocationToken,
        target: AllocationToken,
    ) -> Self {
        Self {
            good,
            hive,
            provider,
            demander,
            path,
            holder: Site::Tile(provider),
            hold,
            target,
            hops: 0,
        }
    }

    pub fn good(&self) -> GoodType {
        self.good
    }

    pub fn hive(&self) -> HiveId {
        self.hive
    }

    pub fn provider(&self) -> Axial {
        self.provider
    }

    pub fn demander(&self) -> Axial {
        self.demander
    }

    /// The tile the movement is currently at.
    pub fn position(&self) -> Axial {
        self.path.first().and_then(Site::tile).unwrap_or(self.provider)
    }

    /// The storage site currently holding the unit.
    pub fn holder(&self) -> Site {
        self.holder
    }

    pub fn remaining_path(&self) -> &[Site] {
        &self.path
    }

    pub fn hops_taken(&self) -> u32 {
        self.hops
    }

    /// Hops still to go.
    pub fn hops_left(&self) -> usize {
        self.path.len() / 2
    }

    pub fn next_hop(&self) -> Option<Hop> {
        let border = self.path.get(1).and_then(Site::border)?;
        let tile = self.path.get(2).and_then(Site::tile)?;
        Some(Hop {
            border,
            tile,
            last: self.path.len() == 3,
        })
    }

    /// Whether any part of the remaining journey (including the held unit)
    /// lies on `tile` or one of its borders.
    pub fn crosses(&self, tile: Axial) -> bool {
        self.holder.touches(tile) || self.path.iter().any(|s| s.touches(tile))
    }

    /// Advance the path bookkeeping by one hop. Token work is the caller's.
    pub(crate) fn advance(&mut self, hop: Hop) {
        self.path.drain(..2);
        self.holder = if hop.last {
            Site::Tile(hop.tile)
        } else {
            Site::Border(hop.border)
        };
        self.hops += 1;
    }

    pub(crate) fn is_arrived(&self) -> bool {
        self.path.len() <= 1
    }
}

/// A blocked movement: it holds a unit at `holder` and waits for room at
/// `wanted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocked {
    pub id: MovementId,
    pub holder: Site,
    pub wanted: Site,
}

/// Find a cycle among blocked movements: a sequence where each one's wanted
/// site is held by the next, closing back on the first.
///
/// Depth-first search over holder sites. Returns the participating movement
/// ids in ring order, starting from the lowest reachable holder.
pub fn find_cycle(blocked: &[Blocked]) -> Option<Vec<MovementId>> {
    let mut edges: BTreeMap<Site, Vec<(Site, MovementId)>> = BTreeMap::new();
    for b in blocked {
        edges.entry(b.holder).or_default().push((b.wanted, b.id));
    }

    let mut done: BTreeSet<Site> = BTreeSet::new();
    for &start in edges.keys() {
        if done.contains(&start) {
            continue;
        }
        let mut trail: Vec<(Site, MovementId)> = Vec::new();
        if let Some(cycle) = dfs(start, &edges, &mut trail, &mut done) {
            return Some(cycle);
        }
    }
    None
}

fn dfs(
    site: Site,
    edges: &BTreeMap<Site, Vec<(Site, MovementId)>>,
    trail: &mut Vec<(Site, MovementId)>,
    done: &mut BTreeSet<Site>,
) -> Option<Vec<MovementId>> {
    if let Some(pos) = trail.iter().position(|&(s, _)| s == site) {
        return Some(trail[pos..].iter().map(|&(_, id)| id).collect());
    }
    if done.contains(&site) {
        return None;
    }
    for &(next, id) in edges.get(&site).map(Vec::as_slice).unwrap_or_default() {
        trail.push((site, id));
        if let Some(cycle) = dfs(next, edges, trail, done) {
            return Some(cycle);
        }
        trail.pop();
    }
    done.insert(site);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn tile(q: i32) -> Axial {
        Axial::new(q, 0)
    }

    fn gate(a: i32, b: i32) -> Site {
        Site::Border(Border::between(tile(a), tile(b)).unwrap())
    }

    fn blocked(id: MovementId, holder: Site, wanted: Site) -> Blocked {
        Blocked { id, holder, wanted }
    }

    fn ids(n: usize) -> Vec<MovementId> {
        let mut map: SlotMap<MovementId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn three_ring_is_found() {
        let id = ids(3);
        let stuck = [
            blocked(id[0], gate(0, 1), gate(1, 2)),
            blocked(id[1], gate(1, 2), gate(2, 3)),
            blocked(id[2], gate(2, 3), gate(0, 1)),
        ];
        let cycle = find_cycle(&stuck).unwrap();
        assert_eq!(cycle.len(), 3);
        assert_eq!(cycle.iter().collect::<BTreeSet<_>>().len(), 3);
    }

    #[test]
    fn chain_without_loop_is_not_a_cycle() {
        let id = ids(2);
        let stuck = [
            blocked(id[0], gate(0, 1), gate(1, 2)),
            blocked(id[1], gate(1, 2), gate(2, 3)),
        ];
        assert_eq!(find_cycle(&stuck), None);
    }

    #[test]
    fn tail_leading_into_ring_is_excluded() {
        let id = ids(3);
        let stuck = [
            blocked(id[0], gate(5, 6), gate(0, 1)),
            blocked(id[1], gate(0, 1), gate(1, 2)),
            blocked(id[2], gate(1, 2), gate(0, 1)),
        ];
        let cycle = find_cycle(&stuck).unwrap();
        assert_eq!(cycle.len(), 2);
        assert!(!cycle.contains(&id[0]));
    }

    #[test]
    fn hop_wants_gate_then_demander() {
        let a = Border::between(tile(0), tile(1)).unwrap();
        let hop = Hop {
            border: a,
            tile: tile(1),
            last: false,
        };
        assert_eq!(hop.wanted(), Site::Border(a));
        let last = Hop { last: true, ..hop };
        assert_eq!(last.wanted(), Site::Tile(tile(1)));
    }
}
