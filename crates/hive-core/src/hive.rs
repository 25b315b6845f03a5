//! Hives: connected clusters of facilities sharing one advertisement market.
//!
//! A [`Hive`] owns, per good, two sets of priority-indexed backlogs (one for
//! providers, one for demanders) and a cache of transit paths between its
//! facilities. The engine calls [`Hive::advertise`] whenever a facility's
//! relations change; the hive retracts the facility's old entries, tries to
//! match each new relation, and returns the [`Match`]es the engine turns into
//! movements.
//!
//! # Matching order
//!
//! 1. The highest non-empty priority bucket on the opposite side, nearest
//!    candidate by cached path length (first found wins ties). Lower buckets
//!    are tried if nothing in the highest one is reachable.
//! 2. Otherwise, the nearest general-storage facility able to take or give
//!    the good right now, bypassing the backlog.
//! 3. Otherwise, the relation waits in its own priority bucket.
//!
//! Two `Store`-priority entries never match each other, so storage facilities
//! cannot shuffle goods back and forth.

use crate::facility::{Advertise, GoodsRelation, Priority, Relations};
use crate::hex::{Axial, Border, Site};
use crate::id::GoodType;
use crate::pathfind::{PathFinder, path_length};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Structural misuse of a hive. Always a bookkeeping bug.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HiveError {
    #[error("facility at {0} is not a member of hive '{1}'")]
    NotMember(Axial, String),
}

// ---------------------------------------------------------------------------
// Stock view
// ---------------------------------------------------------------------------

/// Read access to facility storage, supplied by the engine during matching.
pub trait StockView {
    fn available(&self, tile: Axial, good: GoodType) -> u32;
    fn has_room(&self, tile: Axial, good: GoodType) -> u32;
    fn is_general_storage(&self, tile: Axial) -> bool;
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

type Buckets = [Vec<Axial>; Priority::COUNT];

/// Backlogs for one good.
#[derive(Debug, Clone, Default)]
struct GoodMarket {
    provide: Buckets,
    demand: Buckets,
}

impl GoodMarket {
    fn side(&self, advertise: Advertise) -> &Buckets {
        match advertise {
            Advertise::Provide => &self.provide,
            Advertise::Demand => &self.demand,
        }
    }

    fn side_mut(&mut self, advertise: Advertise) -> &mut Buckets {
        match advertise {
            Advertise::Provide => &mut self.provide,
            Advertise::Demand => &mut self.demand,
        }
    }

    fn retract(&mut self, facility: Axial) {
        for bucket in self.provide.iter_mut().chain(self.demand.iter_mut()) {
            bucket.retain(|&t| t != facility);
        }
    }

    fn is_empty(&self) -> bool {
        self.provide
            .iter()
            .chain(self.demand.iter())
            .all(Vec::is_empty)
    }
}

/// A matched pair of advertisements, ready to become a movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub good: GoodType,
    pub provider: Axial,
    pub demander: Axial,
    /// Transit path from provider to demander, alternating tile and border.
    pub path: Vec<Site>,
}

// ---------------------------------------------------------------------------
// Hive
// ---------------------------------------------------------------------------

/// A connected cluster of facilities and the gates linking them.
#[derive(Debug, Clone)]
pub struct Hive {
    name: String,
    facilities: BTreeSet<Axial>,
    gates: BTreeSet<Border>,
    markets: BTreeMap<GoodType, GoodMarket>,
    /// Memoized paths keyed by `(from, to, good)`. `None` caches "no path".
    paths: HashMap<(Axial, Axial, GoodType), Option<Vec<Site>>>,
    max_path_cost: u32,
}

impl Hive {
    pub fn new(name: impl Into<String>, max_path_cost: u32) -> Self {
        Self {
            name: name.into(),
            facilities: BTreeSet::new(),
            gates: BTreeSet::new(),
            markets: BTreeMap::new(),
            paths: HashMap::new(),
            max_path_cost,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn facilities(&self) -> &BTreeSet<Axial> {
        &self.facilities
    }

    pub fn gates(&self) -> &BTreeSet<Border> {
        &self.gates
    }

    pub fn contains(&self, tile: Axial) -> bool {
        self.facilities.contains(&tile)
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }

    /// Facilities waiting in the backlog for `good` on one side, highest
    /// priority first.
    pub fn backlog(&self, good: GoodType, advertise: Advertise) -> Vec<(Priority, Axial)> {
        let Some(market) = self.markets.get(&good) else {
            return Vec::new();
        };
        let buckets = market.side(advertise);
        Priority::all()
            .into_iter()
            .rev()
            .flat_map(|p| buckets[p.index()].iter().map(move |&t| (p, t)))
            .collect()
    }

    /// Number of `Use`-priority demands per good: what the cluster needs.
    pub fn needs(&self) -> BTreeMap<GoodType, u32> {
        self.markets
            .iter()
            .filter_map(|(&good, market)| {
                let count = market.demand[Priority::Use.index()].len() as u32;
                (count > 0).then_some((good, count))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Add a facility and the gates wiring it to neighbours already present.
    pub fn attach(&mut self, tile: Axial, gates: impl IntoIterator<Item = Border>) {
        self.facilities.insert(tile);
        self.gates.extend(gates);
        self.invalidate_paths();
    }

    /// Remove a facility, its gates and its backlog entries. Returns the
    /// gates that were removed.
    pub fn detach(&mut self, tile: Axial) -> Result<Vec<Border>, HiveError> {
        if !self.facilities.remove(&tile) {
            return Err(HiveError::NotMember(tile, self.name.clone()));
        }
        let removed: Vec<Border> = self
            .gates
            .iter()
            .filter(|g| g.touches(tile))
            .copied()
            .collect();
        for gate in &removed {
            self.gates.remove(gate);
        }
        self.retract_all(tile);
        self.invalidate_paths();
        Ok(removed)
    }

    /// Take over every facility and gate of `other`. Its backlog is dropped;
    /// the absorbed facilities must re-advertise.
    pub fn absorb(&mut self, other: Hive) {
        self.facilities.extend(other.facilities);
        self.gates.extend(other.gates);
        self.invalidate_paths();
    }

    /// Move `members` (and the gates between them) into a new hive with a
    /// fresh market. The moved facilities must re-advertise.
    pub fn split_off(&mut self, members: &BTreeSet<Axial>, name: impl Into<String>) -> Hive {
        let mut hive = Hive::new(name, self.max_path_cost);
        for &tile in members {
            if self.facilities.remove(&tile) {
                self.retract_all(tile);
                hive.facilities.insert(tile);
            }
        }
        let moved: Vec<Border> = self
            .gates
            .iter()
            .filter(|g| {
                let (a, b) = g.tiles();
                members.contains(&a) && members.contains(&b)
            })
            .copied()
            .collect();
        for gate in moved {
            self.gates.remove(&gate);
            hive.gates.insert(gate);
        }
        self.invalidate_paths();
        hive
    }

    /// Connected components of the facility graph, via gates. Components are
    /// ordered by size (largest first), ties by lowest tile.
    pub fn components(&self) -> Vec<BTreeSet<Axial>> {
        let mut seen: BTreeSet<Axial> = BTreeSet::new();
        let mut components = Vec::new();
        for &start in &self.facilities {
            if seen.contains(&start) {
                continue;
            }
            let mut component = BTreeSet::new();
            let mut queue = VecDeque::from([start]);
            seen.insert(start);
            while let Some(tile) = queue.pop_front() {
                component.insert(tile);
                for border in Border::around(tile) {
                    if !self.gates.contains(&border) {
                        continue;
                    }
                    if let Some(next) = border.other(tile) {
                        if self.facilities.contains(&next) && seen.insert(next) {
                            queue.push_back(next);
                        }
                    }
                }
            }
            components.push(component);
        }
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.first().cmp(&b.first())));
        components
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    pub fn invalidate_paths(&mut self) {
        self.paths.clear();
    }

    pub fn cached_paths(&self) -> usize {
        self.paths.len()
    }

    fn neighbors(
        facilities: &BTreeSet<Axial>,
        gates: &BTreeSet<Border>,
        site: Site,
    ) -> Vec<(Site, u32)> {
        match site {
            Site::Tile(tile) => Border::around(tile)
                .filter(|b| gates.contains(b))
                .map(|b| (Site::Border(b), 1))
                .collect(),
            Site::Border(border) => {
                let (a, b) = border.tiles();
                [a, b]
                    .into_iter()
                    .filter(|t| facilities.contains(t))
                    .map(|t| (Site::Tile(t), 1))
                    .collect()
            }
        }
    }

    /// Transit graph: a facility reaches its gates, a gate reaches the two
    /// facilities it joins. Every step costs 1.
    pub fn neighbors_of(&self, site: Site) -> Vec<(Site, u32)> {
        Self::neighbors(&self.facilities, &self.gates, site)
    }

    /// Transit path between two member facilities, memoized per good.
    pub fn get_path(
        &mut self,
        from: Axial,
        to: Axial,
        good: GoodType,
        finder: &dyn PathFinder,
    ) -> Option<Vec<Site>> {
        let key = (from, to, good);
        if let Some(cached) = self.paths.get(&key) {
            return cached.clone();
        }
        let facilities = &self.facilities;
        let gates = &self.gates;
        let neighbors = |site: Site| Self::neighbors(facilities, gates, site);
        let path = finder.find_path(
            &neighbors,
            Site::Tile(from),
            Site::Tile(to),
            self.max_path_cost,
            true,
        );
        self.paths.insert(key, path.clone());
        path
    }

    // -----------------------------------------------------------------------
    // Advertisement
    // -----------------------------------------------------------------------

    /// Publish a facility's relations: retract its previous entries, then
    /// match or enqueue each relation.
    pub fn advertise(
        &mut self,
        facility: Axial,
        relations: &Relations,
        stock: &dyn StockView,
        finder: &dyn PathFinder,
    ) -> Result<Vec<Match>, HiveError> {
        if !self.facilities.contains(&facility) {
            return Err(HiveError::NotMember(facility, self.name.clone()));
        }
        self.retract_all(facility);

        let mut matches = Vec::new();
        for (&good, &relation) in relations {
            if let Some(found) = self.place(facility, good, relation, stock, finder) {
                tracing::debug!(
                    hive = %self.name,
                    good = ?good,
                    provider = %found.provider,
                    demander = %found.demander,
                    "matched advertisement"
                );
                matches.push(found);
            }
        }
        Ok(matches)
    }

    fn retract_all(&mut self, facility: Axial) {
        for market in self.markets.values_mut() {
            market.retract(facility);
        }
        self.markets.retain(|_, m| !m.is_empty());
    }

    fn place(
        &mut self,
        facility: Axial,
        good: GoodType,
        relation: GoodsRelation,
        stock: &dyn StockView,
        finder: &dyn PathFinder,
    ) -> Option<Match> {
        let capable = |tile: Axial, side: Advertise| match side {
            Advertise::Provide => stock.available(tile, good) > 0,
            Advertise::Demand => stock.has_room(tile, good) > 0,
        };
        if !capable(facility, relation.advertise) {
            return None;
        }
        let opposite = relation.advertise.opposite();

        // 1. Backlog, highest priority bucket first.
        let buckets = self
            .markets
            .get(&good)
            .map(|m| m.side(opposite).clone())
            .unwrap_or_default();
        for priority in Priority::all().into_iter().rev() {
            let bucket = &buckets[priority.index()];
            if bucket.is_empty() {
                continue;
            }
            if priority == Priority::Store && relation.priority == Priority::Store {
                continue;
            }
            let mut best: Option<(usize, Axial, Vec<Site>)> = None;
            for &candidate in bucket {
                if candidate == facility || !capable(candidate, opposite) {
                    continue;
                }
                let (provider, demander) = oriented(relation.advertise, facility, candidate);
                match self.get_path(provider, demander, good, finder) {
                    Some(path) => {
                        let len = path_length(&path);
                        if best.as_ref().is_none_or(|(l, _, _)| len < *l) {
                            best = Some((len, candidate, path));
                        }
                    }
                    None => tracing::warn!(
                        hive = %self.name,
                        good = ?good,
                        from = %provider,
                        to = %demander,
                        "matched advertisement has no transit path; skipped"
                    ),
                }
            }
            if let Some((_, candidate, path)) = best {
                if let Some(market) = self.markets.get_mut(&good) {
                    let bucket = &mut market.side_mut(opposite)[priority.index()];
                    if let Some(pos) = bucket.iter().position(|&t| t == candidate) {
                        bucket.remove(pos);
                    }
                }
                self.markets.retain(|_, m| !m.is_empty());
                let (provider, demander) = oriented(relation.advertise, facility, candidate);
                return Some(Match {
                    good,
                    provider,
                    demander,
                    path,
                });
            }
        }

        // 2. General storage bypass.
        if !stock.is_general_storage(facility) {
            let side = relation.advertise;
            if let Some(found) = self.nearest_storage(facility, good, side, stock, finder) {
                return Some(found);
            }
        }

        // 3. Wait in the backlog.
        self.markets
            .entry(good)
            .or_default()
            .side_mut(relation.advertise)[relation.priority.index()]
            .push(facility);
        None
    }

    fn nearest_storage(
        &mut self,
        facility: Axial,
        good: GoodType,
        advertise: Advertise,
        stock: &dyn StockView,
        finder: &dyn PathFinder,
    ) -> Option<Match> {
        let facilities = &self.facilities;
        let gates = &self.gates;
        let neighbors = |site: Site| Self::neighbors(facilities, gates, site);
        let is_goal = |site: Site| match site {
            Site::Tile(t) if t != facility && stock.is_general_storage(t) => match advertise {
                Advertise::Provide => stock.has_room(t, good) > 0,
                Advertise::Demand => stock.available(t, good) > 0,
            },
            _ => false,
        };
        let start = Site::Tile(facility);
        let mut path = finder.find_nearest(&neighbors, start, &is_goal, self.max_path_cost)?;
        let storage = path.last().and_then(Site::tile)?;
        let (provider, demander) = oriented(advertise, facility, storage);
        if advertise == Advertise::Demand {
            path.reverse();
        }
        self.paths.insert((provider, demander, good), Some(path.clone()));
        Some(Match {
            good,
            provider,
            demander,
            path,
        })
    }
}

/// `(provider, demander)` for an advertiser on `side` and its counterpart.
fn oriented(side: Advertise, advertiser: Axial, counterpart: Axial) -> (Axial, Axial) {
    match side {
        Advertise::Provide => (advertiser, counterpart),
        Advertise::Demand => (counterpart, advertiser),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{BreadthFirst, wood};

    /// Stock table keyed by tile: (available, room, general storage).
    #[derive(Default)]
    struct Table(BTreeMap<Axial, (u32, u32, bool)>);

    impl StockView for Table {
        fn available(&self, tile: Axial, _good: GoodType) -> u32 {
            self.0.get(&tile).map_or(0, |e| e.0)
        }
        fn has_room(&self, tile: Axial, _good: GoodType) -> u32 {
            self.0.get(&tile).map_or(0, |e| e.1)
        }
        fn is_general_storage(&self, tile: Axial) -> bool {
            self.0.get(&tile).is_some_and(|e| e.2)
        }
    }

    /// A straight east-west line of `n` facilities, gated together.
    fn line(n: i32) -> (Hive, Vec<Axial>) {
        line_with_cost(n, 64)
    }

    fn line_with_cost(n: i32, max_path_cost: u32) -> (Hive, Vec<Axial>) {
        let mut hive = Hive::new("Hive 1", max_path_cost);
        let tiles: Vec<Axial> = (0..n).map(|q| Axial::new(q, 0)).collect();
        for (i, &tile) in tiles.iter().enumerate() {
            let gates = if i == 0 {
                Vec::new()
            } else {
                vec![Border::between(tiles[i - 1], tile).unwrap()]
            };
            hive.attach(tile, gates);
        }
        (hive, tiles)
    }

    fn provide(p: Priority) -> Relations {
        Relations::from([(wood(), GoodsRelation::provide(p))])
    }

    fn demand(p: Priority) -> Relations {
        Relations::from([(wood(), GoodsRelation::demand(p))])
    }

    #[test]
    fn unmatched_demand_waits_in_bucket() {
        let (mut hive, tiles) = line(2);
        let table = Table(BTreeMap::from([(tiles[1], (0, 5, false))]));
        let matches = hive
            .advertise(tiles[1], &demand(Priority::Use), &table, &BreadthFirst)
            .unwrap();
        assert!(matches.is_empty());
        assert_eq!(hive.backlog(wood(), Advertise::Demand), vec![(Priority::Use, tiles[1])]);
        assert_eq!(hive.needs()[&wood()], 1);
    }

    #[test]
    fn provide_matches_waiting_demand() {
        let (mut hive, tiles) = line(2);
        let table = Table(BTreeMap::from([
            (tiles[0], (1, 0, false)),
            (tiles[1], (0, 5, false)),
        ]));
        hive
            .advertise(tiles[1], &demand(Priority::Use), &table, &BreadthFirst)
            .unwrap();
        let matches = hive
            .advertise(tiles[0], &provide(Priority::Store), &table, &BreadthFirst)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].provider, tiles[0]);
        assert_eq!(matches[0].demander, tiles[1]);
        assert_eq!(matches[0].path.len(), 3);
        assert!(hive.backlog(wood(), Advertise::Demand).is_empty());
    }

    #[test]
    fn nearest_candidate_wins() {
        let (mut hive, tiles) = line(4);
        let table = Table(BTreeMap::from([
            (tiles[0], (1, 0, false)),
            (tiles[2], (1, 0, false)),
            (tiles[3], (0, 5, false)),
        ]));
        hive
            .advertise(tiles[0], &provide(Priority::Buffer), &table, &BreadthFirst)
            .unwrap();
        hive
            .advertise(tiles[2], &provide(Priority::Buffer), &table, &BreadthFirst)
            .unwrap();
        let matches = hive
            .advertise(tiles[3], &demand(Priority::Use), &table, &BreadthFirst)
            .unwrap();
        assert_eq!(matches[0].provider, tiles[2]);
        assert_eq!(hive.backlog(wood(), Advertise::Provide), vec![(Priority::Buffer, tiles[0])]);
    }

    #[test]
    fn highest_bucket_beats_nearer_lower_bucket() {
        let (mut hive, tiles) = line(4);
        let table = Table(BTreeMap::from([
            (tiles[0], (0, 5, false)),
            (tiles[2], (0, 5, false)),
            (tiles[3], (1, 0, false)),
        ]));
        hive
            .advertise(tiles[0], &demand(Priority::Use), &table, &BreadthFirst)
            .unwrap();
        hive
            .advertise(tiles[2], &demand(Priority::Buffer), &table, &BreadthFirst)
            .unwrap();
        let matches = hive
            .advertise(tiles[3], &provide(Priority::Store), &table, &BreadthFirst)
            .unwrap();
        assert_eq!(matches[0].demander, tiles[0]);
    }

    #[test]
    fn store_never_matches_store() {
        let (mut hive, tiles) = line(2);
        let table = Table(BTreeMap::from([
            (tiles[0], (1, 5, false)),
            (tiles[1], (1, 5, false)),
        ]));
        hive
            .advertise(tiles[0], &demand(Priority::Store), &table, &BreadthFirst)
            .unwrap();
        let matches = hive
            .advertise(tiles[1], &provide(Priority::Store), &table, &BreadthFirst)
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn match_beyond_cost_limit_stays_queued() {
        // Neighbours cost 2, two tiles apart cost 4.
        let (mut hive, tiles) = line_with_cost(3, 2);
        let table = Table(BTreeMap::from([
            (tiles[0], (1, 0, false)),
            (tiles[2], (0, 5, false)),
        ]));
        hive
            .advertise(tiles[2], &demand(Priority::Use), &table, &BreadthFirst)
            .unwrap();
        let matches = hive
            .advertise(tiles[0], &provide(Priority::Store), &table, &BreadthFirst)
            .unwrap();
        assert!(matches.is_empty());
        assert_eq!(hive.backlog(wood(), Advertise::Demand), vec![(Priority::Use, tiles[2])]);
        assert_eq!(hive.backlog(wood(), Advertise::Provide), vec![(Priority::Store, tiles[0])]);
        assert_eq!(hive.get_path(tiles[0], tiles[2], wood(), &BreadthFirst), None);
    }

    #[test]
    fn provider_bypasses_backlog_into_general_storage() {
        let (mut hive, tiles) = line(3);
        let table = Table(BTreeMap::from([
            (tiles[0], (2, 0, false)),
            (tiles[2], (0, 10, true)),
        ]));
        let matches = hive
            .advertise(tiles[0], &provide(Priority::Store), &table, &BreadthFirst)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].demander, tiles[2]);
        assert_eq!(matches[0].path.first(), Some(&Site::Tile(tiles[0])));
        assert_eq!(matches[0].path.last(), Some(&Site::Tile(tiles[2])));
    }

    #[test]
    fn demander_pulls_from_general_storage_with_provider_first_path() {
        let (mut hive, tiles) = line(3);
        let table = Table(BTreeMap::from([
            (tiles[0], (4, 0, true)),
            (tiles[2], (0, 3, false)),
        ]));
        let matches = hive
            .advertise(tiles[2], &demand(Priority::Use), &table, &BreadthFirst)
            .unwrap();
        assert_eq!(matches[0].provider, tiles[0]);
        assert_eq!(matches[0].path.first(), Some(&Site::Tile(tiles[0])));
    }

    #[test]
    fn readvertising_retracts_previous_entry() {
        let (mut hive, tiles) = line(2);
        let table = Table(BTreeMap::from([(tiles[1], (0, 5, false))]));
        hive
            .advertise(tiles[1], &demand(Priority::Buffer), &table, &BreadthFirst)
            .unwrap();
        hive
            .advertise(tiles[1], &demand(Priority::Use), &table, &BreadthFirst)
            .unwrap();
        assert_eq!(hive.backlog(wood(), Advertise::Demand), vec![(Priority::Use, tiles[1])]);
        hive
            .advertise(tiles[1], &Relations::new(), &table, &BreadthFirst)
            .unwrap();
        assert!(hive.backlog(wood(), Advertise::Demand).is_empty());
    }

    #[test]
    fn advertise_from_non_member_is_an_error() {
        let (mut hive, _) = line(1);
        let err = hive
            .advertise(Axial::new(9, 9), &demand(Priority::Use), &Table::default(), &BreadthFirst)
            .unwrap_err();
        assert!(matches!(err, HiveError::NotMember(..)));
    }

    #[test]
    fn paths_are_cached_until_membership_changes() {
        let (mut hive, tiles) = line(3);
        let path = hive.get_path(tiles[0], tiles[2], wood(), &BreadthFirst).unwrap();
        assert_eq!(path.len(), 5);
        assert_eq!(hive.cached_paths(), 1);
        hive.attach(Axial::new(3, 0), [Border::between(tiles[2], Axial::new(3, 0)).unwrap()]);
        assert_eq!(hive.cached_paths(), 0);
    }

    #[test]
    fn detach_bridge_yields_two_components() {
        let (mut hive, tiles) = line(5);
        let removed = hive.detach(tiles[2]).unwrap();
        assert_eq!(removed.len(), 2);
        let components = hive.components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], BTreeSet::from([tiles[0], tiles[1]]));
        assert_eq!(components[1], BTreeSet::from([tiles[3], tiles[4]]));
    }

    #[test]
    fn split_off_moves_members_and_their_gates() {
        let (mut hive, tiles) = line(4);
        hive.detach(tiles[1]).unwrap();
        let moved = BTreeSet::from([tiles[2], tiles[3]]);
        let other = hive.split_off(&moved, "Hive 1-2");
        assert_eq!(other.facilities(), &moved);
        assert_eq!(other.gates().len(), 1);
        assert_eq!(hive.facilities(), &BTreeSet::from([tiles[0]]));
        assert!(hive.gates().is_empty());
    }
}
