//! The simulation engine: owns every facility, gate, hive and movement, and
//! drives them one step at a time.
//!
//! # Architecture
//!
//! The `Engine` is an arena. Facilities are keyed by tile and gates by
//! border; everything else refers to them by coordinate, never by pointer:
//! - [`Hive`]s (slotmap, [`HiveId`]) hold membership and the market
//! - [`Movement`]s (slotmap, [`MovementId`]) hold their tokens and path
//! - a [`Board`] for agent occupancy
//! - loose goods, zones and construction projects
//! - an [`EventBus`] for typed simulation events
//!
//! # Re-publication
//!
//! Every operation that can change a facility's storage marks the facility
//! dirty. Before returning, the operation *settles*: each dirty facility
//! recomputes its relations and, if they differ from what it last
//! published, re-advertises to its hive. Matches become movements on the
//! spot, which dirties both endpoints again. The loop ends because every
//! match consumes one unit of availability and one unit of room.
//!
//! # Step
//!
//! Each [`step`](Engine::step):
//! 1. **Settle** -- flush pending re-publications
//! 2. **Transit** -- per facility (in coordinate order), advance at most one
//!    movement standing on it; if every candidate is blocked, look for a
//!    cycle of blocked movements and rotate it as one unit
//! 3. **Settle** -- arrivals and departures change relations
//! 4. **Deliver** -- board grants become events; buffered events go out

use crate::board::{Board, MoveOutcome, Occupant, StepStatus};
use crate::event::{Event, EventBus, EventKind, PassiveListener};
use crate::facility::{Facility, Gate, Relations};
use crate::fixed::{Fixed64, Ticks};
use crate::hex::{Axial, Border, Site};
use crate::hive::{Hive, HiveError, Match, StockView};
use crate::id::*;
use crate::movement::{self, Blocked, Hop, Movement};
use crate::pathfind::PathFinder;
use crate::registry::Registry;
use crate::storage::{Goods, Storage, StorageError, goods};
use crate::token::AllocationToken;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine tunables. Every field has a default, so partial config files work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Slots in every gate storage.
    pub gate_slots: u32,
    /// Units per gate slot.
    pub gate_slot_size: u32,
    /// Prefix of generated hive names ("Hive 1", "Hive 2", ...).
    pub hive_name_prefix: String,
    /// Cost limit handed to the path finder.
    pub path_max_cost: u32,
    /// Ring buffer capacity per event kind.
    pub event_buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gate_slots: 1,
            gate_slot_size: 1,
            hive_name_prefix: "Hive".to_string(),
            path_max_cost: 256,
            event_buffer_capacity: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from engine operations.
///
/// Contention surfaces as [`EngineError::Storage`] with an `Insufficient` or
/// `NoRoom` payload. Everything else is a caller mistake or a bookkeeping
/// bug.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("tile {0} is already occupied")]
    TileOccupied(Axial),
    #[error("no facility at {0}")]
    NoFacility(Axial),
    #[error("unknown facility kind {0:?}")]
    UnknownKind(FacilityKindId),
    #[error("unknown movement {0:?}")]
    UnknownMovement(MovementId),
    #[error("facility at {0} belongs to no live hive")]
    NotInHive(Axial),
    #[error("invalid transit path: {0}")]
    InvalidPath(String),
    #[error("no construction project at {0}")]
    NoProject(Axial),
    #[error("construction project at {tile} still needs {missing:?}")]
    ProjectIncomplete { tile: Axial, missing: Goods },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Board(#[from] crate::board::BoardError),
    #[error(transparent)]
    Hive(#[from] HiveError),
}

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Units lying on a site, owned by no storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LooseGood {
    pub site: Site,
    pub good: GoodType,
    pub quantity: u32,
}

/// A facility under construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub kind: FacilityKindId,
    pub required: Goods,
    pub delivered: Goods,
}

impl Project {
    /// Goods still to be delivered.
    pub fn missing(&self) -> Goods {
        self.required
            .iter()
            .filter_map(|(&good, &need)| {
                let have = self.delivered.get(&good).copied().unwrap_or(0);
                (have < need).then_some((good, need - have))
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Result of advancing one movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopOutcome {
    /// The unit moved into the gate at this site.
    Hopped(Site),
    /// The unit reached its demander; the movement is gone.
    Arrived,
    /// The next gate has no room; nothing changed.
    Blocked,
    /// The path no longer exists; the movement was cancelled.
    Cancelled,
}

/// What happened during one [`Engine::step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub tick: Ticks,
    pub hopped: usize,
    pub arrived: usize,
    pub cycles: usize,
    /// Movements still blocked at the end of the step.
    pub blocked: usize,
    pub cancelled: usize,
}

enum Readiness {
    Ready(Hop),
    Blocked(Hop),
    Broken,
}

/// Read-only stock lookup handed to hives while they match.
struct FacilityTable<'a>(&'a BTreeMap<Axial, Facility>);

impl StockView for FacilityTable<'_> {
    fn available(&self, tile: Axial, good: GoodType) -> u32 {
        self.0.get(&tile).map_or(0, |f| f.storage.available(good))
    }

    fn has_room(&self, tile: Axial, good: GoodType) -> u32 {
        self.0.get(&tile).map_or(0, |f| f.storage.has_room(good))
    }

    fn is_general_storage(&self, tile: Axial) -> bool {
        self.0.get(&tile).is_some_and(Facility::is_general_storage)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Engine {
    pub(crate) registry: Registry,
    pub(crate) config: EngineConfig,
    pub(crate) finder: Box<dyn PathFinder>,
    pub(crate) tick: Ticks,

    pub(crate) facilities: BTreeMap<Axial, Facility>,
    pub(crate) gates: BTreeMap<Border, Gate>,
    pub(crate) hives: SlotMap<HiveId, Hive>,
    pub(crate) movements: SlotMap<MovementId, Movement>,
    pub(crate) board: Board,

    pub(crate) loose: BTreeMap<(Site, GoodType), u32>,
    pub(crate) zones: BTreeMap<Axial, String>,
    pub(crate) projects: BTreeMap<Axial, Project>,

    /// Facilities whose relations must be recomputed.
    pub(crate) dirty: BTreeSet<Axial>,
    /// Endpoints of matches that failed to claim storage. Re-advertised on
    /// the next step, not within the same settle.
    pub(crate) retry: BTreeSet<Axial>,
    /// Hives created so far, for naming.
    pub(crate) hive_counter: u32,

    pub event_bus: EventBus,
}

impl Engine {
    pub fn new(registry: Registry, config: EngineConfig, finder: Box<dyn PathFinder>) -> Self {
        let event_bus = EventBus::new(config.event_buffer_capacity);
        Self {
            registry,
            config,
            finder,
            tick: 0,
            facilities: BTreeMap::new(),
            gates: BTreeMap::new(),
            hives: SlotMap::with_key(),
            movements: SlotMap::with_key(),
            board: Board::new(),
            loose: BTreeMap::new(),
            zones: BTreeMap::new(),
            projects: BTreeMap::new(),
            dirty: BTreeSet::new(),
            retry: BTreeSet::new(),
            hive_counter: 0,
            event_bus,
        }
    }

    // -----------------------------------------------------------------------
    // Facilities
    // -----------------------------------------------------------------------

    /// Place a facility, wiring gates to every neighbouring facility and
    /// merging the neighbours' hives. Returns the facility's hive.
    pub fn place_facility(
        &mut self,
        tile: Axial,
        kind: FacilityKindId,
    ) -> Result<HiveId, EngineError> {
        let hive = self.insert_facility(tile, kind)?;
        self.settle()?;
        Ok(hive)
    }

    pub(crate) fn insert_facility(
        &mut self,
        tile: Axial,
        kind: FacilityKindId,
    ) -> Result<HiveId, EngineError> {
        if self.facilities.contains_key(&tile) || self.projects.contains_key(&tile) {
            return Err(EngineError::TileOccupied(tile));
        }
        let def = self
            .registry
            .get_facility(kind)
            .ok_or(EngineError::UnknownKind(kind))?;
        let storage = Storage::new(def.storage.clone());
        let role = def.role.clone();

        let neighbors: Vec<Axial> = tile
            .neighbors()
            .into_iter()
            .filter(|n| self.facilities.contains_key(n))
            .collect();
        let mut adjacent: Vec<HiveId> = Vec::new();
        for n in &neighbors {
            if let Some(f) = self.facilities.get(n) {
                if !adjacent.contains(&f.hive) {
                    adjacent.push(f.hive);
                }
            }
        }
        let hive_id = match self.merge_hives(&adjacent) {
            Some(id) => id,
            None => self.create_hive(),
        };

        let mut borders = Vec::new();
        for n in neighbors {
            let Some(border) = Border::between(tile, n) else {
                continue;
            };
            let storage = Storage::slotted(self.config.gate_slots, self.config.gate_slot_size);
            self.gates.insert(border, Gate::new(border, storage));
            self.event_bus.emit(Event::GateOpened {
                border,
                tick: self.tick,
            });
            borders.push(border);
        }
        let hive = self.hives.get_mut(hive_id).ok_or(EngineError::NotInHive(tile))?;
        hive.attach(tile, borders);
        self.facilities.insert(tile, Facility::new(kind, role, storage, hive_id));
        self.dirty.insert(tile);
        tracing::debug!(tile = %tile, kind = ?kind, hive = ?hive_id, "facility placed");
        Ok(hive_id)
    }

    /// Remove a facility. Movements crossing it are cancelled, its gates
    /// close, and everything it stored becomes loose goods. The hive splits
    /// if the facility was a bridge.
    pub fn remove_facility(&mut self, tile: Axial) -> Result<(), EngineError> {
        let hive_id = self
            .facilities
            .get(&tile)
            .ok_or(EngineError::NoFacility(tile))?
            .hive;

        let crossing: Vec<MovementId> = self
            .movements
            .iter()
            .filter(|(_, m)| m.crosses(tile))
            .map(|(id, _)| id)
            .collect();
        for id in crossing {
            self.abort_movement(id)?;
        }

        let removed = match self.hives.get_mut(hive_id) {
            Some(hive) => hive.detach(tile)?,
            None => Vec::new(),
        };
        for border in removed {
            self.close_gate(border);
        }
        let orphans: Vec<Border> = self.gates.keys().filter(|b| b.touches(tile)).copied().collect();
        for border in orphans {
            tracing::warn!(border = %border, "orphaned gate removed");
            self.close_gate(border);
        }

        if let Some(facility) = self.facilities.remove(&tile) {
            for (good, quantity) in facility.storage.stock() {
                self.drop_loose(Site::Tile(tile), good, quantity);
            }
        }
        self.dirty.remove(&tile);
        tracing::debug!(tile = %tile, hive = ?hive_id, "facility removed");
        self.repartition(hive_id);
        self.settle()
    }

    /// Set the relations published by a [`Role::Manual`](crate::facility::Role::Manual)
    /// facility.
    pub fn set_relations(&mut self, tile: Axial, relations: Relations) -> Result<(), EngineError> {
        let facility = self
            .facilities
            .get_mut(&tile)
            .ok_or(EngineError::NoFacility(tile))?;
        facility.manual = relations;
        self.dirty.insert(tile);
        self.settle()
    }

    /// Recompute a facility's relations now.
    pub fn touch(&mut self, tile: Axial) -> Result<(), EngineError> {
        if !self.facilities.contains_key(&tile) {
            return Err(EngineError::NoFacility(tile));
        }
        self.dirty.insert(tile);
        self.settle()
    }

    fn close_gate(&mut self, border: Border) {
        let Some(gate) = self.gates.remove(&border) else {
            return;
        };
        for (good, quantity) in gate.storage.stock() {
            self.drop_loose(Site::Border(border), good, quantity);
        }
        self.event_bus.emit(Event::GateClosed {
            border,
            tick: self.tick,
        });
        tracing::debug!(border = %border, "gate closed");
    }

    // -----------------------------------------------------------------------
    // Hive membership
    // -----------------------------------------------------------------------

    fn create_hive(&mut self) -> HiveId {
        self.hive_counter += 1;
        let name = format!("{} {}", self.config.hive_name_prefix, self.hive_counter);
        let id = self.hives.insert(Hive::new(name, self.config.path_max_cost));
        self.event_bus.emit(Event::HiveCreated {
            hive: id,
            tick: self.tick,
        });
        id
    }

    /// Fold every hive in `adjacent` into the largest one (first on ties).
    fn merge_hives(&mut self, adjacent: &[HiveId]) -> Option<HiveId> {
        let size = |hives: &SlotMap<HiveId, Hive>, id: HiveId| hives.get(id).map_or(0, Hive::len);
        let mut survivor = *adjacent.first()?;
        for &id in &adjacent[1..] {
            if size(&self.hives, id) > size(&self.hives, survivor) {
                survivor = id;
            }
        }

        for &absorbed in adjacent {
            if absorbed == survivor {
                continue;
            }
            let Some(other) = self.hives.remove(absorbed) else {
                continue;
            };
            for &tile in other.facilities() {
                if let Some(f) = self.facilities.get_mut(&tile) {
                    f.hive = survivor;
                    f.published.clear();
                }
                self.dirty.insert(tile);
            }
            for (_, m) in self.movements.iter_mut() {
                if m.hive == absorbed {
                    m.hive = survivor;
                }
            }
            if let Some(hive) = self.hives.get_mut(survivor) {
                tracing::info!(survivor = hive.name(), absorbed = other.name(), "hives merged");
                hive.absorb(other);
            }
            self.event_bus.emit(Event::HivesMerged {
                survivor,
                absorbed,
                tick: self.tick,
            });
        }
        Some(survivor)
    }

    /// After a removal: drop the hive if it emptied, split it if it fell
    /// apart. The largest component keeps the id, the name and every
    /// in-flight movement standing in it.
    fn repartition(&mut self, hive_id: HiveId) {
        let Some(hive) = self.hives.get(hive_id) else {
            return;
        };
        if hive.is_empty() {
            tracing::debug!(hive = hive.name(), "hive emptied");
            self.hives.remove(hive_id);
            return;
        }
        let components = hive.components();
        if components.len() <= 1 {
            return;
        }
        let parent_name = hive.name().to_string();

        let mut children = Vec::new();
        for (n, members) in components.iter().enumerate().skip(1) {
            let Some(parent) = self.hives.get_mut(hive_id) else {
                break;
            };
            let child = parent.split_off(members, format!("{parent_name}-{}", n + 1));
            let child_id = self.hives.insert(child);
            for &tile in members {
                if let Some(f) = self.facilities.get_mut(&tile) {
                    f.hive = child_id;
                    f.published.clear();
                }
                self.dirty.insert(tile);
            }
            for (_, m) in self.movements.iter_mut() {
                if m.hive == hive_id && members.contains(&m.position()) {
                    m.hive = child_id;
                }
            }
            children.push(child_id);
        }
        tracing::info!(parent = %parent_name, pieces = components.len(), "hive split");
        self.event_bus.emit(Event::HiveSplit {
            parent: hive_id,
            children,
            tick: self.tick,
        });
    }

    // -----------------------------------------------------------------------
    // Re-publication
    // -----------------------------------------------------------------------

    /// Re-advertise every dirty facility whose relations changed.
    pub(crate) fn settle(&mut self) -> Result<(), EngineError> {
        while let Some(tile) = self.dirty.pop_first() {
            self.republish(tile)?;
        }
        Ok(())
    }

    fn republish(&mut self, tile: Axial) -> Result<(), EngineError> {
        let Some(facility) = self.facilities.get_mut(&tile) else {
            return Ok(());
        };
        let relations = facility.goods_relations();
        if relations == facility.published {
            return Ok(());
        }
        facility.published = relations.clone();
        let hive_id = facility.hive;

        let hive = self.hives.get_mut(hive_id).ok_or(EngineError::NotInHive(tile))?;
        let table = FacilityTable(&self.facilities);
        let matches = hive.advertise(tile, &relations, &table, self.finder.as_ref())?;
        for found in matches {
            self.start_matched(hive_id, found)?;
        }
        Ok(())
    }

    /// Turn a market match into a movement. Both endpoints re-advertise the
    /// good afterwards: the match consumed their backlog entries.
    fn start_matched(&mut self, hive: HiveId, found: Match) -> Result<(), EngineError> {
        let Match {
            good,
            provider,
            demander,
            path,
        } = found;
        match self.spawn_movement(hive, good, path) {
            Ok(_) => {
                for tile in [provider, demander] {
                    if let Some(f) = self.facilities.get_mut(&tile) {
                        f.published.remove(&good);
                    }
                    self.dirty.insert(tile);
                }
                Ok(())
            }
            Err(EngineError::Storage(err)) => {
                tracing::warn!(
                    error = %err,
                    provider = %provider,
                    demander = %demander,
                    "matched movement could not claim storage; retrying next step"
                );
                for tile in [provider, demander] {
                    if let Some(f) = self.facilities.get_mut(&tile) {
                        f.published.remove(&good);
                    }
                    self.retry.insert(tile);
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // Movements
    // -----------------------------------------------------------------------

    fn spawn_movement(
        &mut self,
        hive: HiveId,
        good: GoodType,
        path: Vec<Site>,
    ) -> Result<MovementId, EngineError> {
        let provider = path
            .first()
            .and_then(Site::tile)
            .ok_or_else(|| EngineError::InvalidPath("must start on a tile".into()))?;
        let demander = path
            .last()
            .and_then(Site::tile)
            .ok_or_else(|| EngineError::InvalidPath("must end on a tile".into()))?;
        if !self.facilities.contains_key(&demander) {
            return Err(EngineError::NoFacility(demander));
        }
        let one = goods([(good, 1)]);
        let source = self
            .facilities
            .get_mut(&provider)
            .ok_or(EngineError::NoFacility(provider))?;
        let mut hold = source.storage.reserve(&one, "movement")?;
        let target = match self.facilities.get_mut(&demander) {
            Some(f) => f.storage.allocate(&one, "movement"),
            None => Err(StorageError::NoRoom {
                good,
                requested: 1,
                room: 0,
            }),
        };
        let target = match target {
            Ok(token) => token,
            Err(err) => {
                if let Some(f) = self.facilities.get_mut(&provider) {
                    hold.cancel(&mut f.storage)?;
                }
                return Err(err.into());
            }
        };

        let id = self
            .movements
            .insert(Movement::new(good, hive, (provider, demander), path, hold, target));
        self.dirty.insert(provider);
        self.dirty.insert(demander);
        self.event_bus.emit(Event::MovementCreated {
            movement: id,
            good,
            provider,
            demander,
            tick: self.tick,
        });
        tracing::debug!(
            movement = ?id,
            good = ?good,
            provider = %provider,
            demander = %demander,
            "movement created"
        );
        Ok(id)
    }

    /// Start a movement from `provider` to `demander` along the hive's
    /// cached path.
    pub fn request_movement(
        &mut self,
        provider: Axial,
        demander: Axial,
        good: GoodType,
    ) -> Result<MovementId, EngineError> {
        if provider == demander {
            return Err(EngineError::InvalidPath(format!("{provider} cannot supply itself")));
        }
        let hive_id = self.hive_of(provider).ok_or(EngineError::NoFacility(provider))?;
        if self.hive_of(demander) != Some(hive_id) {
            return Err(EngineError::InvalidPath(format!(
                "{provider} and {demander} are in different hives"
            )));
        }
        let hive = self.hives.get_mut(hive_id).ok_or(EngineError::NotInHive(provider))?;
        let path = hive
            .get_path(provider, demander, good, self.finder.as_ref())
            .ok_or_else(|| {
                EngineError::InvalidPath(format!("no transit path from {provider} to {demander}"))
            })?;
        let id = self.spawn_movement(hive_id, good, path)?;
        self.settle()?;
        Ok(id)
    }

    /// Start a movement along an explicit path: tiles and gates alternating,
    /// all in one hive.
    pub fn dispatch_along(
        &mut self,
        good: GoodType,
        path: Vec<Site>,
    ) -> Result<MovementId, EngineError> {
        let hive_id = self.validate_path(&path)?;
        let id = self.spawn_movement(hive_id, good, path)?;
        self.settle()?;
        Ok(id)
    }

    fn validate_path(&self, path: &[Site]) -> Result<HiveId, EngineError> {
        let invalid = |why: &str| EngineError::InvalidPath(why.to_string());
        if path.len() < 3 || path.len() % 2 == 0 {
            return Err(invalid("needs at least one hop, tile to tile"));
        }
        let start = path[0].tile().ok_or_else(|| invalid("must start on a tile"))?;
        let hive = self.hive_of(start).ok_or(EngineError::NoFacility(start))?;
        for pair in path[1..].chunks(2) {
            let (Some(border), Some(tile)) = (pair[0].border(), pair.get(1).and_then(Site::tile))
            else {
                return Err(invalid("must alternate tile and border"));
            };
            if !border.touches(tile) || !self.gates.contains_key(&border) {
                return Err(invalid("crosses a border without a gate"));
            }
            if self.hive_of(tile) != Some(hive) {
                return Err(invalid("leaves the hive"));
            }
        }
        for window in path.windows(2) {
            let ((Site::Tile(t), Site::Border(b)) | (Site::Border(b), Site::Tile(t))) =
                (window[0], window[1])
            else {
                return Err(invalid("must alternate tile and border"));
            };
            if !b.touches(t) {
                return Err(invalid("steps are not adjacent"));
            }
        }
        Ok(hive)
    }

    /// Cancel a movement: both tokens are released and a unit already in
    /// transit is dropped as a loose good where it stands.
    pub fn cancel_movement(&mut self, id: MovementId) -> Result<(), EngineError> {
        self.abort_movement(id)?;
        self.settle()
    }

    fn abort_movement(&mut self, id: MovementId) -> Result<(), EngineError> {
        let mut m = self.movements.remove(id).ok_or(EngineError::UnknownMovement(id))?;
        release(&mut self.facilities, &mut self.gates, Site::Tile(m.demander), &mut m.target)?;
        release(&mut self.facilities, &mut self.gates, m.holder, &mut m.hold)?;
        let dropped_at = match m.holder {
            Site::Tile(_) => None,
            Site::Border(border) => {
                let removed = self
                    .gates
                    .get_mut(&border)
                    .map_or(0, |g| g.storage.remove_good(m.good, 1));
                if removed > 0 {
                    self.drop_loose(m.holder, m.good, removed);
                }
                Some(m.holder)
            }
        };
        self.dirty.insert(m.provider);
        self.dirty.insert(m.demander);
        self.event_bus.emit(Event::MovementCancelled {
            movement: id,
            good: m.good,
            dropped_at,
            tick: self.tick,
        });
        tracing::debug!(movement = ?id, dropped_at = ?dropped_at, "movement cancelled");
        Ok(())
    }

    /// Advance one movement by one hop, if the next gate has room.
    pub fn hop(&mut self, id: MovementId) -> Result<HopOutcome, EngineError> {
        let m = self.movements.get(id).ok_or(EngineError::UnknownMovement(id))?;
        let outcome = match self.readiness(m) {
            Readiness::Ready(hop) => self.perform_hop(id, hop)?,
            Readiness::Blocked(_) => HopOutcome::Blocked,
            Readiness::Broken => {
                self.abort_movement(id)?;
                HopOutcome::Cancelled
            }
        };
        self.settle()?;
        Ok(outcome)
    }

    fn readiness(&self, m: &Movement) -> Readiness {
        let Some(hop) = m.next_hop() else {
            return Readiness::Broken;
        };
        if hop.last {
            return if self.facilities.contains_key(&hop.tile) {
                Readiness::Ready(hop)
            } else {
                Readiness::Broken
            };
        }
        match self.gates.get(&hop.border) {
            None => Readiness::Broken,
            Some(gate) if gate.storage.has_room(m.good) == 0 => Readiness::Blocked(hop),
            Some(_) => Readiness::Ready(hop),
        }
    }

    fn perform_hop(&mut self, id: MovementId, hop: Hop) -> Result<HopOutcome, EngineError> {
        let m = self
            .movements
            .get_mut(id)
            .ok_or(EngineError::UnknownMovement(id))?;
        let left = m.holder;
        let new_hold = land(&mut self.facilities, &mut self.gates, m, hop)?;
        lift(&mut self.facilities, &mut self.gates, m)?;
        if let Some(hold) = new_hold {
            m.hold = hold;
        }
        m.advance(hop);
        self.after_hop(id, left)
    }

    /// Bookkeeping shared by single hops and rotations.
    fn after_hop(&mut self, id: MovementId, left: Site) -> Result<HopOutcome, EngineError> {
        let m = self.movements.get(id).ok_or(EngineError::UnknownMovement(id))?;
        let (good, provider, demander, holder) = (m.good, m.provider, m.demander, m.holder);
        let arrived = m.is_arrived();
        if left == Site::Tile(provider) {
            self.dirty.insert(provider);
        }
        if arrived {
            self.movements.remove(id);
            self.dirty.insert(demander);
            self.event_bus.emit(Event::MovementArrived {
                movement: id,
                good,
                demander,
                tick: self.tick,
            });
            tracing::debug!(movement = ?id, demander = %demander, "movement arrived");
            Ok(HopOutcome::Arrived)
        } else {
            self.event_bus.emit(Event::MovementHopped {
                movement: id,
                holder,
                tick: self.tick,
            });
            tracing::debug!(movement = ?id, holder = %holder, "movement hopped");
            Ok(HopOutcome::Hopped(holder))
        }
    }

    fn blocked_movements(&self, skip: &BTreeSet<MovementId>) -> Vec<Blocked> {
        self.movements
            .iter()
            .filter(|(id, _)| !skip.contains(id))
            .filter_map(|(id, m)| match self.readiness(m) {
                Readiness::Blocked(hop) => Some(Blocked {
                    id,
                    holder: m.holder,
                    wanted: hop.wanted(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Move every movement of a blocked ring forward at once: all units
    /// leave their holders, then all units land. Returns false without
    /// touching anything if some storage in the ring could not take its
    /// arrival even after the ring's departures.
    fn rotate(&mut self, cycle: &[MovementId]) -> Result<bool, EngineError> {
        let mut plan = Vec::with_capacity(cycle.len());
        for &id in cycle {
            let m = self.movements.get(id).ok_or(EngineError::UnknownMovement(id))?;
            match self.readiness(m) {
                Readiness::Ready(hop) | Readiness::Blocked(hop) => plan.push((id, hop, m.holder)),
                Readiness::Broken => return Ok(false),
            }
        }
        for &(id, hop, _) in &plan {
            if hop.last {
                continue;
            }
            let Some(good) = self.movements.get(id).map(|m| m.good) else {
                return Ok(false);
            };
            let wanted = hop.wanted();
            let leaving: Vec<&AllocationToken> = plan
                .iter()
                .filter(|&&(_, _, holder)| holder == wanted)
                .filter_map(|&(other, _, _)| self.movements.get(other))
                .map(|m| &m.hold)
                .collect();
            let fits = self
                .storage_at(wanted)
                .is_some_and(|s| s.room_after(&leaving, good) >= 1);
            if !fits {
                tracing::debug!(wanted = %wanted, "blocked ring cannot rotate");
                return Ok(false);
            }
        }

        for &(id, _, _) in &plan {
            if let Some(m) = self.movements.get_mut(id) {
                lift(&mut self.facilities, &mut self.gates, m)?;
            }
        }
        for &(id, hop, left) in &plan {
            if let Some(m) = self.movements.get_mut(id) {
                if let Some(hold) = land(&mut self.facilities, &mut self.gates, m, hop)? {
                    m.hold = hold;
                }
                m.advance(hop);
            }
            self.after_hop(id, left)?;
        }

        self.event_bus.emit(Event::CycleResolved {
            movements: cycle.to_vec(),
            tick: self.tick,
        });
        tracing::debug!(movements = cycle.len(), "blocked ring rotated");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Step
    // -----------------------------------------------------------------------

    /// Advance the simulation by one step.
    pub fn step(&mut self) -> Result<StepReport, EngineError> {
        self.tick += 1;
        self.dirty.append(&mut self.retry);
        self.settle()?;
        let mut report = StepReport {
            tick: self.tick,
            ..StepReport::default()
        };
        let mut advanced: BTreeSet<MovementId> = BTreeSet::new();

        let tiles: Vec<Axial> = self.facilities.keys().copied().collect();
        for tile in tiles {
            let candidates: Vec<MovementId> = self
                .movements
                .iter()
                .filter(|(id, m)| m.position() == tile && !advanced.contains(id))
                .map(|(id, _)| id)
                .collect();
            let mut moved = false;
            let mut blocked = false;
            for id in candidates {
                let Some(m) = self.movements.get(id) else {
                    continue;
                };
                match self.readiness(m) {
                    Readiness::Ready(hop) => {
                        match self.perform_hop(id, hop)? {
                            HopOutcome::Arrived => report.arrived += 1,
                            _ => report.hopped += 1,
                        }
                        advanced.insert(id);
                        moved = true;
                        break;
                    }
                    Readiness::Blocked(_) => blocked = true,
                    Readiness::Broken => {
                        self.abort_movement(id)?;
                        report.cancelled += 1;
                    }
                }
            }
            if moved || !blocked {
                continue;
            }
            let stuck = self.blocked_movements(&advanced);
            if let Some(cycle) = movement::find_cycle(&stuck) {
                if self.rotate(&cycle)? {
                    report.cycles += 1;
                    report.hopped += cycle.len();
                    advanced.extend(cycle);
                }
            }
        }

        report.blocked = self.blocked_movements(&advanced).len();
        self.settle()?;
        self.flush_board_grants();
        self.event_bus.deliver();
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Storage operations for the behaviour layer
    // -----------------------------------------------------------------------

    fn facility_storage(&mut self, tile: Axial) -> Result<&mut Storage, EngineError> {
        self.facilities
            .get_mut(&tile)
            .map(|f| &mut f.storage)
            .ok_or(EngineError::NoFacility(tile))
    }

    pub fn reserve(
        &mut self,
        tile: Axial,
        goods: &Goods,
        reason: impl Into<String>,
    ) -> Result<AllocationToken, EngineError> {
        let token = self.facility_storage(tile)?.reserve(goods, reason)?;
        self.dirty.insert(tile);
        self.settle()?;
        Ok(token)
    }

    pub fn allocate(
        &mut self,
        tile: Axial,
        goods: &Goods,
        reason: impl Into<String>,
    ) -> Result<AllocationToken, EngineError> {
        let token = self.facility_storage(tile)?.allocate(goods, reason)?;
        self.dirty.insert(tile);
        self.settle()?;
        Ok(token)
    }

    pub fn fulfill(&mut self, tile: Axial, token: &mut AllocationToken) -> Result<(), EngineError> {
        token.fulfill(self.facility_storage(tile)?)?;
        self.dirty.insert(tile);
        self.settle()
    }

    /// Cancel a token. If the facility that issued it is gone, its claims
    /// went with it and the token is simply marked cancelled.
    pub fn cancel(&mut self, tile: Axial, token: &mut AllocationToken) -> Result<(), EngineError> {
        match self.facilities.get_mut(&tile) {
            Some(f) => token.cancel(&mut f.storage)?,
            None => token.abandon(),
        }
        self.dirty.insert(tile);
        self.settle()
    }

    /// Add units immediately. Returns the amount that didn't fit.
    pub fn add_good(
        &mut self,
        tile: Axial,
        good: GoodType,
        quantity: u32,
    ) -> Result<u32, EngineError> {
        let overflow = self.facility_storage(tile)?.add_good(good, quantity);
        self.dirty.insert(tile);
        self.settle()?;
        Ok(overflow)
    }

    /// Remove unreserved units immediately. Returns the amount removed.
    pub fn remove_good(
        &mut self,
        tile: Axial,
        good: GoodType,
        quantity: u32,
    ) -> Result<u32, EngineError> {
        let removed = self.facility_storage(tile)?.remove_good(good, quantity);
        self.dirty.insert(tile);
        self.settle()?;
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Loose goods
    // -----------------------------------------------------------------------

    pub(crate) fn drop_loose(&mut self, site: Site, good: GoodType, quantity: u32) {
        if quantity > 0 {
            *self.loose.entry((site, good)).or_insert(0) += quantity;
        }
    }

    /// Put units on the ground (e.g. an agent dropping what it carries).
    pub fn drop_good(&mut self, site: Site, good: GoodType, quantity: u32) {
        self.drop_loose(site, good, quantity);
    }

    /// Pick up to `quantity` loose units at `site`. Returns the amount taken.
    pub fn take_loose_good(&mut self, site: Site, good: GoodType, quantity: u32) -> u32 {
        let Some(lying) = self.loose.get_mut(&(site, good)) else {
            return 0;
        };
        let taken = quantity.min(*lying);
        *lying -= taken;
        if *lying == 0 {
            self.loose.remove(&(site, good));
        }
        taken
    }

    pub fn loose_goods(&self) -> Vec<LooseGood> {
        self.loose
            .iter()
            .map(|(&(site, good), &quantity)| LooseGood {
                site,
                good,
                quantity,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Zones & construction
    // -----------------------------------------------------------------------

    pub fn set_zone(&mut self, tile: Axial, zone: Option<String>) {
        match zone {
            Some(zone) => {
                self.zones.insert(tile, zone);
            }
            None => {
                self.zones.remove(&tile);
            }
        }
    }

    pub fn zone(&self, tile: Axial) -> Option<&str> {
        self.zones.get(&tile).map(String::as_str)
    }

    pub fn zones(&self) -> impl Iterator<Item = (Axial, &str)> {
        self.zones.iter().map(|(&t, z)| (t, z.as_str()))
    }

    pub fn start_project(
        &mut self,
        tile: Axial,
        kind: FacilityKindId,
        required: Goods,
    ) -> Result<(), EngineError> {
        if self.facilities.contains_key(&tile) || self.projects.contains_key(&tile) {
            return Err(EngineError::TileOccupied(tile));
        }
        if self.registry.get_facility(kind).is_none() {
            return Err(EngineError::UnknownKind(kind));
        }
        self.projects.insert(
            tile,
            Project {
                kind,
                required,
                delivered: Goods::new(),
            },
        );
        Ok(())
    }

    /// Deliver goods to a construction site. Returns how many were accepted;
    /// a project never takes more than it still needs.
    pub fn deliver_to_project(
        &mut self,
        tile: Axial,
        good: GoodType,
        quantity: u32,
    ) -> Result<u32, EngineError> {
        let project = self.projects.get_mut(&tile).ok_or(EngineError::NoProject(tile))?;
        let need = project.missing().get(&good).copied().unwrap_or(0);
        let accepted = need.min(quantity);
        if accepted > 0 {
            *project.delivered.entry(good).or_insert(0) += accepted;
        }
        Ok(accepted)
    }

    /// Consume a complete project's goods and place its facility.
    pub fn complete_project(&mut self, tile: Axial) -> Result<HiveId, EngineError> {
        let project = self.projects.get(&tile).ok_or(EngineError::NoProject(tile))?;
        let missing = project.missing();
        if !missing.is_empty() {
            return Err(EngineError::ProjectIncomplete { tile, missing });
        }
        let kind = project.kind;
        self.projects.remove(&tile);
        self.place_facility(tile, kind)
    }

    /// Abandon a project. Delivered goods are left lying on the tile.
    pub fn cancel_project(&mut self, tile: Axial) -> Result<(), EngineError> {
        let project = self.projects.remove(&tile).ok_or(EngineError::NoProject(tile))?;
        for (good, quantity) in project.delivered {
            self.drop_loose(Site::Tile(tile), good, quantity);
        }
        Ok(())
    }

    pub fn project(&self, tile: Axial) -> Option<&Project> {
        self.projects.get(&tile)
    }

    // -----------------------------------------------------------------------
    // Board
    // -----------------------------------------------------------------------

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Move an agent on the board. See [`Board::move_character`].
    pub fn move_agent(
        &mut self,
        who: &impl Occupant,
        to: Axial,
        from: Option<Axial>,
    ) -> Result<MoveOutcome, EngineError> {
        let outcome = self.board.move_character(who, to, from)?;
        match &outcome {
            MoveOutcome::Queued(_) => self.event_bus.emit(Event::AgentQueued {
                agent: who.agent_id(),
                tile: to,
                tick: self.tick,
            }),
            MoveOutcome::Deadlock { released } if !released.is_empty() => {
                self.event_bus.emit(Event::AgentsReleased {
                    agents: released.clone(),
                    tick: self.tick,
                })
            }
            _ => {}
        }
        self.flush_board_grants();
        Ok(outcome)
    }

    pub fn poll_step(&self, step: QueueStep) -> Option<StepStatus> {
        self.board.poll(step)
    }

    pub fn cancel_step(&mut self, step: QueueStep) {
        self.board.cancel(step);
    }

    pub fn remove_agent(&mut self, agent: AgentId) -> Result<(), EngineError> {
        self.board.remove_agent(agent)?;
        self.flush_board_grants();
        Ok(())
    }

    fn flush_board_grants(&mut self) {
        for (agent, tile) in self.board.drain_granted() {
            self.event_bus.emit(Event::AgentGranted {
                agent,
                tile,
                tick: self.tick,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn suppress_event(&mut self, kind: EventKind) {
        self.event_bus.suppress(kind);
    }

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.event_bus.on_passive(kind, listener);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn tick(&self) -> Ticks {
        self.tick
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn facility(&self, tile: Axial) -> Option<&Facility> {
        self.facilities.get(&tile)
    }

    pub fn facilities(&self) -> impl Iterator<Item = (Axial, &Facility)> {
        self.facilities.iter().map(|(&t, f)| (t, f))
    }

    pub fn gate(&self, border: Border) -> Option<&Gate> {
        self.gates.get(&border)
    }

    pub fn gates(&self) -> impl Iterator<Item = &Gate> {
        self.gates.values()
    }

    /// The storage at a site: a facility's for a tile, a gate's for a border.
    pub fn storage_at(&self, site: Site) -> Option<&Storage> {
        match site {
            Site::Tile(t) => self.facilities.get(&t).map(Facility::storage),
            Site::Border(b) => self.gates.get(&b).map(Gate::storage),
        }
    }

    pub fn hive(&self, id: HiveId) -> Option<&Hive> {
        self.hives.get(id)
    }

    pub fn hives(&self) -> impl Iterator<Item = (HiveId, &Hive)> {
        self.hives.iter()
    }

    pub fn hive_count(&self) -> usize {
        self.hives.len()
    }

    pub fn hive_of(&self, tile: Axial) -> Option<HiveId> {
        self.facilities.get(&tile).map(Facility::hive)
    }

    pub fn movement(&self, id: MovementId) -> Option<&Movement> {
        self.movements.get(id)
    }

    pub fn movements(&self) -> impl Iterator<Item = (MovementId, &Movement)> {
        self.movements.iter()
    }

    pub fn movement_count(&self) -> usize {
        self.movements.len()
    }

    /// Every unit of `good` the engine knows about: facility and gate
    /// storage (including units in transit), loose goods and goods delivered
    /// to construction sites.
    pub fn total_goods(&self, good: GoodType) -> u64 {
        let stored: u64 = self
            .facilities
            .values()
            .map(|f| u64::from(f.storage.present(good)))
            .chain(self.gates.values().map(|g| u64::from(g.storage.present(good))))
            .sum();
        let loose: u64 = self
            .loose
            .iter()
            .filter(|((_, g), _)| *g == good)
            .map(|(_, &q)| u64::from(q))
            .sum();
        let delivered: u64 = self
            .projects
            .values()
            .filter_map(|p| p.delivered.get(&good))
            .map(|&q| u64::from(q))
            .sum();
        stored + loose + delivered
    }

    /// Path to the general-storage facility of `from`'s hive best placed to
    /// take `good`: the emptiest one with room, by share of free capacity.
    pub fn best_storage_for(&self, from: Axial, good: GoodType) -> Option<Vec<Site>> {
        let hive = self.hives.get(self.hive_of(from)?)?;
        let neighbors = |site: Site| hive.neighbors_of(site);
        let score = |site: Site| {
            let facility = self.facilities.get(&site.tile()?)?;
            if site == Site::Tile(from) || !facility.is_general_storage() {
                return None;
            }
            let room = facility.storage.has_room(good);
            if room == 0 {
                return None;
            }
            let capacity = room + facility.storage.total();
            Some(Fixed64::from_num(room) / Fixed64::from_num(capacity))
        };
        self.finder.find_best(
            &neighbors,
            Site::Tile(from),
            &score,
            self.config.path_max_cost,
            Fixed64::ONE,
        )
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // The storages these tokens point into are going away too.
        for (_, m) in self.movements.iter_mut() {
            m.hold.abandon();
            m.target.abandon();
        }
    }
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

fn storage_mut<'a>(
    facilities: &'a mut BTreeMap<Axial, Facility>,
    gates: &'a mut BTreeMap<Border, Gate>,
    site: Site,
) -> Option<&'a mut Storage> {
    match site {
        Site::Tile(t) => facilities.get_mut(&t).map(|f| &mut f.storage),
        Site::Border(b) => gates.get_mut(&b).map(|g| &mut g.storage),
    }
}

/// Cancel a token against the storage at `site`, or abandon it if that
/// storage no longer exists.
fn release(
    facilities: &mut BTreeMap<Axial, Facility>,
    gates: &mut BTreeMap<Border, Gate>,
    site: Site,
    token: &mut AllocationToken,
) -> Result<(), StorageError> {
    match storage_mut(facilities, gates, site) {
        Some(storage) => token.cancel(storage),
        None => {
            token.abandon();
            Ok(())
        }
    }
}

/// Take the unit out of its current holder.
fn lift(
    facilities: &mut BTreeMap<Axial, Facility>,
    gates: &mut BTreeMap<Border, Gate>,
    m: &mut Movement,
) -> Result<(), StorageError> {
    match storage_mut(facilities, gates, m.holder) {
        Some(storage) => m.hold.fulfill(storage),
        None => {
            m.hold.abandon();
            Ok(())
        }
    }
}

/// Put the unit where `hop` lands. A final hop commits the demander's
/// allocation; an intermediate hop stores the unit in the gate and returns
/// the reservation that now holds it.
fn land(
    facilities: &mut BTreeMap<Axial, Facility>,
    gates: &mut BTreeMap<Border, Gate>,
    m: &mut Movement,
    hop: Hop,
) -> Result<Option<AllocationToken>, EngineError> {
    let storage = storage_mut(facilities, gates, hop.wanted())
        .ok_or_else(|| {
            EngineError::InvalidPath(format!("nothing to land in at {}", hop.wanted()))
        })?;
    if hop.last {
        m.target.fulfill(storage)?;
        return Ok(None);
    }
    let one = goods([(m.good, 1)]);
    let mut incoming = storage.allocate(&one, "transit")?;
    incoming.fulfill(storage)?;
    Ok(Some(storage.reserve(&one, "transit")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facility::{GoodsRelation, Priority};
    use crate::test_utils::*;

    #[test]
    fn lone_facility_gets_its_own_hive() {
        let mut engine = test_engine();
        let hive = engine.place_facility(t(0, 0), kinds::SOURCE).unwrap();
        assert_eq!(engine.hive_count(), 1);
        assert_eq!(engine.hive(hive).unwrap().name(), "Hive 1");
        assert_eq!(engine.gates().count(), 0);
    }

    #[test]
    fn placing_twice_is_rejected() {
        let mut engine = test_engine();
        engine.place_facility(t(0, 0), kinds::SOURCE).unwrap();
        assert!(matches!(
            engine.place_facility(t(0, 0), kinds::SINK),
            Err(EngineError::TileOccupied(_))
        ));
        assert!(matches!(
            engine.place_facility(t(5, 5), FacilityKindId(99)),
            Err(EngineError::UnknownKind(_))
        ));
    }

    #[test]
    fn neighbour_joins_hive_through_a_gate() {
        let mut engine = test_engine();
        let a = engine.place_facility(t(0, 0), kinds::SOURCE).unwrap();
        let b = engine.place_facility(t(1, 0), kinds::SINK).unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.gates().count(), 1);
        let border = Border::between(t(0, 0), t(1, 0)).unwrap();
        assert!(engine.gate(border).is_some());
    }

    #[test]
    fn source_and_sink_match_and_deliver() {
        let mut engine = test_engine();
        engine.place_facility(t(0, 0), kinds::SOURCE).unwrap();
        engine.place_facility(t(1, 0), kinds::SINK).unwrap();
        assert_eq!(engine.add_good(t(0, 0), wood(), 1).unwrap(), 0);
        assert_eq!(engine.movement_count(), 1);

        let report = engine.step().unwrap();
        assert_eq!(report.arrived, 1);
        assert_eq!(engine.storage_at(Site::Tile(t(1, 0))).unwrap().present(wood()), 1);
        assert_eq!(engine.storage_at(Site::Tile(t(0, 0))).unwrap().present(wood()), 0);
        assert_eq!(engine.movement_count(), 0);
    }

    #[test]
    fn multi_hop_movement_waits_in_gates() {
        let mut engine = test_engine();
        for q in 0..3 {
            engine.place_facility(t(q, 0), kinds::MANUAL).unwrap();
        }
        engine.add_good(t(0, 0), wood(), 1).unwrap();
        let id = engine.request_movement(t(0, 0), t(2, 0), wood()).unwrap();

        let first = engine.hop(id).unwrap();
        let gate = Site::Border(Border::between(t(0, 0), t(1, 0)).unwrap());
        assert_eq!(first, HopOutcome::Hopped(gate));
        assert_eq!(engine.storage_at(gate).unwrap().present(wood()), 1);
        assert_eq!(engine.total_goods(wood()), 1);

        assert_eq!(engine.hop(id).unwrap(), HopOutcome::Arrived);
        assert_eq!(engine.storage_at(gate).unwrap().present(wood()), 0);
        assert_eq!(engine.storage_at(Site::Tile(t(2, 0))).unwrap().present(wood()), 1);
    }

    #[test]
    fn movement_to_itself_is_rejected() {
        let mut engine = test_engine();
        engine.place_facility(t(0, 0), kinds::MANUAL).unwrap();
        engine.add_good(t(0, 0), wood(), 1).unwrap();
        assert!(matches!(
            engine.request_movement(t(0, 0), t(0, 0), wood()),
            Err(EngineError::InvalidPath(_))
        ));
        assert_eq!(engine.movement_count(), 0);
        assert!(!engine.storage_at(Site::Tile(t(0, 0))).unwrap().has_pending_claims());
    }

    #[test]
    fn paths_must_alternate_tiles_and_borders() {
        let mut engine = test_engine();
        for q in 0..3 {
            engine.place_facility(t(q, 0), kinds::MANUAL).unwrap();
        }
        engine.add_good(t(0, 0), wood(), 1).unwrap();
        let gate = Site::Border(Border::between(t(0, 0), t(1, 0)).unwrap());
        let tiles_only = vec![Site::Tile(t(0, 0)), Site::Tile(t(1, 0)), Site::Tile(t(2, 0))];
        let doubled_gate = vec![Site::Tile(t(0, 0)), gate, gate];
        for path in [tiles_only, doubled_gate] {
            assert!(matches!(
                engine.dispatch_along(wood(), path),
                Err(EngineError::InvalidPath(_))
            ));
        }
        assert_eq!(engine.movement_count(), 0);
    }

    #[test]
    fn failed_storage_claim_is_retried_next_step() {
        let mut engine = test_engine();
        engine.place_facility(t(0, 0), kinds::MANUAL).unwrap();
        let hive = engine.place_facility(t(1, 0), kinds::MANUAL).unwrap();
        assert_eq!(engine.add_good(t(1, 0), stone(), 20).unwrap(), 0);
        engine
            .set_relations(
                t(1, 0),
                Relations::from([(wood(), GoodsRelation::demand(Priority::Use))]),
            )
            .unwrap();
        engine.add_good(t(0, 0), wood(), 1).unwrap();
        engine
            .set_relations(
                t(0, 0),
                Relations::from([(wood(), GoodsRelation::provide(Priority::Store))]),
            )
            .unwrap();
        assert_eq!(engine.movement_count(), 0);

        // The demander filled up after the market paired the two.
        let gate = Site::Border(Border::between(t(0, 0), t(1, 0)).unwrap());
        let found = Match {
            good: wood(),
            provider: t(0, 0),
            demander: t(1, 0),
            path: vec![Site::Tile(t(0, 0)), gate, Site::Tile(t(1, 0))],
        };
        engine.start_matched(hive, found).unwrap();
        assert_eq!(engine.movement_count(), 0);
        assert_eq!(engine.retry, BTreeSet::from([t(0, 0), t(1, 0)]));
        assert!(!engine.storage_at(Site::Tile(t(0, 0))).unwrap().has_pending_claims());

        // Room frees up without the demander being marked dirty.
        let demander = engine.facilities.get_mut(&t(1, 0)).unwrap();
        assert_eq!(demander.storage.remove_good(stone(), 5), 5);

        let report = engine.step().unwrap();
        assert!(engine.retry.is_empty());
        assert_eq!(engine.movement_count(), 1);
        assert_eq!(report.hopped, 1);
        assert_eq!(engine.storage_at(gate).unwrap().present(wood()), 1);
    }

    #[test]
    fn full_gate_blocks_hop() {
        let mut engine = test_engine();
        for q in 0..3 {
            engine.place_facility(t(q, 0), kinds::MANUAL).unwrap();
        }
        engine.add_good(t(0, 0), wood(), 2).unwrap();
        let first = engine.request_movement(t(0, 0), t(2, 0), wood()).unwrap();
        let second = engine.request_movement(t(0, 0), t(2, 0), wood()).unwrap();
        assert!(matches!(engine.hop(first).unwrap(), HopOutcome::Hopped(_)));
        assert_eq!(engine.hop(second).unwrap(), HopOutcome::Blocked);
        assert_eq!(engine.movement(second).unwrap().hops_taken(), 0);
    }

    #[test]
    fn cancelling_in_gate_drops_loose_good() {
        let mut engine = test_engine();
        for q in 0..3 {
            engine.place_facility(t(q, 0), kinds::MANUAL).unwrap();
        }
        engine.add_good(t(0, 0), wood(), 1).unwrap();
        let id = engine.request_movement(t(0, 0), t(2, 0), wood()).unwrap();
        engine.hop(id).unwrap();
        engine.cancel_movement(id).unwrap();

        let gate = Site::Border(Border::between(t(0, 0), t(1, 0)).unwrap());
        assert_eq!(
            engine.loose_goods(),
            vec![LooseGood {
                site: gate,
                good: wood(),
                quantity: 1,
            }]
        );
        assert!(!engine.storage_at(gate).unwrap().has_pending_claims());
        assert!(!engine.storage_at(Site::Tile(t(2, 0))).unwrap().has_pending_claims());
        assert_eq!(engine.total_goods(wood()), 1);
        assert_eq!(engine.take_loose_good(gate, wood(), 5), 1);
        assert!(engine.loose_goods().is_empty());
    }

    #[test]
    fn manual_relations_drive_matching() {
        let mut engine = test_engine();
        engine.place_facility(t(0, 0), kinds::MANUAL).unwrap();
        engine.place_facility(t(1, 0), kinds::MANUAL).unwrap();
        engine
            .set_relations(
                t(1, 0),
                Relations::from([(wood(), GoodsRelation::demand(Priority::Use))]),
            )
            .unwrap();
        let hive = engine.hive_of(t(1, 0)).unwrap();
        assert_eq!(engine.hive(hive).unwrap().needs()[&wood()], 1);

        engine
            .set_relations(
                t(0, 0),
                Relations::from([(wood(), GoodsRelation::provide(Priority::Store))]),
            )
            .unwrap();
        assert_eq!(engine.movement_count(), 0, "nothing to provide yet");
        engine.add_good(t(0, 0), wood(), 1).unwrap();
        assert_eq!(engine.movement_count(), 1);
    }

    #[test]
    fn projects_accept_only_what_they_need() {
        let mut engine = test_engine();
        engine
            .start_project(t(3, 3), kinds::SINK, goods([(wood(), 2)]))
            .unwrap();
        assert_eq!(engine.deliver_to_project(t(3, 3), wood(), 5).unwrap(), 2);
        assert_eq!(engine.total_goods(wood()), 2);
        engine.complete_project(t(3, 3)).unwrap();
        assert!(engine.facility(t(3, 3)).is_some());
        assert!(engine.project(t(3, 3)).is_none());
    }

    #[test]
    fn incomplete_project_refuses_completion() {
        let mut engine = test_engine();
        engine
            .start_project(t(0, 0), kinds::SOURCE, goods([(wood(), 3)]))
            .unwrap();
        engine.deliver_to_project(t(0, 0), wood(), 1).unwrap();
        match engine.complete_project(t(0, 0)) {
            Err(EngineError::ProjectIncomplete { missing, .. }) => {
                assert_eq!(missing, goods([(wood(), 2)]))
            }
            other => panic!("expected ProjectIncomplete, got {other:?}"),
        }
        engine.cancel_project(t(0, 0)).unwrap();
        assert_eq!(engine.total_goods(wood()), 1);
    }

    #[test]
    fn zones_are_plain_labels() {
        let mut engine = test_engine();
        engine.set_zone(t(1, 1), Some("farm".into()));
        assert_eq!(engine.zone(t(1, 1)), Some("farm"));
        engine.set_zone(t(1, 1), None);
        assert_eq!(engine.zone(t(1, 1)), None);
    }

    #[test]
    fn best_storage_prefers_emptier_warehouse() {
        let mut engine = test_engine();
        engine.place_facility(t(0, 0), kinds::MANUAL).unwrap();
        engine.place_facility(t(1, 0), kinds::WAREHOUSE).unwrap();
        engine.place_facility(t(-1, 0), kinds::WAREHOUSE).unwrap();
        engine.add_good(t(1, 0), stone(), 10).unwrap();
        let path = engine.best_storage_for(t(0, 0), wood()).unwrap();
        assert_eq!(path.last(), Some(&Site::Tile(t(-1, 0))));
    }

    #[test]
    fn board_events_are_emitted() {
        let mut engine = test_engine();
        engine.move_agent(&AgentId(1), t(0, 0), None).unwrap();
        let outcome = engine.move_agent(&AgentId(2), t(0, 0), None).unwrap();
        assert!(matches!(outcome, MoveOutcome::Queued(_)));
        engine.remove_agent(AgentId(1)).unwrap();
        assert_eq!(engine.board().occupant(t(0, 0)), Some(AgentId(2)));
        assert_eq!(engine.event_bus.buffered_count(EventKind::AgentQueued), 1);
        assert_eq!(engine.event_bus.buffered_count(EventKind::AgentGranted), 1);
    }
}
