//! Snapshot save and load.
//!
//! A snapshot records the world, not the traffic: facility stock, manual
//! relations, hive names, loose goods, zones and construction projects, all
//! behind a versioned header, encoded with `bitcode`.
//!
//! In-flight movements and pending claims are not saved. A unit sitting in a
//! gate is saved as a loose good on that border; a unit still reserved at
//! its provider is saved as plain stock. On load every facility re-publishes
//! its relations and the hives match afresh, so total goods are conserved.

use crate::engine::{Engine, EngineConfig, LooseGood, Project};
use crate::facility::Relations;
use crate::hex::{Axial, Site};
use crate::id::FacilityKindId;
use crate::pathfind::PathFinder;
use crate::registry::Registry;
use crate::storage::Goods;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a hive engine snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x4849_5645;

/// Bumped whenever the snapshot layout changes.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("could not encode snapshot: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("not a hive snapshot (magic 0x{0:08X})")]
    InvalidMagic(u32),
    #[error("snapshot version {0} is too old, current is {FORMAT_VERSION}")]
    UnsupportedVersion(u32),
    #[error("snapshot version {0} is newer than this build ({FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("could not decode snapshot: {0}")]
    Decode(String),
    #[error("snapshot does not fit the registry: {0}")]
    Restore(String),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Leads every snapshot so foreign or stale blobs are rejected early.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Engine tick when the snapshot was taken.
    pub tick: u64,
}

impl SnapshotHeader {
    pub fn new(tick: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        match self.version.cmp(&FORMAT_VERSION) {
            Ordering::Equal => Ok(()),
            Ordering::Less => Err(DeserializeError::UnsupportedVersion(self.version)),
            Ordering::Greater => Err(DeserializeError::FutureVersion(self.version)),
        }
    }
}

/// Read the header of a snapshot without restoring it.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    let snapshot: EngineSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ---------------------------------------------------------------------------
// Serializable state
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct FacilityRecord {
    tile: Axial,
    kind: FacilityKindId,
    stock: Goods,
    manual: Relations,
}

#[derive(Debug, Serialize, Deserialize)]
struct HiveRecord {
    name: String,
    members: Vec<Axial>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EngineSnapshot {
    header: SnapshotHeader,
    config: EngineConfig,
    facilities: Vec<FacilityRecord>,
    hives: Vec<HiveRecord>,
    hive_counter: u32,
    loose: Vec<LooseGood>,
    zones: BTreeMap<Axial, String>,
    projects: BTreeMap<Axial, Project>,
}

impl Engine {
    /// Serialize the world to a binary blob.
    pub fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let facilities = self
            .facilities
            .iter()
            .map(|(&tile, f)| FacilityRecord {
                tile,
                kind: f.kind,
                stock: f.storage.stock(),
                manual: f.manual.clone(),
            })
            .collect();
        let hives = self
            .hives
            .values()
            .map(|h| HiveRecord {
                name: h.name().to_string(),
                members: h.facilities().iter().copied().collect(),
            })
            .collect();

        let mut loose = self.loose_goods();
        for gate in self.gates.values() {
            for (good, quantity) in gate.storage.stock() {
                loose.push(LooseGood {
                    site: Site::Border(gate.border),
                    good,
                    quantity,
                });
            }
        }

        let snapshot = EngineSnapshot {
            header: SnapshotHeader::new(self.tick),
            config: self.config.clone(),
            facilities,
            hives,
            hive_counter: self.hive_counter,
            loose,
            zones: self.zones.clone(),
            projects: self.projects.clone(),
        };
        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Restore an engine from a blob produced by [`Engine::serialize`].
    ///
    /// The registry and path finder are not part of the snapshot and must be
    /// supplied. The event bus starts empty; listeners must be registered
    /// again.
    pub fn deserialize(
        data: &[u8],
        registry: Registry,
        finder: Box<dyn PathFinder>,
    ) -> Result<Self, DeserializeError> {
        let snapshot: EngineSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;

        let restore = |e: crate::engine::EngineError| DeserializeError::Restore(e.to_string());
        let mut engine = Engine::new(registry, snapshot.config, finder);
        engine.tick = snapshot.header.tick;

        for record in &snapshot.facilities {
            engine.insert_facility(record.tile, record.kind).map_err(restore)?;
        }
        for record in snapshot.facilities {
            let Some(facility) = engine.facilities.get_mut(&record.tile) else {
                continue;
            };
            facility.manual = record.manual;
            let overflow: Goods = record
                .stock
                .into_iter()
                .map(|(good, quantity)| (good, facility.storage.add_good(good, quantity)))
                .filter(|&(_, over)| over > 0)
                .collect();
            for (good, over) in overflow {
                tracing::warn!(
                    tile = %record.tile,
                    good = ?good,
                    overflow = over,
                    "restored stock overflowed; dropped loose"
                );
                engine.drop_loose(Site::Tile(record.tile), good, over);
            }
        }
        for record in snapshot.hives {
            let Some(id) = record.members.first().and_then(|&t| engine.hive_of(t)) else {
                continue;
            };
            if let Some(hive) = engine.hives.get_mut(id) {
                hive.rename(record.name);
            }
        }
        engine.hive_counter = snapshot.hive_counter;
        for lg in snapshot.loose {
            engine.drop_loose(lg.site, lg.good, lg.quantity);
        }
        engine.zones = snapshot.zones;
        engine.projects = snapshot.projects;

        // Placement events describe the restore itself, not the game.
        engine.event_bus.clear_all();
        engine.settle().map_err(restore)?;
        Ok(engine)
    }
}
