//! Facilities, gates, and the goods relations facilities publish.
//!
//! A [`Facility`] occupies one tile and owns one [`Storage`]. Its
//! [`Role`] derives, from the current storage state, which goods it wants to
//! provide or demand and at which [`Priority`]. The engine compares the
//! derived relations with the last published value and re-advertises to the
//! facility's hive only when they differ.
//!
//! A [`Gate`] is a small storage on the border between two adjacent
//! facilities, used as a one-hop waypoint for goods in transit.

use crate::hex::{Axial, Border};
use crate::id::{FacilityKindId, GoodType, HiveId};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

/// Which side of the market an advertisement sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Advertise {
    Provide,
    Demand,
}

impl Advertise {
    pub fn opposite(self) -> Self {
        match self {
            Advertise::Provide => Advertise::Demand,
            Advertise::Demand => Advertise::Provide,
        }
    }
}

/// Match precedence, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Internal housekeeping (moving stock out of the way).
    Store,
    /// Soft target (keep a buffer topped up).
    Buffer,
    /// Hard requirement (needed to work).
    Use,
}

impl Priority {
    pub const COUNT: usize = 3;

    pub fn all() -> [Priority; 3] {
        [Priority::Store, Priority::Buffer, Priority::Use]
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// One published intent for one good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoodsRelation {
    pub advertise: Advertise,
    pub priority: Priority,
}

impl GoodsRelation {
    pub fn provide(priority: Priority) -> Self {
        Self {
            advertise: Advertise::Provide,
            priority,
        }
    }

    pub fn demand(priority: Priority) -> Self {
        Self {
            advertise: Advertise::Demand,
            priority,
        }
    }
}

/// A facility's relations, keyed by good.
pub type Relations = BTreeMap<GoodType, GoodsRelation>;

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// How a facility derives its relations. Enum dispatch, one variant per
/// behaviour the engine knows how to publish for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Offers `good` at [`Priority::Store`] whenever any is available.
    Source { good: GoodType },
    /// Requires `good` at [`Priority::Use`] until `target` units are present
    /// or on their way.
    Sink { good: GoodType, target: u32 },
    /// General storage. Tops buffered goods up to their target at
    /// [`Priority::Buffer`] and offers every surplus unit at
    /// [`Priority::Store`].
    Warehouse { buffers: BTreeMap<GoodType, u32> },
    /// Publishes the relations the behaviour layer sets explicitly, while
    /// the storage can honour them.
    Manual,
}

impl Role {
    /// Whether other facilities may drop off or pick up goods here without
    /// going through the backlog.
    pub fn is_general_storage(&self) -> bool {
        matches!(self, Role::Warehouse { .. })
    }

    /// Derive relations from the storage state.
    pub fn relations(&self, storage: &Storage, manual: &Relations) -> Relations {
        let mut relations = Relations::new();
        match self {
            Role::Source { good } => {
                if storage.available(*good) > 0 {
                    relations.insert(*good, GoodsRelation::provide(Priority::Store));
                }
            }
            Role::Sink { good, target } => {
                let incoming = storage.present(*good) + storage.allocated(*good);
                if incoming < *target && storage.has_room(*good) > 0 {
                    relations.insert(*good, GoodsRelation::demand(Priority::Use));
                }
            }
            Role::Warehouse { buffers } => {
                for (&good, &target) in buffers {
                    let incoming = storage.present(good) + storage.allocated(good);
                    if incoming < target {
                        if storage.has_room(good) > 0 {
                            relations.insert(good, GoodsRelation::demand(Priority::Buffer));
                        }
                    } else if storage.present(good) > target && storage.available(good) > 0 {
                        relations.insert(good, GoodsRelation::provide(Priority::Store));
                    }
                }
                for (good, _) in storage.stock() {
                    if !buffers.contains_key(&good) && storage.available(good) > 0 {
                        relations.insert(good, GoodsRelation::provide(Priority::Store));
                    }
                }
            }
            Role::Manual => {
                for (&good, &relation) in manual {
                    let capable = match relation.advertise {
                        Advertise::Provide => storage.available(good) > 0,
                        Advertise::Demand => storage.has_room(good) > 0,
                    };
                    if capable {
                        relations.insert(good, relation);
                    }
                }
            }
        }
        relations
    }
}

// ---------------------------------------------------------------------------
// Facility
// ---------------------------------------------------------------------------

/// A production or storage node occupying one tile.
#[derive(Debug)]
pub struct Facility {
    pub(crate) kind: FacilityKindId,
    pub(crate) role: Role,
    pub(crate) storage: Storage,
    pub(crate) hive: HiveId,
    /// Relations set by the behaviour layer, used by [`Role::Manual`].
    pub(crate) manual: Relations,
    /// Relations last advertised to the hive.
    pub(crate) published: Relations,
}

impl Facility {
    pub(crate) fn new(kind: FacilityKindId, role: Role, storage: Storage, hive: HiveId) -> Self {
        Self {
            kind,
            role,
            storage,
            hive,
            manual: Relations::new(),
            published: Relations::new(),
        }
    }

    pub fn kind(&self) -> FacilityKindId {
        self.kind
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn hive(&self) -> HiveId {
        self.hive
    }

    pub fn is_general_storage(&self) -> bool {
        self.role.is_general_storage()
    }

    /// The relations this facility would publish right now.
    pub fn goods_relations(&self) -> Relations {
        self.role.relations(&self.storage, &self.manual)
    }

    /// The relations most recently advertised to the hive.
    pub fn published_relations(&self) -> &Relations {
        &self.published
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// A waypoint storage on the border between two adjacent facilities. Exists
/// only while both tiles hold facilities.
#[derive(Debug)]
pub struct Gate {
    pub(crate) border: Border,
    pub(crate) storage: Storage,
}

impl Gate {
    pub(crate) fn new(border: Border, storage: Storage) -> Self {
        Self { border, storage }
    }

    pub fn border(&self) -> Border {
        self.border
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The two facility tiles this gate connects.
    pub fn tiles(&self) -> (Axial, Axial) {
        self.border.tiles()
    }
}
