//! Per-site goods ledger with reservation and allocation counters.
//!
//! Every good tracked by a [`Storage`] has three counters: `present` (units
//! physically stored), `reserved` (units claimed for removal) and `allocated`
//! (room claimed for incoming units). Counters only change through the
//! [`AllocationToken`] lifecycle or through the direct
//! [`add_good`](Storage::add_good) / [`remove_good`](Storage::remove_good)
//! path used for transfers that need no contention window.
//!
//! Two capacity policies are supported:
//!
//! - [`CapacityPolicy::Slotted`] -- a fixed number of slots, each holding up
//!   to `slot_size` units of a single good. Room is computed per slot.
//! - [`CapacityPolicy::Specific`] -- an explicit maximum per good.
//!
//! Both policies are stored as a flat list of cells. A slotted storage has
//! one cell per slot (bound to a good while it holds or expects units); a
//! specific storage has one permanently bound cell per good.

use crate::id::{GoodType, StorageId};
use crate::token::{AllocationToken, Claim, ClaimKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A bag of goods: quantity per good type.
pub type Goods = BTreeMap<GoodType, u32>;

static NEXT_STORAGE_ID: AtomicU64 = AtomicU64::new(1);

fn next_storage_id() -> StorageId {
    StorageId(NEXT_STORAGE_ID.fetch_add(1, Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors returned by storage operations.
///
/// `Insufficient` and `NoRoom` are contention outcomes ("try again later").
/// `ForeignToken` is a bookkeeping bug: a token was finalized against a
/// storage that did not issue it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("not enough {good:?}: requested {requested}, available {available}")]
    Insufficient {
        good: GoodType,
        requested: u32,
        available: u32,
    },
    #[error("no room for {good:?}: requested {requested}, room {room}")]
    NoRoom {
        good: GoodType,
        requested: u32,
        room: u32,
    },
    #[error("token issued by storage {token_storage:?} finalized against {storage:?}")]
    ForeignToken {
        token_storage: StorageId,
        storage: StorageId,
    },
}

// ---------------------------------------------------------------------------
// Capacity policy
// ---------------------------------------------------------------------------

/// How a storage bounds what it can hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityPolicy {
    /// `slots` slots, each holding up to `slot_size` units of one good.
    Slotted { slots: u32, slot_size: u32 },
    /// An explicit maximum per good. Goods not listed cannot be stored.
    Specific(BTreeMap<GoodType, u32>),
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Cell {
    good: Option<GoodType>,
    /// Specific cells stay bound to their good even when empty.
    pinned: bool,
    max: u32,
    present: u32,
    reserved: u32,
    allocated: u32,
}

impl Cell {
    fn available(&self) -> u32 {
        self.present - self.reserved
    }

    fn room(&self) -> u32 {
        self.max.saturating_sub(self.present + self.allocated)
    }

    fn is_free(&self) -> bool {
        self.good.is_none()
    }

    fn holds(&self, good: GoodType) -> bool {
        self.good == Some(good)
    }

    /// Unbind an unpinned cell once nothing is stored or expected in it.
    fn release_if_empty(&mut self) {
        if !self.pinned && self.present == 0 && self.allocated == 0 {
            debug_assert_eq!(self.reserved, 0);
            self.good = None;
        }
    }
}

/// Read-only view of one slot (or one specific good), for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedSlot {
    pub good: Option<GoodType>,
    pub present: u32,
    pub reserved: u32,
    pub allocated: u32,
    pub capacity: u32,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// A goods ledger owned by exactly one facility or gate.
#[derive(Debug, PartialEq, Eq)]
pub struct Storage {
    id: StorageId,
    policy: CapacityPolicy,
    cells: Vec<Cell>,
}

impl Storage {
    /// Create an empty storage with the given capacity policy.
    pub fn new(policy: CapacityPolicy) -> Self {
        let cells = match &policy {
            CapacityPolicy::Slotted { slots, slot_size } => (0..*slots)
                .map(|_| Cell {
                    max: *slot_size,
                    ..Cell::default()
                })
                .collect(),
            CapacityPolicy::Specific(limits) => limits
                .iter()
                .map(|(&good, &max)| Cell {
                    good: Some(good),
                    pinned: true,
                    max,
                    ..Cell::default()
                })
                .collect(),
        };
        Self {
            id: next_storage_id(),
            policy,
            cells,
        }
    }

    /// Shorthand for a slotted storage.
    pub fn slotted(slots: u32, slot_size: u32) -> Self {
        Self::new(CapacityPolicy::Slotted { slots, slot_size })
    }

    /// Shorthand for a specific storage.
    pub fn specific(limits: impl IntoIterator<Item = (GoodType, u32)>) -> Self {
        Self::new(CapacityPolicy::Specific(limits.into_iter().collect()))
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn policy(&self) -> &CapacityPolicy {
        &self.policy
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Units of `good` physically present.
    pub fn present(&self, good: GoodType) -> u32 {
        self.cells_of(good).map(|c| c.present).sum()
    }

    /// Units of `good` claimed for removal by pending reservations.
    pub fn reserved(&self, good: GoodType) -> u32 {
        self.cells_of(good).map(|c| c.reserved).sum()
    }

    /// Room claimed for incoming `good` by pending allocations.
    pub fn allocated(&self, good: GoodType) -> u32 {
        self.cells_of(good).map(|c| c.allocated).sum()
    }

    /// `present - reserved`: units that can still be reserved or removed.
    pub fn available(&self, good: GoodType) -> u32 {
        self.cells_of(good).map(Cell::available).sum()
    }

    /// Room left for `good`, net of present units and pending allocations.
    ///
    /// For slotted storage this is computed per slot: partially filled slots
    /// of the same good plus every free slot.
    pub fn has_room(&self, good: GoodType) -> u32 {
        self.cells
            .iter()
            .filter(|c| c.holds(good) || c.is_free())
            .map(Cell::room)
            .sum()
    }

    /// Snapshot of present units per good. Goods with zero units are omitted.
    pub fn stock(&self) -> Goods {
        let mut stock = Goods::new();
        for cell in &self.cells {
            if let Some(good) = cell.good {
                if cell.present > 0 {
                    *stock.entry(good).or_insert(0) += cell.present;
                }
            }
        }
        stock
    }

    /// Total present units across all goods.
    pub fn total(&self) -> u32 {
        self.cells.iter().map(|c| c.present).sum()
    }

    /// Whether any reservation or allocation is still pending.
    pub fn has_pending_claims(&self) -> bool {
        self.cells.iter().any(|c| c.reserved > 0 || c.allocated > 0)
    }

    /// Slotted storage only: a good spread across more slots than its
    /// quantity requires, if any. A tidiness signal, not an error.
    pub fn fragmented(&self) -> Option<GoodType> {
        let CapacityPolicy::Slotted { slot_size, .. } = self.policy else {
            return None;
        };
        if slot_size == 0 {
            return None;
        }
        let mut usage: BTreeMap<GoodType, (u32, u32)> = BTreeMap::new();
        for cell in &self.cells {
            if let Some(good) = cell.good {
                let entry = usage.entry(good).or_insert((0, 0));
                entry.0 += 1;
                entry.1 += cell.present + cell.allocated;
            }
        }
        usage
            .into_iter()
            .find(|&(_, (slots, units))| slots > units.div_ceil(slot_size))
            .map(|(good, _)| good)
    }

    /// Per-slot counters for display. Performs no mutation.
    pub fn rendered_slots(&self) -> Vec<RenderedSlot> {
        self.cells
            .iter()
            .map(|c| RenderedSlot {
                good: c.good,
                present: c.present,
                reserved: c.reserved,
                allocated: c.allocated,
                capacity: c.max,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Tokenized claims
    // -----------------------------------------------------------------------

    /// Claim `goods` for removal. All-or-nothing across the requested map.
    ///
    /// Fails without side effects if any quantity exceeds
    /// [`available`](Storage::available).
    pub fn reserve(
        &mut self,
        goods: &Goods,
        reason: impl Into<String>,
    ) -> Result<AllocationToken, StorageError> {
        for (&good, &requested) in goods {
            let available = self.available(good);
            if requested > available {
                return Err(StorageError::Insufficient {
                    good,
                    requested,
                    available,
                });
            }
        }

        let mut claims = Vec::new();
        for (&good, &requested) in goods {
            let mut remaining = requested;
            // Draw from the emptiest slots first so partial slots drain.
            let mut order: Vec<usize> = self.indices_of(good).collect();
            order.sort_by_key(|&i| (self.cells[i].available(), i));
            for idx in order {
                if remaining == 0 {
                    break;
                }
                let cell = &mut self.cells[idx];
                let take = remaining.min(cell.available());
                if take == 0 {
                    continue;
                }
                cell.reserved += take;
                remaining -= take;
                claims.push(Claim {
                    cell: idx,
                    good,
                    quantity: take,
                });
            }
        }

        let token = AllocationToken::new(self.id, ClaimKind::Reservation, claims, reason.into());
        tracing::trace!(storage = ?self.id, goods = ?goods, reason = token.reason(), "reserved");
        Ok(token)
    }

    /// Claim room for incoming `goods`. All-or-nothing across the requested map.
    ///
    /// Fails without side effects if any quantity exceeds
    /// [`has_room`](Storage::has_room).
    pub fn allocate(
        &mut self,
        goods: &Goods,
        reason: impl Into<String>,
    ) -> Result<AllocationToken, StorageError> {
        for (&good, &requested) in goods {
            let room = self.has_room(good);
            if requested > room {
                return Err(StorageError::NoRoom {
                    good,
                    requested,
                    room,
                });
            }
        }

        let mut claims = Vec::new();
        for (&good, &requested) in goods {
            let mut remaining = requested;
            for idx in self.fill_order(good) {
                if remaining == 0 {
                    break;
                }
                let cell = &mut self.cells[idx];
                let take = remaining.min(cell.room());
                if take == 0 {
                    continue;
                }
                cell.good = Some(good);
                cell.allocated += take;
                remaining -= take;
                claims.push(Claim {
                    cell: idx,
                    good,
                    quantity: take,
                });
            }
        }

        let token = AllocationToken::new(self.id, ClaimKind::Allocation, claims, reason.into());
        tracing::trace!(storage = ?self.id, goods = ?goods, reason = token.reason(), "allocated");
        Ok(token)
    }

    /// Commit a pending claim: reservations leave, allocations arrive.
    pub(crate) fn commit(&mut self, kind: ClaimKind, claims: &[Claim]) {
        commit_cells(&mut self.cells, kind, claims);
    }

    /// Room for `good` once the given pending tokens (issued by this storage)
    /// are fulfilled. Nothing is mutated.
    pub(crate) fn room_after(&self, leaving: &[&AllocationToken], good: GoodType) -> u32 {
        let mut cells = self.cells.clone();
        for token in leaving {
            if token.storage() == self.id && token.is_pending() {
                commit_cells(&mut cells, token.kind(), token.claims());
            }
        }
        cells
            .iter()
            .filter(|c| c.holds(good) || c.is_free())
            .map(Cell::room)
            .sum()
    }

    /// Drop a pending claim without touching `present`.
    pub(crate) fn revert(&mut self, kind: ClaimKind, claims: &[Claim]) {
        for claim in claims {
            let cell = &mut self.cells[claim.cell];
            debug_assert!(cell.holds(claim.good));
            match kind {
                ClaimKind::Reservation => {
                    cell.reserved = cell.reserved.saturating_sub(claim.quantity);
                }
                ClaimKind::Allocation => {
                    cell.allocated = cell.allocated.saturating_sub(claim.quantity);
                }
            }
            cell.release_if_empty();
        }
    }

    /// Forget every pending claim. Used when the owners of outstanding
    /// tokens are discarded wholesale (snapshot capture of a live storage).
    pub(crate) fn clear_claims(&mut self) {
        for cell in &mut self.cells {
            cell.reserved = 0;
            cell.allocated = 0;
            cell.release_if_empty();
        }
    }

    // -----------------------------------------------------------------------
    // Direct (non-tokenized) transfers
    // -----------------------------------------------------------------------

    /// Add units immediately. Returns the amount that didn't fit.
    #[must_use = "overflow count indicates goods that did not fit"]
    pub fn add_good(&mut self, good: GoodType, quantity: u32) -> u32 {
        let mut remaining = quantity;
        for idx in self.fill_order(good) {
            if remaining == 0 {
                break;
            }
            let cell = &mut self.cells[idx];
            let take = remaining.min(cell.room());
            if take == 0 {
                continue;
            }
            cell.good = Some(good);
            cell.present += take;
            remaining -= take;
        }
        remaining
    }

    /// Remove unreserved units immediately. Returns the amount actually removed.
    #[must_use = "returns the quantity actually removed, which may be less than requested"]
    pub fn remove_good(&mut self, good: GoodType, quantity: u32) -> u32 {
        let mut remaining = quantity;
        let mut order: Vec<usize> = self.indices_of(good).collect();
        order.sort_by_key(|&i| (self.cells[i].available(), i));
        for idx in order {
            if remaining == 0 {
                break;
            }
            let cell = &mut self.cells[idx];
            let take = remaining.min(cell.available());
            cell.present -= take;
            remaining -= take;
            cell.release_if_empty();
        }
        quantity - remaining
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn cells_of(&self, good: GoodType) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(move |c| c.holds(good))
    }

    fn indices_of(&self, good: GoodType) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.holds(good))
            .map(|(i, _)| i)
    }

    /// Cells to fill with `good`: fullest bound cells first, then free slots.
    fn fill_order(&self, good: GoodType) -> Vec<usize> {
        let mut bound: Vec<usize> = self.indices_of(good).collect();
        bound.sort_by_key(|&i| (self.cells[i].room(), i));
        let free = self
            .cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_free())
            .map(|(i, _)| i);
        bound.into_iter().chain(free).collect()
    }
}

fn commit_cells(cells: &mut [Cell], kind: ClaimKind, claims: &[Claim]) {
    for claim in claims {
        let cell = &mut cells[claim.cell];
        debug_assert!(cell.holds(claim.good));
        match kind {
            ClaimKind::Reservation => {
                cell.reserved = cell.reserved.saturating_sub(claim.quantity);
                cell.present = cell.present.saturating_sub(claim.quantity);
            }
            ClaimKind::Allocation => {
                cell.allocated = cell.allocated.saturating_sub(claim.quantity);
                cell.present += claim.quantity;
            }
        }
        cell.release_if_empty();
    }
}

/// Build a [`Goods`] map from `(good, quantity)` pairs.
pub fn goods(entries: impl IntoIterator<Item = (GoodType, u32)>) -> Goods {
    let mut map = Goods::new();
    for (good, quantity) in entries {
        *map.entry(good).or_insert(0) += quantity;
    }
    map
}
