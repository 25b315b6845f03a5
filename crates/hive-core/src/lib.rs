//! Hive Core -- the goods logistics engine for colony-building games.
//!
//! Facilities sit on hex tiles. Adjacent facilities are joined by gates on
//! their shared border and form a hive: a connected cluster with one
//! advertisement market. Facilities advertise what they can provide and what
//! they need; the hive matches the two and the engine moves one unit at a
//! time along a path of gates until it lands.
//!
//! # Step Pipeline
//!
//! Each call to [`engine::Engine::step`]:
//!
//! 1. **Settle** -- Dirty facilities re-publish their relations; matches
//!    become movements.
//! 2. **Transit** -- Per facility, one movement hops into the next gate or
//!    its destination. Rings of blocked movements rotate as one unit.
//! 3. **Settle** -- Arrivals and departures change relations.
//! 4. **Deliver** -- Board grants become events; buffered events go out.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Owns facilities, gates, hives and movements.
//! - [`storage::Storage`] -- Capacity-bounded stock with reservation and
//!   allocation claims.
//! - [`token::AllocationToken`] -- A pending claim; fulfil or cancel exactly
//!   once.
//! - [`hive::Hive`] -- Membership, priority backlogs and the path cache.
//! - [`movement::Movement`] -- One unit in transit.
//! - [`board::Board`] -- Tile occupancy with FIFO queues and deadlock
//!   release.
//! - [`registry::Registry`] -- Immutable goods and facility kinds.
//! - [`event::EventBus`] -- Buffered, typed simulation events.
//! - [`serialize`] -- Versioned snapshots via bitcode.

pub mod board;
pub mod engine;
pub mod event;
pub mod facility;
pub mod fixed;
pub mod hex;
pub mod hive;
pub mod id;
pub mod movement;
pub mod pathfind;
pub mod registry;
pub mod serialize;
pub mod storage;
pub mod token;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
