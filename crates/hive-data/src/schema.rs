//! Serde data file structs for colony content definitions.
//!
//! Goods and facility kinds refer to each other by name on disk. The loader
//! resolves the names into registry ids.

use serde::Deserialize;

// ===========================================================================
// Goods
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GoodData {
    pub name: String,
}

// ===========================================================================
// Facilities
// ===========================================================================

/// A facility kind definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilityData {
    pub name: String,
    pub storage: StorageData,
    #[serde(default)]
    pub role: RoleData,
}

/// How a facility's storage is bounded.
#[derive(Debug, Clone, Deserialize)]
pub enum StorageData {
    /// `slots` cells of `slot_size` units, one good per cell.
    Slotted { slots: u32, slot_size: u32 },
    /// One fixed-size cell per listed good.
    Specific { limits: Vec<(String, u32)> },
}

/// How a facility publishes relations.
#[derive(Debug, Clone, Default, Deserialize)]
pub enum RoleData {
    Source {
        good: String,
    },
    Sink {
        good: String,
        target: u32,
    },
    Warehouse {
        #[serde(default)]
        buffers: Vec<(String, u32)>,
    },
    #[default]
    Manual,
}

// ===========================================================================
// TOML wrappers (TOML has no top-level arrays)
// ===========================================================================

#[derive(Debug, Deserialize)]
pub struct TomlGoods {
    pub goods: Vec<GoodData>,
}

#[derive(Debug, Deserialize)]
pub struct TomlFacilities {
    pub facilities: Vec<FacilityData>,
}
