use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a hive (connected cluster of facilities).
    pub struct HiveId;

    /// Identifies a movement (one unit of goods in transit).
    pub struct MovementId;

    /// Identifies a pending request to enter an occupied tile.
    pub struct QueueStep;
}

/// Identifies a good type in the registry. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GoodType(pub u32);

/// Identifies a facility kind (template) in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FacilityKindId(pub u32);

/// Identifies a mobile agent on the board. Assigned by the behaviour layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u32);

/// Identifies a storage instance. Allocation tokens remember the storage
/// they were issued by so they cannot be finalized against another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_type_equality() {
        let a = GoodType(0);
        let b = GoodType(0);
        let c = GoodType(1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn good_types_order_by_index() {
        assert!(GoodType(0) < GoodType(1));
        assert!(AgentId(3) > AgentId(2));
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(GoodType(0), "wood");
        map.insert(GoodType(1), "stone");
        assert_eq!(map[&GoodType(0)], "wood");
    }
}
