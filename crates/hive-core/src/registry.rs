use crate::facility::Role;
use crate::id::*;
use crate::storage::CapacityPolicy;
use std::collections::HashMap;

/// A good type definition in the registry.
#[derive(Debug, Clone)]
pub struct GoodDef {
    pub name: String,
}

/// A facility kind: what storage it gets and how it publishes relations.
#[derive(Debug, Clone)]
pub struct FacilityKindDef {
    pub name: String,
    pub storage: CapacityPolicy,
    pub role: Role,
}

impl FacilityKindDef {
    /// Every good this kind refers to, in its storage policy or its role.
    fn referenced_goods(&self) -> Vec<GoodType> {
        let mut goods = Vec::new();
        if let CapacityPolicy::Specific(limits) = &self.storage {
            goods.extend(limits.keys().copied());
        }
        match &self.role {
            Role::Source { good } | Role::Sink { good, .. } => goods.push(*good),
            Role::Warehouse { buffers } => goods.extend(buffers.keys().copied()),
            Role::Manual => {}
        }
        goods
    }
}

/// Collects goods and facility kinds, then freezes them into a [`Registry`].
/// Kinds may be tweaked by name between registration and [`build`](Self::build).
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    goods: Vec<GoodDef>,
    good_name_to_id: HashMap<String, GoodType>,
    facilities: Vec<FacilityKindDef>,
    facility_name_to_id: HashMap<String, FacilityKindId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a name twice returns the existing id.
    pub fn register_good(&mut self, name: &str) -> GoodType {
        if let Some(&id) = self.good_name_to_id.get(name) {
            return id;
        }
        let id = GoodType(self.goods.len() as u32);
        self.goods.push(GoodDef {
            name: name.to_string(),
        });
        self.good_name_to_id.insert(name.to_string(), id);
        id
    }

    pub fn register_facility(
        &mut self,
        name: &str,
        storage: CapacityPolicy,
        role: Role,
    ) -> FacilityKindId {
        let id = FacilityKindId(self.facilities.len() as u32);
        self.facilities.push(FacilityKindDef {
            name: name.to_string(),
            storage,
            role,
        });
        self.facility_name_to_id.insert(name.to_string(), id);
        id
    }

    /// Adjust a registered kind, e.g. a mod raising a warehouse's slot count.
    pub fn mutate_facility<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut FacilityKindDef),
    {
        let id = self
            .facility_name_to_id
            .get(name)
            .ok_or(RegistryError::NotFound(name.to_string()))?;
        f(&mut self.facilities[id.0 as usize]);
        Ok(())
    }

    pub fn good_id(&self, name: &str) -> Option<GoodType> {
        self.good_name_to_id.get(name).copied()
    }

    pub fn facility_id(&self, name: &str) -> Option<FacilityKindId> {
        self.facility_name_to_id.get(name).copied()
    }

    /// Fails if a kind names a good that was never registered.
    pub fn build(self) -> Result<Registry, RegistryError> {
        for def in &self.facilities {
            for good in def.referenced_goods() {
                if good.0 as usize >= self.goods.len() {
                    return Err(RegistryError::InvalidGoodRef {
                        facility: def.name.clone(),
                        good,
                    });
                }
            }
        }

        Ok(Registry {
            goods: self.goods,
            good_name_to_id: self.good_name_to_id,
            facilities: self.facilities,
            facility_name_to_id: self.facility_name_to_id,
        })
    }
}

/// Read-only content tables shared by every facility of the colony.
#[derive(Debug)]
pub struct Registry {
    goods: Vec<GoodDef>,
    good_name_to_id: HashMap<String, GoodType>,
    facilities: Vec<FacilityKindDef>,
    facility_name_to_id: HashMap<String, FacilityKindId>,
}

impl Registry {
    pub fn get_good(&self, id: GoodType) -> Option<&GoodDef> {
        self.goods.get(id.0 as usize)
    }

    pub fn get_facility(&self, id: FacilityKindId) -> Option<&FacilityKindDef> {
        self.facilities.get(id.0 as usize)
    }

    pub fn good_id(&self, name: &str) -> Option<GoodType> {
        self.good_name_to_id.get(name).copied()
    }

    pub fn facility_id(&self, name: &str) -> Option<FacilityKindId> {
        self.facility_name_to_id.get(name).copied()
    }

    pub fn good_count(&self) -> usize {
        self.goods.len()
    }

    pub fn facility_count(&self) -> usize {
        self.facilities.len()
    }

    /// All good types, in registration order.
    pub fn goods(&self) -> impl Iterator<Item = GoodType> + '_ {
        (0..self.goods.len() as u32).map(GoodType)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no facility kind named '{0}'")]
    NotFound(String),
    #[error("facility kind '{facility}' refers to unknown good {good:?}")]
    InvalidGoodRef { facility: String, good: GoodType },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn setup_builder() -> RegistryBuilder {
        let mut b = RegistryBuilder::new();
        let wood = b.register_good("wood");
        let planks = b.register_good("planks");
        b.register_facility(
            "woodcutter",
            CapacityPolicy::Slotted {
                slots: 2,
                slot_size: 4,
            },
            Role::Source { good: wood },
        );
        b.register_facility(
            "sawmill",
            CapacityPolicy::Specific(BTreeMap::from([(wood, 4), (planks, 4)])),
            Role::Sink {
                good: wood,
                target: 4,
            },
        );
        b
    }

    #[test]
    fn register_and_build() {
        let reg = setup_builder().build().unwrap();
        assert_eq!(reg.good_count(), 2);
        assert_eq!(reg.facility_count(), 2);
        assert_eq!(reg.goods().collect::<Vec<_>>(), vec![GoodType(0), GoodType(1)]);
    }

    #[test]
    fn lookup_by_name() {
        let reg = setup_builder().build().unwrap();
        assert_eq!(reg.good_id("planks"), Some(GoodType(1)));
        assert!(reg.good_id("nonexistent").is_none());
        let sawmill = reg.get_facility(reg.facility_id("sawmill").unwrap()).unwrap();
        assert_eq!(sawmill.name, "sawmill");
    }

    #[test]
    fn registering_a_good_twice_reuses_the_id() {
        let mut b = RegistryBuilder::new();
        let first = b.register_good("stone");
        assert_eq!(b.register_good("stone"), first);
        assert_eq!(b.build().unwrap().good_count(), 1);
    }

    #[test]
    fn mutate_facility() {
        let mut builder = setup_builder();
        builder
            .mutate_facility("woodcutter", |def| {
                def.storage = CapacityPolicy::Slotted {
                    slots: 6,
                    slot_size: 4,
                };
            })
            .unwrap();
        let reg = builder.build().unwrap();
        let def = reg.get_facility(FacilityKindId(0)).unwrap();
        assert_eq!(
            def.storage,
            CapacityPolicy::Slotted {
                slots: 6,
                slot_size: 4
            }
        );
    }

    #[test]
    fn mutate_nonexistent_fails() {
        let mut builder = setup_builder();
        match builder.mutate_facility("nonexistent", |_| {}) {
            Err(RegistryError::NotFound(name)) => assert_eq!(name, "nonexistent"),
            other => panic!("expected NotFound, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_good_in_role_fails() {
        let mut b = RegistryBuilder::new();
        b.register_facility(
            "bad",
            CapacityPolicy::Slotted {
                slots: 1,
                slot_size: 1,
            },
            Role::Source { good: GoodType(999) },
        );
        match b.build() {
            Err(RegistryError::InvalidGoodRef { facility, good }) => {
                assert_eq!(facility, "bad");
                assert_eq!(good, GoodType(999));
            }
            other => panic!("expected InvalidGoodRef, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_good_in_storage_limits_fails() {
        let mut b = RegistryBuilder::new();
        b.register_good("wood");
        b.register_facility(
            "bad",
            CapacityPolicy::Specific(BTreeMap::from([(GoodType(5), 1)])),
            Role::Manual,
        );
        assert!(b.build().is_err());
    }

    #[test]
    fn empty_registry_builds_successfully() {
        let reg = RegistryBuilder::new().build().unwrap();
        assert_eq!(reg.good_count(), 0);
        assert_eq!(reg.facility_count(), 0);
        assert!(reg.get_good(GoodType(0)).is_none());
    }
}
