//! Property-based tests for the hive engine.
//!
//! Random operation sequences against a small colony; goods are never
//! created or destroyed by the engine, and claims always balance.

use hive_core::engine::Engine;
use hive_core::hex::{Axial, Site};
use hive_core::id::*;
use hive_core::storage::{Storage, goods};
use hive_core::token::TokenState;
use hive_core::test_utils::*;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

const LAYOUT: [(i32, FacilityKindId); 5] = [
    (0, kinds::SOURCE),
    (1, kinds::MANUAL),
    (2, kinds::WAREHOUSE),
    (3, kinds::MANUAL),
    (4, kinds::SINK),
];

fn tile(slot: usize) -> Axial {
    t(LAYOUT[slot].0, 0)
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize, u32),
    Remove(usize, u32),
    Step,
    Demolish(usize),
    Rebuild(usize),
    Sweep,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..LAYOUT.len(), 1..6u32).prop_map(|(s, q)| Op::Add(s, q)),
        (0..LAYOUT.len(), 1..4u32).prop_map(|(s, q)| Op::Remove(s, q)),
        Just(Op::Step),
        Just(Op::Step),
        Just(Op::Step),
        (0..LAYOUT.len()).prop_map(Op::Demolish),
        (0..LAYOUT.len()).prop_map(Op::Rebuild),
        Just(Op::Sweep),
    ]
}

fn build() -> Engine {
    let mut engine = test_engine();
    for (q, kind) in LAYOUT {
        engine.place_facility(t(q, 0), kind).unwrap();
    }
    engine
}

/// Apply `op`, returning the net change in wood the caller caused.
fn apply(engine: &mut Engine, op: &Op) -> i64 {
    match *op {
        Op::Add(slot, qty) => match engine.add_good(tile(slot), wood(), qty) {
            Ok(overflow) => i64::from(qty - overflow),
            Err(_) => 0,
        },
        Op::Remove(slot, qty) => match engine.remove_good(tile(slot), wood(), qty) {
            Ok(removed) => -i64::from(removed),
            Err(_) => 0,
        },
        Op::Step => {
            engine.step().unwrap();
            0
        }
        Op::Demolish(slot) => {
            let _ = engine.remove_facility(tile(slot));
            0
        }
        Op::Rebuild(slot) => {
            let _ = engine.place_facility(tile(slot), LAYOUT[slot].1);
            0
        }
        Op::Sweep => {
            let lying: Vec<(Site, u32)> = engine
                .loose_goods()
                .into_iter()
                .filter(|lg| lg.good == wood())
                .map(|lg| (lg.site, lg.quantity))
                .collect();
            lying
                .into_iter()
                .map(|(site, q)| -i64::from(engine.take_loose_good(site, wood(), q)))
                .sum()
        }
    }
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn goods_are_conserved(ops in proptest::collection::vec(arb_op(), 1..60)) {
        let mut engine = build();
        let mut expected: i64 = 0;
        for op in &ops {
            expected += apply(&mut engine, op);
            prop_assert_eq!(engine.total_goods(wood()) as i64, expected, "after {:?}", op);
        }
    }

    #[test]
    fn gates_never_overfill(ops in proptest::collection::vec(arb_op(), 1..60)) {
        let mut engine = build();
        for op in &ops {
            apply(&mut engine, op);
            for gate in engine.gates() {
                prop_assert!(gate.storage().total() <= 1);
            }
        }
    }

    #[test]
    fn movements_hold_one_unit_each(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let mut engine = build();
        for op in &ops {
            apply(&mut engine, op);
        }
        // Every live movement has a unit reserved where it stands and room
        // allocated where it goes.
        for (_, m) in engine.movements() {
            let holder = engine.storage_at(m.holder()).unwrap();
            prop_assert!(holder.reserved(wood()) >= 1);
            let target = engine.storage_at(Site::Tile(m.demander())).unwrap();
            prop_assert!(target.allocated(wood()) >= 1);
        }
    }

    #[test]
    fn finalizing_twice_counts_once(stocked in 1..20u32, take in 1..20u32) {
        let mut storage = Storage::slotted(4, 5);
        let stocked = stocked - storage.add_good(wood(), stocked);
        let take = take.min(stocked);

        let mut token = storage.reserve(&goods([(wood(), take)]), "prop").unwrap();
        prop_assert_eq!(storage.available(wood()), stocked - take);
        token.fulfill(&mut storage).unwrap();
        token.fulfill(&mut storage).unwrap();
        token.cancel(&mut storage).unwrap();
        prop_assert_eq!(token.state(), TokenState::Fulfilled);
        prop_assert_eq!(storage.present(wood()), stocked - take);
        prop_assert_eq!(storage.reserved(wood()), 0);
    }

    #[test]
    fn cancelled_claims_leave_no_trace(stocked in 0..20u32, room in 1..10u32) {
        let mut storage = Storage::slotted(4, 5);
        let stocked = stocked - storage.add_good(wood(), stocked);
        let before = storage.has_room(wood());
        let Ok(mut token) = storage.allocate(&goods([(wood(), room)]), "prop") else {
            prop_assert!(room > before);
            return Ok(());
        };
        prop_assert_eq!(storage.has_room(wood()), before - room);
        token.cancel(&mut storage).unwrap();
        token.fulfill(&mut storage).unwrap();
        prop_assert_eq!(token.state(), TokenState::Cancelled);
        prop_assert_eq!(storage.has_room(wood()), before);
        prop_assert_eq!(storage.present(wood()), stocked);
        prop_assert!(!storage.has_pending_claims());
    }
}
