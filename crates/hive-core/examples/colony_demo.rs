//! Colony demo: a woodcutter feeds a sawmill through a row of workshops,
//! surplus goes to a warehouse, and then the middle of the row is torn down.
//!
//! Run with: `RUST_LOG=debug cargo run -p hive-core --example colony_demo`

use hive_core::engine::Engine;
use hive_core::event::{Event, EventKind};
use hive_core::test_utils::*;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn report(engine: &Engine) {
    for (id, hive) in engine.hives() {
        println!("  {} ({id:?}): {} facilities", hive.name(), hive.len());
    }
    for (tile, facility) in engine.facilities() {
        let wood = facility.storage().present(wood());
        if wood > 0 {
            println!("  {tile}: {wood} wood");
        }
    }
    for lg in engine.loose_goods() {
        println!("  loose at {}: {} x {:?}", lg.site, lg.quantity, lg.good);
    }
}

fn main() {
    init_tracing();

    let mut engine = test_engine();
    engine.on_passive(
        EventKind::MovementArrived,
        Box::new(|event| {
            if let Event::MovementArrived { demander, tick, .. } = event {
                println!("tick {tick}: wood arrived at {demander}");
            }
        }),
    );

    // woodcutter -- workshop -- workshop -- sawmill
    //                  |
    //              warehouse
    engine.place_facility(t(0, 0), kinds::SOURCE).expect("place woodcutter");
    engine.place_facility(t(1, 0), kinds::MANUAL).expect("place workshop");
    engine.place_facility(t(2, 0), kinds::MANUAL).expect("place workshop");
    engine.place_facility(t(3, 0), kinds::SINK).expect("place sawmill");
    engine.place_facility(t(1, 1), kinds::WAREHOUSE).expect("place warehouse");

    engine.add_good(t(0, 0), wood(), 6).expect("stock woodcutter");
    println!("after stocking:");
    report(&engine);

    for _ in 0..20 {
        let step = engine.step().expect("step");
        if step.hopped + step.arrived > 0 {
            println!(
                "tick {}: {} hopped, {} arrived, {} blocked",
                step.tick, step.hopped, step.arrived, step.blocked
            );
        }
    }
    println!("after 20 steps:");
    report(&engine);

    engine.remove_facility(t(2, 0)).expect("demolish workshop");
    println!("after demolishing (2,0):");
    report(&engine);

    let data = engine.serialize().expect("serialize");
    let restored = Engine::deserialize(&data, test_registry(), Box::new(BreadthFirst))
        .expect("deserialize");
    println!(
        "snapshot: {} bytes, {} hives, {} wood",
        data.len(),
        restored.hive_count(),
        restored.total_goods(wood())
    );
}
