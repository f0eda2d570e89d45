//! Basic demonstration of the Conduit network formation engine.
//!
//! Run with: cargo run --example basic_demo

use conduit_sim::{Dir, NetWorld, NodeAttrs, NodeSpec};

const DT: f32 = 1.0 / 30.0;

fn main() {
    env_logger::init();

    println!("=== Conduit - Network Formation Demo ===\n");

    let mut sim = NetWorld::new();

    // Two separate pipe runs with a one-tile gap between them.
    let mut id = 0;
    for x in [0, 1, 2, 4, 5, 6] {
        sim.spawn_conduit(id, (x, 0), true, &[NodeSpec::pipe("pipe", &[Dir::East, Dir::West])])
            .expect("valid pipe config");
        id += 1;
    }

    // An HV loop: generator, two cables, a machine drawing load.
    let hv = [
        sim.spawn_conduit(
            100,
            (0, 5),
            true,
            &[NodeSpec::hv_wire("wire").with_attrs(NodeAttrs {
                supply_w: 15_000.0,
                ..Default::default()
            })],
        )
        .expect("valid wire config"),
        sim.spawn_conduit(101, (1, 5), true, &[NodeSpec::hv_wire("wire")])
            .expect("valid wire config"),
        sim.spawn_conduit(102, (2, 5), true, &[NodeSpec::hv_wire("wire")])
            .expect("valid wire config"),
        sim.spawn_conduit(
            103,
            (3, 5),
            true,
            &[NodeSpec::hv_wire("wire").with_attrs(NodeAttrs {
                load_w: 4_200.0,
                ..Default::default()
            })],
        )
        .expect("valid wire config"),
    ];

    sim.step(DT);
    println!("After initial formation:");
    print_networks(&sim);

    // Bridge the pipe gap; the two pipe nets merge.
    println!("\n--- Bridging the pipe gap at (3, 0) ---\n");
    sim.spawn_conduit(50, (3, 0), true, &[NodeSpec::pipe("pipe", &[Dir::East, Dir::West])])
        .expect("valid pipe config");
    sim.step(DT);
    print_networks(&sim);

    // Cut the HV line in the middle; the power net splits.
    println!("\n--- Cutting the HV cable at (1, 5) ---\n");
    sim.despawn_conduit(hv[1]);
    sim.step(DT);
    print_networks(&sim);
    if let Some(stats) = sim.power_stats(hv[0], "wire") {
        println!(
            "Generator side: supply={:.0} W load={:.0} W",
            stats.supply_w, stats.load_w
        );
    }
    if let Some(stats) = sim.power_stats(hv[3], "wire") {
        println!(
            "Machine side:   supply={:.0} W load={:.0} W",
            stats.supply_w, stats.load_w
        );
    }

    println!("\n=== Final State (JSON) ===\n");
    println!("{}", sim.snapshot().to_json_pretty().expect("snapshot serializes"));
}

fn print_networks(sim: &NetWorld) {
    let snapshot = sim.snapshot();
    println!(
        "  tick {}: {} live network(s)",
        sim.current_tick(),
        snapshot.groups.len()
    );
    for group in &snapshot.groups {
        println!(
            "    net {:>3} [{}]: {} node(s)",
            group.net_id,
            group.kind,
            group.nodes.len()
        );
    }
}
