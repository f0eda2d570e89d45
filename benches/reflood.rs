//! Criterion bench for the reflood pass on a dense wire grid.

use conduit_sim::{NetWorld, NodeSpec};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

const DT: f32 = 1.0 / 30.0;

/// Build a size x size grid of omnidirectional HV wires, fully flooded.
fn wire_grid(size: i32) -> NetWorld {
    let mut sim = NetWorld::new();
    let mut id = 0;
    for x in 0..size {
        for y in 0..size {
            sim.spawn_conduit(id, (x, y), true, &[NodeSpec::hv_wire("wire")])
                .expect("valid wire config");
            id += 1;
        }
    }
    sim.tick(DT);
    sim
}

fn bench_reflood(c: &mut Criterion) {
    let size = 20;

    c.bench_function("full reflood 20x20", |b| {
        b.iter_batched_ref(
            || wire_grid(size),
            |sim| {
                // Force a whole-grid reflood with no topology change.
                let corner = sim
                    .world()
                    .iter_entities()
                    .find_map(|e| e.get::<conduit_sim::NodeHost>().map(|_| e.id()))
                    .expect("grid has conduits");
                sim.queue_reflood(corner, "wire").expect("slot exists");
                sim.tick(DT);
            },
            BatchSize::LargeInput,
        )
    });

    c.bench_function("incremental anchor toggle 20x20", |b| {
        b.iter_batched_ref(
            || wire_grid(size),
            |sim| {
                let target = sim
                    .world()
                    .iter_entities()
                    .find_map(|e| e.get::<conduit_sim::NodeHost>().map(|_| e.id()))
                    .expect("grid has conduits");
                sim.set_anchored(target, false).expect("conduit exists");
                sim.tick(DT);
                sim.set_anchored(target, true).expect("conduit exists");
                sim.tick(DT);
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_reflood);
criterion_main!(benches);
