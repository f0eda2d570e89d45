//! Topology event systems - translate entity changes into reflood requests.
//!
//! Nothing here recomputes connectivity. These systems only refresh the
//! cached transform state on affected nodes and enqueue them; the batched
//! pass does the rest.

use crate::components::{Anchored, Facing, NodeHost, TilePos};
use crate::graph::NetGraph;
use bevy_ecs::prelude::*;

/// System that forwards anchor, facing, and tile changes to the graph.
///
/// Unanchoring a `need_anchored` node makes it unconnectable, which tears
/// its group down on the next pass; anchoring queues it so it joins or
/// forms a group. Facing changes recompute the rotated direction masks.
pub fn transform_change_system(
    mut graph: ResMut<NetGraph>,
    query: Query<
        (Entity, &Anchored, &Facing),
        (
            With<NodeHost>,
            Or<(Changed<Anchored>, Changed<Facing>, Changed<TilePos>)>,
        ),
    >,
) {
    for (entity, anchored, facing) in query.iter() {
        graph.update_transform_state(entity, anchored.0, *facing);
    }
}

/// System that removes the nodes of hosts that lost their `NodeHost`
/// component, including plain despawns. The nodes are marked deleting and
/// queued, so the remainder of their networks resplits on the same tick.
pub fn host_removal_system(
    mut graph: ResMut<NetGraph>,
    mut removed: RemovedComponents<NodeHost>,
) {
    for entity in removed.read() {
        graph.remove_entity_nodes(entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ConduitBundle, ConduitId};
    use crate::grid::{tile_grid_update_system, TileGrid};
    use crate::node::{Dir, NodeSpec};
    use crate::systems::reflood::network_reflood_system;
    use crate::components::{NetConfig, SimTick};

    fn test_world() -> (World, Schedule) {
        let mut world = World::new();
        world.insert_resource(TileGrid::new());
        world.insert_resource(NetGraph::new());
        world.insert_resource(NetConfig::default());
        world.insert_resource(SimTick(0));
        let mut schedule = Schedule::default();
        schedule.add_systems(
            (
                tile_grid_update_system,
                transform_change_system,
                host_removal_system,
                network_reflood_system,
            )
                .chain(),
        );
        (world, schedule)
    }

    fn spawn_pipe(world: &mut World, id: u32, x: i32) -> Entity {
        let entity = world
            .spawn(ConduitBundle {
                id: ConduitId(id),
                tile: TilePos::new(x, 0),
                anchored: Anchored(true),
                ..Default::default()
            })
            .id();
        let key = {
            let mut graph = world.resource_mut::<NetGraph>();
            graph
                .register_node(
                    entity,
                    id,
                    &NodeSpec::pipe("pipe", &[Dir::East, Dir::West]),
                    true,
                    Facing::North,
                )
                .unwrap()
        };
        let mut host = world.get_mut::<NodeHost>(entity).unwrap();
        host.insert("pipe".to_string(), key);
        entity
    }

    #[test]
    fn test_unanchor_splits_network() {
        let (mut world, mut schedule) = test_world();
        let entities: Vec<Entity> = (0..3).map(|x| spawn_pipe(&mut world, x as u32, x)).collect();
        schedule.run(&mut world);

        {
            let graph = world.resource::<NetGraph>();
            assert_eq!(graph.group_count(), 1);
        }

        // Unanchor the middle pipe; the line splits in two.
        world.get_mut::<Anchored>(entities[1]).unwrap().0 = false;
        schedule.run(&mut world);

        let graph = world.resource::<NetGraph>();
        assert_eq!(graph.group_count(), 2);
        let mid = graph.find_node(entities[1], "pipe").unwrap();
        assert_eq!(graph.group_of_node(mid), None);
    }

    #[test]
    fn test_despawn_cleans_up_nodes() {
        let (mut world, mut schedule) = test_world();
        let entities: Vec<Entity> = (0..2).map(|x| spawn_pipe(&mut world, x as u32, x)).collect();
        schedule.run(&mut world);

        world.despawn(entities[0]);
        schedule.run(&mut world);

        let graph = world.resource::<NetGraph>();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.group_count(), 1);
        assert!(graph.entity_nodes(entities[0]).is_empty());
    }
}
