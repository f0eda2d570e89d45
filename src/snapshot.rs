//! Diagnostics snapshot of the live networks.
//!
//! A `NetSnapshot` is a read-only dump taken after a pass completes, meant
//! for visual debugging overlays and external tooling. It has no feedback
//! into the grouping core.

use crate::graph::NetGraph;
use crate::grid::TileGrid;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Snapshot of a single node's place in its network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Owning conduit id.
    pub conduit: u32,
    /// Network-local id of this node.
    pub net_id: u32,
    /// Network-local ids of the nodes this one currently reaches (raw,
    /// directed - one-way links show up one-sided here by design).
    pub reaches: Vec<u32>,
    /// Slot name within the owning conduit.
    pub slot: String,
    /// Node type label.
    pub label: String,
}

/// Snapshot of one live network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub net_id: u32,
    pub kind: String,
    /// Stable display color for overlays, derived from the net id.
    pub color: [f32; 3],
    pub nodes: Vec<NodeSnapshot>,
}

/// Complete network state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetSnapshot {
    /// Simulation tick the snapshot was taken on.
    pub tick: u64,
    /// Elapsed simulation time in seconds.
    pub time: f32,
    /// All live networks.
    pub groups: Vec<GroupSnapshot>,
}

impl NetSnapshot {
    /// Capture the current networks from the ECS world.
    pub fn from_world(world: &World, tick: u64, time: f32) -> Self {
        let graph = world.resource::<NetGraph>();
        let grid = world.resource::<TileGrid>();
        Self::from_graph(graph, grid, tick, time)
    }

    pub fn from_graph(graph: &NetGraph, grid: &TileGrid, tick: u64, time: f32) -> Self {
        let mut groups = Vec::new();
        for (_, group) in graph.groups() {
            let mut nodes = Vec::new();
            for &key in &group.nodes {
                let Some(node) = graph.node(key) else {
                    continue;
                };
                let reaches = graph
                    .raw_reachable(key, grid)
                    .into_iter()
                    .filter_map(|peer| graph.node(peer))
                    .map(|peer| peer.net_id)
                    .collect();
                nodes.push(NodeSnapshot {
                    conduit: node.conduit_id,
                    net_id: node.net_id,
                    reaches,
                    slot: node.slot.clone(),
                    label: node.type_label().to_string(),
                });
            }
            groups.push(GroupSnapshot {
                net_id: group.net_id,
                kind: group.kind.as_str().to_string(),
                color: group_color(group.net_id),
                nodes,
            });
        }
        Self { tick, time, groups }
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize snapshot to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Deterministic overlay color for a network: golden-angle hue walk keeps
/// consecutive net ids visually distinct.
fn group_color(net_id: u32) -> [f32; 3] {
    let hue = (net_id as f32 * 137.508) % 360.0;
    hsv_to_rgb(hue, 0.65, 0.95)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let c = v * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [r + m, g + m, b + m]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Facing;
    use crate::node::{Dir, NodeSpec};

    #[test]
    fn test_snapshot_lists_groups_and_reaches() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        for x in 0..3 {
            let entity = Entity::from_raw(x as u32 + 1);
            grid.insert(entity, (x, 0));
            graph
                .register_node(
                    entity,
                    x as u32 + 1,
                    &NodeSpec::pipe("pipe", &[Dir::East, Dir::West]),
                    true,
                    Facing::North,
                )
                .unwrap();
        }
        graph.run_pass(&grid);

        let snapshot = NetSnapshot::from_graph(&graph, &grid, 7, 0.25);
        assert_eq!(snapshot.tick, 7);
        assert_eq!(snapshot.groups.len(), 1);

        let group = &snapshot.groups[0];
        assert_eq!(group.kind, "pipe");
        assert_eq!(group.nodes.len(), 3);

        // The middle node reaches both ends; the ends reach only it.
        let middle = group.nodes.iter().find(|n| n.conduit == 2).unwrap();
        assert_eq!(middle.reaches.len(), 2);
        let end = group.nodes.iter().find(|n| n.conduit == 1).unwrap();
        assert_eq!(end.reaches.len(), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let graph = NetGraph::new();
        let grid = TileGrid::new();
        let snapshot = NetSnapshot::from_graph(&graph, &grid, 0, 0.0);
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("groups"));
    }

    #[test]
    fn test_group_colors_are_stable_and_distinct() {
        assert_eq!(group_color(3), group_color(3));
        assert_ne!(group_color(0), group_color(1));
        for c in group_color(42) {
            assert!((0.0..=1.0).contains(&c));
        }
    }
}
