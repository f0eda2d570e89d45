//! ECS components and resources for the Conduit simulation.
//!
//! Components are pure data containers attached to entities.
//! All grouping logic lives in the orchestrator and the systems that feed it.

use crate::node::NodeKey;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// TRANSFORM COMPONENTS
// ============================================================================

/// Integer tile position on the station grid.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn as_tuple(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

/// Cardinal facing of an entity; rotates direction-sensitive node masks.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Facing {
    #[default]
    North,
    East,
    South,
    West,
}

impl Facing {
    /// Clockwise quarter turns from north.
    #[inline]
    pub fn quarter_turns(&self) -> u8 {
        match self {
            Facing::North => 0,
            Facing::East => 1,
            Facing::South => 2,
            Facing::West => 3,
        }
    }
}

/// Whether the entity is anchored to the grid. Nodes with `need_anchored`
/// only connect while this is true.
#[derive(Component, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Anchored(pub bool);

// ============================================================================
// IDENTITY COMPONENTS
// ============================================================================

/// Unique identifier for a conduit entity (wire, pipe, junction, machine).
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ConduitId(pub u32);

// ============================================================================
// NODE CONTAINER
// ============================================================================

/// Per-entity collection of named nodes.
///
/// The map only holds arena keys; the nodes themselves live in
/// [`crate::graph::NetGraph`], which mirrors this mapping so cleanup still
/// works after the entity is despawned.
#[derive(Component, Debug, Default)]
pub struct NodeHost {
    nodes: HashMap<String, NodeKey>,
}

impl NodeHost {
    pub fn get(&self, slot: &str) -> Option<NodeKey> {
        self.nodes.get(slot).copied()
    }

    pub fn insert(&mut self, slot: String, key: NodeKey) {
        self.nodes.insert(slot, key);
    }

    pub fn remove(&mut self, slot: &str) -> Option<NodeKey> {
        self.nodes.remove(slot)
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.nodes.contains_key(slot)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeKey)> {
        self.nodes.iter().map(|(slot, key)| (slot.as_str(), *key))
    }
}

/// Bundle for spawning a complete conduit entity.
#[derive(Bundle, Default)]
pub struct ConduitBundle {
    pub id: ConduitId,
    pub tile: TilePos,
    pub facing: Facing,
    pub anchored: Anchored,
    pub host: NodeHost,
}

// ============================================================================
// RESOURCES
// ============================================================================

/// Global simulation tick counter, incremented each fixed update.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct SimTick(pub u64);

impl SimTick {
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

/// Configuration for the network simulation.
#[derive(Resource, Debug, Clone)]
pub struct NetConfig {
    /// Fixed timestep in seconds (e.g., 1/30 = 0.0333 for 30 Hz).
    pub fixed_timestep: f32,
    /// Emit a `debug!` line with pass statistics after each non-empty pass.
    pub log_pass_stats: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 1.0 / 30.0, // 30 Hz
            log_pass_stats: true,
        }
    }
}
