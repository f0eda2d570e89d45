//! Conduit - Utility Network Formation Core
//!
//! A deterministic, tick-driven engine that keeps utility networks (power
//! grids, atmospheric pipe nets) correctly partitioned while entities are
//! created, destroyed, anchored, and rotated every tick. Uses `bevy_ecs`
//! for the entity-component-system architecture; connectivity is maintained
//! incrementally by batched flood fills rather than full recomputation.

pub mod api;
pub mod components;
pub mod graph;
pub mod grid;
pub mod group;
pub mod nets;
pub mod node;
pub mod profiler;
pub mod snapshot;
pub mod systems;

pub use api::NetWorld;
pub use components::*;
pub use graph::{NetGraph, PassReport};
pub use grid::{tile_grid_update_system, TileGrid};
pub use group::{GroupKey, NodeGroup};
pub use nets::{GasMixture, GroupPayload, PipeNet, PowerNet};
pub use node::{Dir, DirMask, NetError, NetKind, Node, NodeAttrs, NodeKey, NodeSpec};
pub use snapshot::NetSnapshot;
pub use systems::*;
