//! Tile occupancy lookup used as the adjacency oracle.
//!
//! Provides O(1) "which conduits sit on this tile" queries plus an
//! entity-to-tile reverse lookup. The grouping core only ever reads this;
//! it is rebuilt once per tick from `TilePos` components.

use crate::components::{NodeHost, TilePos};
use bevy_ecs::prelude::*;
use std::collections::HashMap;

/// Grid-based occupancy index over conduit entities.
///
/// Tiles are exact integer coordinates, so a lookup is a single map probe
/// rather than a radius scan.
#[derive(Resource, Debug, Default)]
pub struct TileGrid {
    /// Map from tile coordinates to the entities occupying that tile.
    tiles: HashMap<(i32, i32), Vec<Entity>>,
    /// Reverse lookup: entity to tile.
    entity_tiles: HashMap<Entity, (i32, i32)>,
}

impl TileGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all entries (called at the start of each tick before rebuilding).
    pub fn clear(&mut self) {
        self.tiles.clear();
        self.entity_tiles.clear();
    }

    /// Insert an entity at a tile, moving it if already present elsewhere.
    pub fn insert(&mut self, entity: Entity, tile: (i32, i32)) {
        if let Some(&old_tile) = self.entity_tiles.get(&entity) {
            if old_tile == tile {
                return;
            }
            if let Some(entries) = self.tiles.get_mut(&old_tile) {
                entries.retain(|e| *e != entity);
            }
        }
        self.tiles.entry(tile).or_default().push(entity);
        self.entity_tiles.insert(entity, tile);
    }

    /// Remove an entity from the grid.
    pub fn remove(&mut self, entity: Entity) {
        if let Some(tile) = self.entity_tiles.remove(&entity) {
            if let Some(entries) = self.tiles.get_mut(&tile) {
                entries.retain(|e| *e != entity);
            }
        }
    }

    /// All entities occupying the given tile.
    pub fn entities_at(&self, tile: (i32, i32)) -> &[Entity] {
        self.tiles.get(&tile).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The tile an entity occupies, if tracked.
    pub fn tile_of(&self, entity: Entity) -> Option<(i32, i32)> {
        self.entity_tiles.get(&entity).copied()
    }

    /// Total tracked entity count.
    pub fn total_count(&self) -> usize {
        self.entity_tiles.len()
    }
}

/// System that rebuilds the tile grid each tick from conduit positions.
pub fn tile_grid_update_system(
    mut grid: ResMut<TileGrid>,
    query: Query<(Entity, &TilePos), With<NodeHost>>,
) {
    grid.clear();
    for (entity, pos) in query.iter() {
        grid.insert(entity, pos.as_tuple());
    }
}
