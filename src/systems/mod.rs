//! ECS systems for the Conduit network simulation.
//!
//! The per-tick pipeline is strictly ordered; grouping relies on ordering
//! rather than locks:
//!
//! 1. `tile_grid_update_system` - rebuilds the tile occupancy index
//! 2. `transform_change_system` - pushes anchor/facing/tile changes into
//!    cached node state and queues refloods
//! 3. `host_removal_system` - cleans up nodes of despawned hosts
//! 4. `network_reflood_system` - drains the dirty queue and recomputes
//!    group membership
//!
//! Anything that consumes group membership (power math, gas physics) must
//! be scheduled after the reflood system.

pub mod reflood;
pub mod topology;

pub use reflood::*;
pub use topology::*;
