//! The per-tick reflood system.

use crate::components::{NetConfig, SimTick};
use crate::graph::NetGraph;
use crate::grid::TileGrid;
use bevy_ecs::prelude::*;

/// System that drains the dirty queue and recomputes group membership.
///
/// Runs exactly once per tick, strictly after every topology-changing
/// system and before any consumer of group membership.
pub fn network_reflood_system(
    mut graph: ResMut<NetGraph>,
    grid: Res<TileGrid>,
    config: Res<NetConfig>,
    tick: Res<SimTick>,
) {
    let report = graph.run_pass(&grid);
    if config.log_pass_stats && report.did_work() {
        log::debug!(
            "tick {}: reflood touched {} nodes in {} components ({} created, {} reused, {} merged, {} split, {} discarded, {} freed)",
            tick.0,
            report.nodes_reflooded,
            report.components,
            report.groups_created,
            report.groups_reused,
            report.groups_merged,
            report.groups_split,
            report.groups_discarded,
            report.nodes_freed,
        );
    }
}
