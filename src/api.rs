//! Public API for the network simulation.
//!
//! This module provides the main interface for the host game (or any other
//! client) to interact with the network formation engine.
//!
//! ## Fixed Timestep
//!
//! The simulation uses a fixed timestep internally (default 30 Hz). When
//! `step(dt)` is called, the engine accumulates time and runs fixed updates
//! as needed, so behavior is deterministic regardless of frame rate. Each
//! fixed update processes exactly one reflood pass, strictly after all
//! topology events queued since the previous pass.
//!
//! ## Ordering Contract
//!
//! All topology changes made through this API (spawn, despawn, anchor,
//! rotate, move, add/remove node) take effect on the next tick. Group
//! membership read between ticks is the membership decided by the last
//! completed pass.

use crate::components::{
    Anchored, ConduitBundle, ConduitId, Facing, NetConfig, NodeHost, SimTick, TilePos,
};
use crate::graph::{NetGraph, PassReport};
use crate::grid::{tile_grid_update_system, TileGrid};
use crate::group::GroupKey;
use crate::nets::{GasMixture, PowerNet};
use crate::node::{NetError, NetKind, NodeKey, NodeSpec};
use crate::snapshot::NetSnapshot;
use crate::systems::{host_removal_system, network_reflood_system, transform_change_system};
use bevy_ecs::prelude::*;

/// The main network simulation container.
///
/// Holds the ECS world and schedule, providing a clean API for:
/// - Spawning and despawning conduits
/// - Toggling anchor state, rotating, and moving conduits
/// - Stepping the simulation forward
/// - Extracting diagnostics snapshots
pub struct NetWorld {
    world: World,
    schedule: Schedule,
    tick: u64,
    time: f32,
    /// Accumulated time for fixed timestep.
    time_accumulator: f32,
}

impl NetWorld {
    /// Create a new empty simulation world.
    pub fn new() -> Self {
        Self::with_config(NetConfig::default())
    }

    /// Create a new simulation world with custom configuration.
    pub fn with_config(config: NetConfig) -> Self {
        let mut world = World::new();

        world.insert_resource(TileGrid::new());
        world.insert_resource(NetGraph::new());
        world.insert_resource(SimTick(0));
        world.insert_resource(config);

        // The whole pipeline is sequential by contract: events enqueue, the
        // pass processes, downstream consumers read.
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

        Self {
            world,
            schedule,
            tick: 0,
            time: 0.0,
            time_accumulator: 0.0,
        }
    }

    // ------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------

    /// Spawn a conduit entity with the given node configuration.
    ///
    /// Malformed configuration (unknown kind, empty directions, duplicate
    /// slots) is a fatal error surfaced here, before anything is spawned.
    /// The new nodes join (or form) networks on the next tick.
    pub fn spawn_conduit(
        &mut self,
        id: u32,
        tile: (i32, i32),
        anchored: bool,
        specs: &[NodeSpec],
    ) -> Result<Entity, NetError> {
        // Validate everything up front so a failed spawn leaves no trace.
        for (i, spec) in specs.iter().enumerate() {
            NetKind::parse(&spec.kind)?;
            if spec.dirs.is_empty() {
                return Err(NetError::NoDirections(spec.slot.clone()));
            }
            if specs[..i].iter().any(|s| s.slot == spec.slot) {
                return Err(NetError::DuplicateSlot(spec.slot.clone()));
            }
        }

        let entity = self
            .world
            .spawn(ConduitBundle {
                id: ConduitId(id),
                tile: TilePos::new(tile.0, tile.1),
                facing: Facing::North,
                anchored: Anchored(anchored),
                host: NodeHost::default(),
            })
            .id();

        let mut registered = Vec::with_capacity(specs.len());
        {
            let mut graph = self.world.resource_mut::<NetGraph>();
            for spec in specs {
                let key = graph.register_node(entity, id, spec, anchored, Facing::North)?;
                registered.push((spec.slot.clone(), key));
            }
        }
        if let Some(mut host) = self.world.get_mut::<NodeHost>(entity) {
            for (slot, key) in registered {
                host.insert(slot, key);
            }
        }
        Ok(entity)
    }

    /// Despawn a conduit. Its nodes are removed from their networks on the
    /// next tick and the remainder resplits.
    pub fn despawn_conduit(&mut self, entity: Entity) {
        {
            let mut graph = self.world.resource_mut::<NetGraph>();
            graph.remove_entity_nodes(entity);
        }
        self.world.despawn(entity);
    }

    // ------------------------------------------------------------------
    // Transform changes
    // ------------------------------------------------------------------

    /// Anchor or unanchor a conduit.
    pub fn set_anchored(&mut self, entity: Entity, anchored: bool) -> Result<(), NetError> {
        let mut state = self
            .world
            .get_mut::<Anchored>(entity)
            .ok_or(NetError::NotAConduit)?;
        state.0 = anchored;
        Ok(())
    }

    /// Rotate a conduit. Direction-sensitive nodes recompute their masks.
    pub fn set_facing(&mut self, entity: Entity, facing: Facing) -> Result<(), NetError> {
        let mut state = self
            .world
            .get_mut::<Facing>(entity)
            .ok_or(NetError::NotAConduit)?;
        *state = facing;
        Ok(())
    }

    /// Move an unanchored conduit to another tile.
    pub fn move_conduit(&mut self, entity: Entity, tile: (i32, i32)) -> Result<(), NetError> {
        let anchored = self
            .world
            .get::<Anchored>(entity)
            .ok_or(NetError::NotAConduit)?;
        if anchored.0 {
            return Err(NetError::MoveWhileAnchored);
        }
        let mut pos = self
            .world
            .get_mut::<TilePos>(entity)
            .ok_or(NetError::NotAConduit)?;
        *pos = TilePos::new(tile.0, tile.1);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Node slot changes
    // ------------------------------------------------------------------

    /// Add a node slot to an existing conduit (rare; e.g. an upgrade).
    pub fn add_node(&mut self, entity: Entity, spec: &NodeSpec) -> Result<NodeKey, NetError> {
        let (&ConduitId(id), &Anchored(anchored), &facing) = self
            .world
            .query::<(&ConduitId, &Anchored, &Facing)>()
            .get(&self.world, entity)
            .map_err(|_| NetError::NotAConduit)?;

        let key = {
            let mut graph = self.world.resource_mut::<NetGraph>();
            graph.register_node(entity, id, spec, anchored, facing)?
        };
        if let Some(mut host) = self.world.get_mut::<NodeHost>(entity) {
            host.insert(spec.slot.clone(), key);
        }
        Ok(key)
    }

    /// Remove a node slot from a conduit.
    pub fn remove_node(&mut self, entity: Entity, slot: &str) -> Result<(), NetError> {
        let mut host = self
            .world
            .get_mut::<NodeHost>(entity)
            .ok_or(NetError::NotAConduit)?;
        let key = host
            .remove(slot)
            .ok_or_else(|| NetError::NoSuchSlot(slot.to_string()))?;
        let mut graph = self.world.resource_mut::<NetGraph>();
        graph.remove_node(key);
        Ok(())
    }

    /// Manually queue a reflood of a node's region ("spread"). Directional
    /// nodes call this for both endpoints when their own state changes.
    pub fn queue_reflood(&mut self, entity: Entity, slot: &str) -> Result<(), NetError> {
        let key = self
            .graph()
            .find_node(entity, slot)
            .ok_or_else(|| NetError::NoSuchSlot(slot.to_string()))?;
        let mut graph = self.world.resource_mut::<NetGraph>();
        graph.queue_reflood(key);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------

    /// Step the simulation forward by `dt` seconds.
    ///
    /// Uses fixed timestep internally - accumulates time and runs fixed
    /// updates as needed.
    pub fn step(&mut self, dt: f32) {
        let fixed_dt = self
            .world
            .get_resource::<NetConfig>()
            .map(|c| c.fixed_timestep)
            .unwrap_or(1.0 / 30.0);

        self.time_accumulator += dt;
        while self.time_accumulator >= fixed_dt {
            self.tick(fixed_dt);
            self.time_accumulator -= fixed_dt;
        }
    }

    /// Run exactly one fixed update: all queued topology events, then one
    /// reflood pass.
    pub fn tick(&mut self, dt: f32) {
        if let Some(mut tick_res) = self.world.get_resource_mut::<SimTick>() {
            tick_res.increment();
        }
        self.schedule.run(&mut self.world);
        self.tick += 1;
        self.time += dt;
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Get the current tick number.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Get the elapsed simulation time.
    pub fn current_time(&self) -> f32 {
        self.time
    }

    /// Get the network graph (read-only).
    pub fn graph(&self) -> &NetGraph {
        self.world.resource::<NetGraph>()
    }

    /// Statistics of the last completed reflood pass.
    pub fn last_pass(&self) -> PassReport {
        *self.graph().last_report()
    }

    /// The group a node currently belongs to, if any.
    pub fn group_key_of(&self, entity: Entity, slot: &str) -> Option<GroupKey> {
        let graph = self.graph();
        graph
            .find_node(entity, slot)
            .and_then(|key| graph.group_of_node(key))
    }

    /// The stable network id a node currently belongs to, if any.
    pub fn net_id_of(&self, entity: Entity, slot: &str) -> Option<u32> {
        let graph = self.graph();
        self.group_key_of(entity, slot)
            .and_then(|g| graph.group(g))
            .map(|g| g.net_id)
    }

    /// The shared gas mixture of the pipe net a node belongs to.
    pub fn pipe_air(&self, entity: Entity, slot: &str) -> Option<GasMixture> {
        let graph = self.graph();
        self.group_key_of(entity, slot)
            .and_then(|g| graph.group(g))
            .and_then(|g| g.payload.as_pipe())
            .map(|net| net.air)
    }

    /// The supply/load sums of the power net a node belongs to.
    pub fn power_stats(&self, entity: Entity, slot: &str) -> Option<PowerNet> {
        let graph = self.graph();
        self.group_key_of(entity, slot)
            .and_then(|g| graph.group(g))
            .and_then(|g| g.payload.as_power())
            .copied()
    }

    /// Get a diagnostics snapshot of all live networks.
    pub fn snapshot(&self) -> NetSnapshot {
        NetSnapshot::from_world(&self.world, self.tick, self.time)
    }

    /// Get the snapshot as a JSON string.
    pub fn snapshot_json(&self) -> String {
        self.snapshot().to_json().unwrap_or_else(|_| "{}".to_string())
    }

    /// Get direct access to the ECS world (for advanced usage).
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Get mutable access to the ECS world (for advanced usage).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

impl Default for NetWorld {
    fn default() -> Self {
        Self::new()
    }
}
