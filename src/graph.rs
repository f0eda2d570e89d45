//! Flood-fill orchestrator for incremental network formation.
//!
//! `NetGraph` owns the node and group arenas and the dirty queue. Structural
//! changes only enqueue; once per tick [`run_pass`](NetGraph::run_pass)
//! drains the queue, tears down every group a queued node touches, refloods
//! the affected region, and reassigns group objects - merging and splitting
//! as connectivity dictates. Kind-specific hooks fire after membership is
//! final for the whole pass, never mid-flood.
//!
//! Nodes and groups are referenced by generational keys into dense arrays,
//! so merges and splits are index reassignments. A stale key simply fails
//! to resolve; nothing dangles.

use crate::components::Facing;
use crate::grid::TileGrid;
use crate::group::{GroupKey, NodeGroup};
use crate::nets::{GroupPayload, SplitPart};
use crate::node::{Dir, DirMask, NetError, NetKind, Node, NodeAttrs, NodeKey, NodeSpec, ALL_DIRS};
use bevy_ecs::prelude::*;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct NodeSlot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Default)]
struct GroupSlot {
    generation: u32,
    group: Option<NodeGroup>,
}

/// Statistics for one reflood pass. Consumers and tests read this off
/// [`NetGraph::last_report`]; each hook-invocation counter corresponds to
/// exactly one lifecycle callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Nodes assigned to a group this pass.
    pub nodes_reflooded: usize,
    /// Connected components discovered.
    pub components: usize,
    /// Fresh group objects allocated.
    pub groups_created: usize,
    /// Torn-down group objects resurrected with identity preserved.
    pub groups_reused: usize,
    /// Merge notifications delivered (one per absorbed group).
    pub groups_merged: usize,
    /// Split notifications delivered (one per divided group).
    pub groups_split: usize,
    /// Groups discarded with no surviving members.
    pub groups_discarded: usize,
    /// Deleting nodes whose arena slots were released.
    pub nodes_freed: usize,
}

impl PassReport {
    pub fn did_work(&self) -> bool {
        self.nodes_reflooded > 0 || self.nodes_freed > 0 || self.groups_discarded > 0
    }
}

/// Raw directed reachability between two nodes, as seen from one side.
struct NeighborLink {
    key: NodeKey,
    reaches_out: bool,
    reaches_in: bool,
}

/// A group torn down at the start of a pass, held aside until its former
/// members have been reassigned so its aggregate can follow them.
struct TornGroup {
    net_id: u32,
    payload: GroupPayload,
    members: Vec<NodeKey>,
}

/// A connected component discovered by the flood phase.
struct FloodComponent {
    kind: NetKind,
    members: Vec<NodeKey>,
    /// Surviving (not torn down) groups the flood crossed into.
    intact: Vec<GroupKey>,
}

/// The network-formation engine. Lives in the ECS world as a resource;
/// collaborators (tile grid) are passed into calls, never resolved globally.
#[derive(Resource, Debug, Default)]
pub struct NetGraph {
    nodes: Vec<NodeSlot>,
    node_free: Vec<u32>,
    groups: Vec<GroupSlot>,
    group_free: Vec<u32>,
    /// Mirror of each entity's slots, kept graph-side so cleanup works after
    /// the entity itself is gone.
    nodes_by_entity: HashMap<Entity, Vec<NodeKey>>,
    /// Dirty queue: appended between passes, drained whole by the pass.
    dirty: Vec<NodeKey>,
    /// Flood generation, bumped once per pass.
    pass_gen: u64,
    next_net_id: u32,
    last_report: PassReport,
}

impl NetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key.index as usize).and_then(|slot| {
            if slot.generation == key.generation {
                slot.node.as_ref()
            } else {
                None
            }
        })
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key.index as usize).and_then(|slot| {
            if slot.generation == key.generation {
                slot.node.as_mut()
            } else {
                None
            }
        })
    }

    pub fn group(&self, key: GroupKey) -> Option<&NodeGroup> {
        self.groups.get(key.index as usize).and_then(|slot| {
            if slot.generation == key.generation {
                slot.group.as_ref()
            } else {
                None
            }
        })
    }

    fn group_mut(&mut self, key: GroupKey) -> Option<&mut NodeGroup> {
        self.groups.get_mut(key.index as usize).and_then(|slot| {
            if slot.generation == key.generation {
                slot.group.as_mut()
            } else {
                None
            }
        })
    }

    /// Mutable access to a group's aggregate payload, for the consumers
    /// that own the actual physics (gas flow, power distribution).
    pub fn group_payload_mut(&mut self, key: GroupKey) -> Option<&mut GroupPayload> {
        self.group_mut(key).map(|g| &mut g.payload)
    }

    /// All live groups, in arena order.
    pub fn groups(&self) -> impl Iterator<Item = (GroupKey, &NodeGroup)> {
        self.groups.iter().enumerate().filter_map(|(index, slot)| {
            slot.group.as_ref().map(|group| {
                (
                    GroupKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    group,
                )
            })
        })
    }

    /// Live groups of one kind (the per-kind network registry).
    pub fn groups_of_kind(&self, kind: NetKind) -> Vec<GroupKey> {
        self.groups()
            .filter(|(_, g)| g.kind == kind)
            .map(|(k, _)| k)
            .collect()
    }

    pub fn group_count(&self) -> usize {
        self.groups().count()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|s| s.node.is_some()).count()
    }

    /// Keys of all nodes hosted by an entity.
    pub fn entity_nodes(&self, entity: Entity) -> &[NodeKey] {
        self.nodes_by_entity
            .get(&entity)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Look up a node by owning entity and slot name. Deleting nodes are
    /// already gone as far as callers are concerned.
    pub fn find_node(&self, entity: Entity, slot: &str) -> Option<NodeKey> {
        self.entity_nodes(entity)
            .iter()
            .copied()
            .find(|&key| self.node(key).is_some_and(|n| n.slot == slot && !n.deleting))
    }

    /// The group a node currently belongs to, if any.
    pub fn group_of_node(&self, key: NodeKey) -> Option<GroupKey> {
        self.node(key).and_then(|n| n.group)
    }

    pub fn last_report(&self) -> &PassReport {
        &self.last_report
    }

    /// Number of nodes waiting for the next pass.
    pub fn pending_dirty(&self) -> usize {
        self.dirty.len()
    }

    fn alloc_node(&mut self, node: Node) -> NodeKey {
        if let Some(index) = self.node_free.pop() {
            let slot = &mut self.nodes[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.node = Some(node);
            NodeKey {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.nodes.len() as u32;
            self.nodes.push(NodeSlot {
                generation: 1,
                node: Some(node),
            });
            NodeKey {
                index,
                generation: 1,
            }
        }
    }

    fn take_node(&mut self, key: NodeKey) -> Option<Node> {
        let slot = self.nodes.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let node = slot.node.take();
        if node.is_some() {
            self.node_free.push(key.index);
        }
        node
    }

    fn alloc_group(&mut self, group: NodeGroup) -> GroupKey {
        if let Some(index) = self.group_free.pop() {
            let slot = &mut self.groups[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.group = Some(group);
            GroupKey {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.groups.len() as u32;
            self.groups.push(GroupSlot {
                generation: 1,
                group: Some(group),
            });
            GroupKey {
                index,
                generation: 1,
            }
        }
    }

    fn take_group(&mut self, key: GroupKey) -> Option<NodeGroup> {
        let slot = self.groups.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let group = slot.group.take();
        if group.is_some() {
            self.group_free.push(key.index);
        }
        group
    }

    // ------------------------------------------------------------------
    // Structural changes (enqueue only)
    // ------------------------------------------------------------------

    /// Register a node from its prototype config. Fatal on malformed
    /// configuration; the new node is queued for the next pass.
    pub fn register_node(
        &mut self,
        entity: Entity,
        conduit_id: u32,
        spec: &NodeSpec,
        anchored: bool,
        facing: Facing,
    ) -> Result<NodeKey, NetError> {
        let kind = NetKind::parse(&spec.kind)?;
        if spec.dirs.is_empty() {
            return Err(NetError::NoDirections(spec.slot.clone()));
        }
        if self.find_node(entity, &spec.slot).is_some() {
            return Err(NetError::DuplicateSlot(spec.slot.clone()));
        }

        let dirs = DirMask::from_dirs(&spec.dirs);
        let mut node = Node {
            slot: spec.slot.clone(),
            owner: entity,
            conduit_id,
            kind,
            need_anchored: spec.need_anchored,
            rotates: spec.rotates,
            one_way: spec.one_way,
            attrs: spec.attrs,
            dirs,
            current_dirs: dirs,
            anchored,
            deleting: false,
            group: None,
            flood_gen: 0,
            undirect_gen: 0,
            flagged_for_flood: false,
            net_id: 0,
        };
        node.apply_facing(facing);

        let key = self.alloc_node(node);
        self.nodes_by_entity.entry(entity).or_default().push(key);
        self.queue_reflood(key);
        Ok(key)
    }

    /// Mark a node for removal. Its group is torn down and the remainder
    /// resplit on the next pass; the arena slot is freed at the end of it.
    pub fn remove_node(&mut self, key: NodeKey) {
        if let Some(node) = self.node_mut(key) {
            node.deleting = true;
        }
        self.queue_reflood(key);
    }

    /// Mark every node of an entity for removal (container teardown).
    pub fn remove_entity_nodes(&mut self, entity: Entity) {
        let keys: Vec<NodeKey> = self.entity_nodes(entity).to_vec();
        for key in keys {
            self.remove_node(key);
        }
    }

    /// Manual reflood entry point. Directional nodes call this on both
    /// sides of an edge whenever their own state changes.
    pub fn queue_reflood(&mut self, key: NodeKey) {
        if let Some(node) = self.node_mut(key) {
            if !node.flagged_for_flood {
                node.flagged_for_flood = true;
                self.dirty.push(key);
            }
        }
    }

    /// Refresh cached transform state for all of an entity's nodes and
    /// queue them for reflood. Called when anchoring, facing, or tile
    /// position changes.
    pub fn update_transform_state(&mut self, entity: Entity, anchored: bool, facing: Facing) {
        let keys: Vec<NodeKey> = self.entity_nodes(entity).to_vec();
        for key in keys {
            if let Some(node) = self.node_mut(key) {
                node.anchored = anchored;
                node.apply_facing(facing);
            }
            self.queue_reflood(key);
        }
    }

    // ------------------------------------------------------------------
    // Reachability
    // ------------------------------------------------------------------

    /// Scan the tile grid for candidate peers of a node, reporting raw
    /// directed reachability both ways.
    ///
    /// Adjacent-tile peers link through facing masks (my direction, your
    /// opposite); same-tile peers link when their declared masks overlap
    /// (machinery stacked on a pipe). One-way nodes push into neighbors
    /// regardless of the neighbor's mask, which is the one place the raw
    /// relation can be asymmetric.
    fn scan_neighbors(&self, key: NodeKey, grid: &TileGrid) -> Vec<NeighborLink> {
        let mut out = Vec::new();
        let Some(node) = self.node(key) else {
            return out;
        };
        let Some(tile) = grid.tile_of(node.owner) else {
            return out;
        };

        let consider = |links: &mut Vec<NeighborLink>, peer_key: NodeKey, peer: &Node, dir: Option<Dir>| {
            match dir {
                Some(d) => {
                    let reaches_out = node.current_dirs.contains(d)
                        && (node.one_way || peer.current_dirs.contains(d.opposite()));
                    let reaches_in = peer.current_dirs.contains(d.opposite())
                        && (peer.one_way || node.current_dirs.contains(d));
                    if reaches_out || reaches_in {
                        links.push(NeighborLink {
                            key: peer_key,
                            reaches_out,
                            reaches_in,
                        });
                    }
                }
                None => {
                    // Same tile: overlap of declared masks, inherently symmetric.
                    let overlap = ALL_DIRS
                        .into_iter()
                        .any(|d| node.current_dirs.contains(d) && peer.current_dirs.contains(d));
                    if overlap {
                        links.push(NeighborLink {
                            key: peer_key,
                            reaches_out: true,
                            reaches_in: true,
                        });
                    }
                }
            }
        };

        for &peer_entity in grid.entities_at(tile) {
            if let Some(keys) = self.nodes_by_entity.get(&peer_entity) {
                for &peer_key in keys {
                    if peer_key == key {
                        continue;
                    }
                    if let Some(peer) = self.node(peer_key) {
                        if peer.kind == node.kind {
                            consider(&mut out, peer_key, peer, None);
                        }
                    }
                }
            }
        }
        for d in ALL_DIRS {
            let (dx, dy) = d.offset();
            let neighbor_tile = (tile.0 + dx, tile.1 + dy);
            for &peer_entity in grid.entities_at(neighbor_tile) {
                if let Some(keys) = self.nodes_by_entity.get(&peer_entity) {
                    for &peer_key in keys {
                        if let Some(peer) = self.node(peer_key) {
                            if peer.kind == node.kind {
                                consider(&mut out, peer_key, peer, Some(d));
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// The nodes this node currently reaches, raw and directed. Used by the
    /// diagnostics export; grouping floods over the symmetric closure.
    pub fn raw_reachable(&self, key: NodeKey, grid: &TileGrid) -> Vec<NodeKey> {
        self.scan_neighbors(key, grid)
            .into_iter()
            .filter(|l| l.reaches_out)
            .map(|l| l.key)
            .collect()
    }

    // ------------------------------------------------------------------
    // The reflood pass
    // ------------------------------------------------------------------

    /// Drain the dirty queue and recompute group membership around every
    /// queued node. Runs once per tick, after all topology events.
    pub fn run_pass(&mut self, grid: &TileGrid) -> PassReport {
        let mut report = PassReport::default();
        if self.dirty.is_empty() {
            self.last_report = report;
            return report;
        }
        self.pass_gen += 1;
        let pass_gen = self.pass_gen;
        let queued = std::mem::take(&mut self.dirty);

        // Phase 1: tear down every group a queued node touches. Members
        // become ungrouped and join the reflood set; the group object is
        // held aside so its aggregate can follow its members.
        let mut torn: Vec<TornGroup> = Vec::new();
        let mut prev_of: HashMap<NodeKey, usize> = HashMap::new();
        let mut reflood: Vec<NodeKey> = Vec::new();
        let mut to_free: Vec<NodeKey> = Vec::new();

        for key in queued {
            let Some(node) = self.node_mut(key) else {
                // Queued, then deleted before the pass ran. Recovered silently.
                continue;
            };
            node.flagged_for_flood = false;
            if node.deleting {
                to_free.push(key);
            }
            match node.group {
                Some(group_key) => {
                    if let Some(group) = self.take_group(group_key) {
                        let torn_idx = torn.len();
                        for &member in &group.nodes {
                            if let Some(m) = self.node_mut(member) {
                                m.group = None;
                                prev_of.insert(member, torn_idx);
                                reflood.push(member);
                            }
                        }
                        torn.push(TornGroup {
                            net_id: group.net_id,
                            payload: group.payload,
                            members: group.nodes,
                        });
                    }
                }
                None => reflood.push(key),
            }
        }

        // Phase 2: flood. BFS over the symmetric closure of the reachable
        // relation, filtered to same kind and connectable, crossing into
        // intact groups (which are absorbed whole).
        let mut components: Vec<FloodComponent> = Vec::new();
        let mut comp_of: HashMap<NodeKey, usize> = HashMap::new();

        for seed in reflood {
            let kind = match self.node(seed) {
                Some(n) if n.flood_gen != pass_gen && n.connectable() => n.kind,
                _ => continue,
            };
            let comp_idx = components.len();
            let mut members = Vec::new();
            let mut intact = Vec::new();

            if let Some(n) = self.node_mut(seed) {
                n.flood_gen = pass_gen;
            }
            let mut queue = VecDeque::from([seed]);
            while let Some(cur) = queue.pop_front() {
                members.push(cur);
                comp_of.insert(cur, comp_idx);
                if let Some(g) = self.node(cur).and_then(|n| n.group) {
                    if !intact.contains(&g) {
                        intact.push(g);
                    }
                }

                let links = self.scan_neighbors(cur, grid);
                let mut saw_asymmetric = false;
                for link in links {
                    if link.reaches_out != link.reaches_in {
                        saw_asymmetric = true;
                    }
                    let Some(peer) = self.node(link.key) else {
                        continue;
                    };
                    if peer.flood_gen == pass_gen || !peer.connectable() {
                        continue;
                    }
                    if let Some(peer) = self.node_mut(link.key) {
                        peer.flood_gen = pass_gen;
                        queue.push_back(link.key);
                    }
                }
                if saw_asymmetric {
                    if let Some(node) = self.node_mut(cur) {
                        if node.undirect_gen != pass_gen {
                            node.undirect_gen = pass_gen;
                            log::warn!(
                                "asymmetric adjacency at node `{}` on conduit {}; grouping uses the symmetric closure",
                                node.slot,
                                node.conduit_id
                            );
                        }
                    }
                }
            }

            report.nodes_reflooded += members.len();
            components.push(FloodComponent {
                kind,
                members,
                intact,
            });
        }
        report.components = components.len();

        // Phase 3: assign a group object to each component. Candidates are
        // the intact groups the flood crossed plus unclaimed torn groups
        // that contributed members; the lowest net id survives.
        enum Candidate {
            Intact(GroupKey),
            Torn(usize),
        }
        let mut torn_claimed: Vec<Option<usize>> = vec![None; torn.len()];
        let mut merges: Vec<(GroupKey, GroupPayload)> = Vec::new();
        let mut bare_adds: Vec<(GroupKey, Vec<NodeAttrs>)> = Vec::new();
        let mut comp_groups: Vec<GroupKey> = Vec::with_capacity(components.len());

        for (comp_idx, comp) in components.iter().enumerate() {
            let mut candidates: Vec<(u32, Candidate)> = Vec::new();
            for &g in &comp.intact {
                if let Some(group) = self.group(g) {
                    candidates.push((group.net_id, Candidate::Intact(g)));
                }
            }
            let mut seen_torn: Vec<usize> = Vec::new();
            for member in &comp.members {
                if let Some(&ti) = prev_of.get(member) {
                    if torn_claimed[ti].is_none() && !seen_torn.contains(&ti) {
                        seen_torn.push(ti);
                        candidates.push((torn[ti].net_id, Candidate::Torn(ti)));
                    }
                }
            }
            candidates.sort_by_key(|(net_id, _)| *net_id);

            let mut candidates = candidates.into_iter();
            let group_key = match candidates.next() {
                None => {
                    let net_id = self.next_net_id;
                    self.next_net_id += 1;
                    report.groups_created += 1;
                    self.alloc_group(NodeGroup::new(comp.kind, net_id))
                }
                Some((_, Candidate::Intact(g))) => g,
                Some((_, Candidate::Torn(ti))) => {
                    torn_claimed[ti] = Some(comp_idx);
                    report.groups_reused += 1;
                    // Resurrected with a zero payload; the aggregate is
                    // reinstalled (or redistributed) in phase 4.
                    self.alloc_group(NodeGroup {
                        kind: comp.kind,
                        net_id: torn[ti].net_id,
                        nodes: Vec::new(),
                        payload: GroupPayload::new_for(comp.kind),
                    })
                }
            };

            // Remaining intact candidates are absorbed into the survivor.
            // Torn candidates resolve in phase 4, where splits are visible.
            for (_, candidate) in candidates {
                if let Candidate::Intact(g) = candidate {
                    if let Some(absorbed) = self.take_group(g) {
                        merges.push((group_key, absorbed.payload));
                        report.groups_merged += 1;
                    }
                }
            }

            // Assign membership and network-local diagnostic ids. Members
            // that belonged to no group before the pass are "bare" and go
            // through the nodes-added hook; everyone else's contribution
            // travels with a prior group's aggregate.
            let mut bare: Vec<NodeAttrs> = Vec::new();
            for (i, &member) in comp.members.iter().enumerate() {
                if let Some(node) = self.node_mut(member) {
                    let was_grouped = node.group.is_some() || prev_of.contains_key(&member);
                    node.group = Some(group_key);
                    node.net_id = i as u32;
                    if !was_grouped {
                        bare.push(node.attrs);
                    }
                }
            }
            if let Some(group) = self.group_mut(group_key) {
                group.nodes = comp.members.clone();
            }
            bare_adds.push((group_key, bare));
            comp_groups.push(group_key);
        }

        // Phase 4: resolve torn groups. Each one either died, followed its
        // members into a single group (reuse or merge), or split across
        // several - in which case the hook sees the whole partition at once.
        //
        // Fates are computed first and applied in a strict order (reinstall,
        // then splits, then merges) so a split share deposited into a
        // resurrected group is never overwritten by its own reinstall.
        let mut splits: Vec<(GroupPayload, Vec<(usize, Vec<NodeAttrs>)>)> = Vec::new();
        for (ti, torn_group) in torn.into_iter().enumerate() {
            let mut dest: Vec<(usize, Vec<NodeAttrs>)> = Vec::new();
            let mut removed: Vec<NodeAttrs> = Vec::new();
            for &member in &torn_group.members {
                let Some(node) = self.node(member) else {
                    continue;
                };
                match comp_of.get(&member) {
                    Some(&c) if !node.deleting => {
                        match dest.iter_mut().find(|(dc, _)| *dc == c) {
                            Some((_, attrs)) => attrs.push(node.attrs),
                            None => dest.push((c, vec![node.attrs])),
                        }
                    }
                    _ => removed.push(node.attrs),
                }
            }

            let mut payload = torn_group.payload;
            if !removed.is_empty() {
                payload.on_nodes_removed(&removed);
            }

            match dest.len() {
                0 => {
                    // Last members gone; the network ceases to exist.
                    report.groups_discarded += 1;
                }
                1 => {
                    let (comp_idx, _) = dest[0];
                    let group_key = comp_groups[comp_idx];
                    if torn_claimed[ti] == Some(comp_idx) {
                        // Plain reuse: same identity, aggregate reinstalled.
                        if let Some(group) = self.group_mut(group_key) {
                            group.payload = payload;
                        }
                    } else {
                        merges.push((group_key, payload));
                        report.groups_merged += 1;
                    }
                }
                _ => {
                    report.groups_split += 1;
                    splits.push((payload, dest));
                }
            }
        }

        // Split distributions: lift the target payloads out of the arena so
        // each split hook sees its complete partition in one call.
        for (payload, dest) in splits {
            let mut lifted: Vec<(GroupKey, Vec<NodeAttrs>, GroupPayload)> = Vec::new();
            for (comp_idx, attrs) in dest {
                let group_key = comp_groups[comp_idx];
                if let Some(group) = self.group_mut(group_key) {
                    let taken =
                        std::mem::replace(&mut group.payload, GroupPayload::new_for(group.kind));
                    lifted.push((group_key, attrs, taken));
                }
            }
            {
                let mut parts: Vec<SplitPart<'_>> = lifted
                    .iter_mut()
                    .map(|(_, attrs, target)| SplitPart {
                        member_attrs: attrs,
                        target,
                    })
                    .collect();
                payload.on_group_split(&mut parts);
            }
            for (group_key, _, restored) in lifted {
                if let Some(group) = self.group_mut(group_key) {
                    group.payload = restored;
                }
            }
        }

        // Merge folds, one notification per absorbed group.
        for (group_key, absorbed) in merges {
            if let Some(group) = self.group_mut(group_key) {
                group.payload.on_groups_merged(absorbed);
            }
        }

        // Incremental adds, one batch per group.
        for (group_key, attrs) in bare_adds {
            if attrs.is_empty() {
                continue;
            }
            if let Some(group) = self.group_mut(group_key) {
                group.payload.on_nodes_added(&attrs);
            }
        }

        // Phase 5: release deleting nodes.
        for key in to_free {
            if let Some(node) = self.take_node(key) {
                if let Some(keys) = self.nodes_by_entity.get_mut(&node.owner) {
                    keys.retain(|k| *k != key);
                    if keys.is_empty() {
                        self.nodes_by_entity.remove(&node.owner);
                    }
                }
                report.nodes_freed += 1;
            }
        }

        #[cfg(debug_assertions)]
        self.check_consistency();

        self.last_report = report;
        report
    }

    /// Every node's group reference must resolve, and the group must list
    /// the node back. Violations indicate a pass bug; logged, not panicked,
    /// since the partition self-heals on the next reflood of the region.
    #[cfg(debug_assertions)]
    fn check_consistency(&self) {
        for (index, slot) in self.nodes.iter().enumerate() {
            let Some(node) = slot.node.as_ref() else {
                continue;
            };
            if let Some(group_key) = node.group {
                let key = NodeKey {
                    index: index as u32,
                    generation: slot.generation,
                };
                match self.group(group_key) {
                    Some(group) if group.nodes.contains(&key) => {}
                    Some(_) => log::error!(
                        "node `{}` on conduit {} points at a group that does not list it",
                        node.slot,
                        node.conduit_id
                    ),
                    None => log::error!(
                        "node `{}` on conduit {} points at a dead group",
                        node.slot,
                        node.conduit_id
                    ),
                }
            }
        }
        for (_, group) in self.groups() {
            if group.is_empty() {
                log::error!("group {} survived a pass with no members", group.net_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a straight east-west run of pipe conduits at y = 0.
    fn pipe_line(graph: &mut NetGraph, grid: &mut TileGrid, xs: std::ops::Range<i32>) -> Vec<(Entity, NodeKey)> {
        let mut out = Vec::new();
        for x in xs {
            let entity = Entity::from_raw(x as u32 + 1);
            grid.insert(entity, (x, 0));
            let key = graph
                .register_node(
                    entity,
                    x as u32 + 1,
                    &NodeSpec::pipe("pipe", &[Dir::East, Dir::West]),
                    true,
                    Facing::North,
                )
                .unwrap();
            out.push((entity, key));
        }
        out
    }

    #[test]
    fn test_line_forms_single_group() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let nodes = pipe_line(&mut graph, &mut grid, 0..5);

        let report = graph.run_pass(&grid);
        assert_eq!(report.components, 1);
        assert_eq!(report.groups_created, 1);
        assert_eq!(graph.group_count(), 1);

        let group = graph.group_of_node(nodes[0].1).unwrap();
        for (_, key) in &nodes {
            assert_eq!(graph.group_of_node(*key), Some(group));
        }
    }

    #[test]
    fn test_gap_forms_two_groups() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let left = pipe_line(&mut graph, &mut grid, 0..2);
        // Gap at x = 2.
        let right = pipe_line(&mut graph, &mut grid, 3..5);

        graph.run_pass(&grid);
        assert_eq!(graph.group_count(), 2);
        assert_ne!(
            graph.group_of_node(left[0].1),
            graph.group_of_node(right[0].1)
        );
    }

    #[test]
    fn test_bridge_merges_with_one_notification() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let left = pipe_line(&mut graph, &mut grid, 0..3);
        let right = pipe_line(&mut graph, &mut grid, 4..6);
        graph.run_pass(&grid);
        assert_eq!(graph.group_count(), 2);

        // Bridge the gap at x = 3.
        let bridge = Entity::from_raw(100);
        grid.insert(bridge, (3, 0));
        let bridge_key = graph
            .register_node(
                bridge,
                100,
                &NodeSpec::pipe("pipe", &[Dir::East, Dir::West]),
                true,
                Facing::North,
            )
            .unwrap();
        let report = graph.run_pass(&grid);

        assert_eq!(graph.group_count(), 1);
        assert_eq!(report.groups_merged, 1);
        assert_eq!(report.groups_split, 0);
        let group = graph.group_of_node(bridge_key).unwrap();
        assert_eq!(graph.group(group).unwrap().len(), 6);
        for (_, key) in left.iter().chain(right.iter()) {
            assert_eq!(graph.group_of_node(*key), Some(group));
        }
    }

    #[test]
    fn test_cut_splits_with_one_notification() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let nodes = pipe_line(&mut graph, &mut grid, 0..5);
        graph.run_pass(&grid);
        assert_eq!(graph.group_count(), 1);

        // Remove the middle conduit (x = 2).
        let (mid_entity, mid_key) = nodes[2];
        graph.remove_node(mid_key);
        grid.remove(mid_entity);
        let report = graph.run_pass(&grid);

        assert_eq!(report.groups_split, 1);
        assert_eq!(report.nodes_freed, 1);
        assert_eq!(graph.group_count(), 2);

        let left_group = graph.group_of_node(nodes[0].1).unwrap();
        let right_group = graph.group_of_node(nodes[3].1).unwrap();
        assert_ne!(left_group, right_group);
        assert_eq!(graph.group_of_node(nodes[1].1), Some(left_group));
        assert_eq!(graph.group_of_node(nodes[4].1), Some(right_group));
        assert_eq!(graph.group(left_group).unwrap().len(), 2);
        assert_eq!(graph.group(right_group).unwrap().len(), 2);
    }

    #[test]
    fn test_merge_survivor_has_lowest_net_id() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let left = pipe_line(&mut graph, &mut grid, 0..3);
        graph.run_pass(&grid);
        let right = pipe_line(&mut graph, &mut grid, 4..6);
        graph.run_pass(&grid);

        let left_net_id = {
            let g = graph.group_of_node(left[0].1).unwrap();
            graph.group(g).unwrap().net_id
        };
        let right_net_id = {
            let g = graph.group_of_node(right[0].1).unwrap();
            graph.group(g).unwrap().net_id
        };
        assert!(left_net_id < right_net_id);

        let bridge = Entity::from_raw(100);
        grid.insert(bridge, (3, 0));
        graph
            .register_node(
                bridge,
                100,
                &NodeSpec::pipe("pipe", &[Dir::East, Dir::West]),
                true,
                Facing::North,
            )
            .unwrap();
        graph.run_pass(&grid);

        let survivor = graph.group_of_node(left[0].1).unwrap();
        assert_eq!(graph.group(survivor).unwrap().net_id, left_net_id);
    }

    #[test]
    fn test_idempotent_repass_preserves_identity() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let nodes = pipe_line(&mut graph, &mut grid, 0..4);
        graph.run_pass(&grid);

        let group = graph.group_of_node(nodes[0].1).unwrap();
        let net_id = graph.group(group).unwrap().net_id;
        let members = graph.group(group).unwrap().nodes.clone();

        // Force a reflood with no topology change.
        graph.queue_reflood(nodes[1].1);
        let report = graph.run_pass(&grid);
        assert_eq!(report.groups_reused, 1);
        assert_eq!(report.groups_created, 0);
        assert_eq!(report.groups_merged, 0);
        assert_eq!(report.groups_split, 0);

        let group_after = graph.group_of_node(nodes[0].1).unwrap();
        let regrouped = graph.group(group_after).unwrap();
        assert_eq!(regrouped.net_id, net_id);
        assert_eq!(regrouped.nodes, members);

        // A second pass with an empty queue does nothing at all.
        let report = graph.run_pass(&grid);
        assert!(!report.did_work());
    }

    #[test]
    fn test_unanchored_node_excluded_until_anchored() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let nodes = pipe_line(&mut graph, &mut grid, 0..2);

        let loose = Entity::from_raw(50);
        grid.insert(loose, (2, 0));
        let loose_key = graph
            .register_node(
                loose,
                50,
                &NodeSpec::pipe("pipe", &[Dir::East, Dir::West]),
                false,
                Facing::North,
            )
            .unwrap();
        graph.run_pass(&grid);

        assert_eq!(graph.group_of_node(loose_key), None);
        assert_eq!(graph.group_count(), 1);

        // Anchoring makes it join on the next pass.
        graph.update_transform_state(loose, true, Facing::North);
        graph.run_pass(&grid);
        assert_eq!(
            graph.group_of_node(loose_key),
            graph.group_of_node(nodes[0].1)
        );
        assert!(graph.group_of_node(loose_key).is_some());
    }

    #[test]
    fn test_queued_then_deleted_node_is_skipped() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let nodes = pipe_line(&mut graph, &mut grid, 0..2);

        // Queue a reflood, then delete the whole entity before the pass.
        graph.queue_reflood(nodes[1].1);
        graph.remove_entity_nodes(nodes[1].0);
        grid.remove(nodes[1].0);
        let report = graph.run_pass(&grid);

        assert_eq!(report.nodes_freed, 1);
        assert_eq!(graph.group_count(), 1);
        assert_eq!(graph.group_of_node(nodes[1].1), None);
        assert!(graph.node(nodes[1].1).is_none());
    }

    #[test]
    fn test_deleting_sole_host_discards_group() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let entity = Entity::from_raw(1);
        grid.insert(entity, (0, 0));
        let a = graph
            .register_node(entity, 1, &NodeSpec::pipe("inlet", &[Dir::North]), true, Facing::North)
            .unwrap();
        let b = graph
            .register_node(entity, 1, &NodeSpec::pipe("outlet", &[Dir::North, Dir::South]), true, Facing::North)
            .unwrap();
        graph.run_pass(&grid);
        assert_eq!(graph.group_count(), 1);

        graph.remove_entity_nodes(entity);
        grid.remove(entity);
        let report = graph.run_pass(&grid);

        assert_eq!(report.groups_discarded, 1);
        assert_eq!(report.nodes_freed, 2);
        assert_eq!(graph.group_count(), 0);
        assert!(graph.node(a).is_none());
        assert!(graph.node(b).is_none());
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_kinds_never_mix() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();

        for x in 0..2 {
            let entity = Entity::from_raw(x as u32 + 1);
            grid.insert(entity, (x, 0));
            graph
                .register_node(entity, x as u32 + 1, &NodeSpec::hv_wire("wire"), true, Facing::North)
                .unwrap();
            graph
                .register_node(entity, x as u32 + 1, &NodeSpec::lv_wire("lv"), true, Facing::North)
                .unwrap();
        }
        graph.run_pass(&grid);

        assert_eq!(graph.group_count(), 2);
        assert_eq!(graph.groups_of_kind(NetKind::HvPower).len(), 1);
        assert_eq!(graph.groups_of_kind(NetKind::LvPower).len(), 1);
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let mut graph = NetGraph::new();
        let entity = Entity::from_raw(1);

        let bad_kind = NodeSpec {
            kind: "steam".to_string(),
            ..NodeSpec::pipe("pipe", &[Dir::North])
        };
        assert!(matches!(
            graph.register_node(entity, 1, &bad_kind, true, Facing::North),
            Err(NetError::UnknownKind(_))
        ));

        let no_dirs = NodeSpec::pipe("pipe", &[]);
        assert!(matches!(
            graph.register_node(entity, 1, &no_dirs, true, Facing::North),
            Err(NetError::NoDirections(_))
        ));

        graph
            .register_node(entity, 1, &NodeSpec::pipe("pipe", &[Dir::North]), true, Facing::North)
            .unwrap();
        assert!(matches!(
            graph.register_node(entity, 1, &NodeSpec::pipe("pipe", &[Dir::North]), true, Facing::North),
            Err(NetError::DuplicateSlot(_))
        ));
    }

    #[test]
    fn test_rotation_changes_connectivity() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();

        // Two north-south pipes stacked vertically; they connect.
        let a = Entity::from_raw(1);
        let b = Entity::from_raw(2);
        grid.insert(a, (0, 0));
        grid.insert(b, (0, 1));
        let mut spec = NodeSpec::pipe("pipe", &[Dir::North, Dir::South]);
        spec.rotates = true;
        let ka = graph.register_node(a, 1, &spec, true, Facing::North).unwrap();
        let kb = graph.register_node(b, 2, &spec, true, Facing::North).unwrap();
        graph.run_pass(&grid);
        assert_eq!(graph.group_of_node(ka), graph.group_of_node(kb));

        // Rotate one to east-west; the link breaks.
        graph.update_transform_state(b, true, Facing::East);
        graph.run_pass(&grid);
        assert_ne!(graph.group_of_node(ka), graph.group_of_node(kb));
        assert_eq!(graph.group_count(), 2);
    }

    #[test]
    fn test_one_way_node_groups_via_symmetric_closure() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();

        // A one-way outlet pointing east at a pipe that does not face back.
        let valve = Entity::from_raw(1);
        let pipe = Entity::from_raw(2);
        grid.insert(valve, (0, 0));
        grid.insert(pipe, (1, 0));

        let mut valve_spec = NodeSpec::pipe("outlet", &[Dir::East]);
        valve_spec.one_way = true;
        let kv = graph
            .register_node(valve, 1, &valve_spec, true, Facing::North)
            .unwrap();
        let kp = graph
            .register_node(pipe, 2, &NodeSpec::pipe("pipe", &[Dir::North, Dir::South]), true, Facing::North)
            .unwrap();
        graph.run_pass(&grid);

        // Raw reach is one-sided, but grouping still unifies them.
        assert_eq!(graph.raw_reachable(kv, &grid), vec![kp]);
        assert!(graph.raw_reachable(kp, &grid).is_empty());
        assert_eq!(graph.group_of_node(kv), graph.group_of_node(kp));
        assert_eq!(graph.group_count(), 1);
    }

    #[test]
    fn test_pipe_gas_follows_membership() {
        let mut graph = NetGraph::new();
        let mut grid = TileGrid::new();
        let nodes = pipe_line(&mut graph, &mut grid, 0..4);
        graph.run_pass(&grid);

        // Seed the shared mixture: 4 segments x 200 L, 80 mol.
        let group = graph.group_of_node(nodes[0].1).unwrap();
        {
            let g = graph.group_mut(group).unwrap();
            if let GroupPayload::Pipe(net) = &mut g.payload {
                assert_eq!(net.air.volume_l, 800.0);
                net.air.moles = 80.0;
            }
        }

        // Cut between x=1 and x=2 by removing x=1; 200 L leaks with the
        // removed pipe, the rest splits 1:2.
        graph.remove_node(nodes[1].1);
        grid.remove(nodes[1].0);
        graph.run_pass(&grid);

        let left = graph.group_of_node(nodes[0].1).unwrap();
        let right = graph.group_of_node(nodes[2].1).unwrap();
        assert_ne!(left, right);

        let left_air = graph.group(left).unwrap().payload.as_pipe().unwrap().air;
        let right_air = graph.group(right).unwrap().payload.as_pipe().unwrap().air;
        assert!((left_air.volume_l - 200.0).abs() < 1e-3);
        assert!((right_air.volume_l - 400.0).abs() < 1e-3);
        // 60 mol survive the leak, split 20/40.
        assert!((left_air.moles - 20.0).abs() < 1e-3);
        assert!((right_air.moles - 40.0).abs() < 1e-3);
    }
}
