//! Node data model - connection points, adjacency policy, and prototype config.
//!
//! A `Node` is a single named connection point owned by one entity. Nodes are
//! stored in a dense arena inside [`crate::graph::NetGraph`] and addressed by
//! generational [`NodeKey`]s; entities only hold keys, never references.

use crate::components::Facing;
use crate::group::GroupKey;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Fatal configuration errors surfaced when a conduit is spawned or a node
/// slot is added. These are developer-facing and are never retried.
#[derive(Debug, Error)]
pub enum NetError {
    /// The node prototype names a group kind with no registered implementation.
    #[error("unknown net kind `{0}`")]
    UnknownKind(String),
    /// A node declared no connection directions, so it could never connect.
    #[error("node slot `{0}` declares no connection directions")]
    NoDirections(String),
    /// Two nodes on the same conduit share a slot name.
    #[error("duplicate node slot `{0}` on one conduit")]
    DuplicateSlot(String),
    /// The entity has no node in the named slot.
    #[error("no node in slot `{0}`")]
    NoSuchSlot(String),
    /// The entity is not a conduit (has no node container).
    #[error("entity is not a conduit")]
    NotAConduit,
    /// Anchored conduits cannot be moved between tiles.
    #[error("cannot move an anchored conduit")]
    MoveWhileAnchored,
}

// ============================================================================
// GROUP KINDS
// ============================================================================

/// The group-kind tag: which networks a node may join, and which aggregate
/// logic governs the resulting group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetKind {
    /// Atmospheric pipe network sharing one gas volume.
    Pipe,
    /// High-voltage power network.
    HvPower,
    /// Low-voltage power network.
    LvPower,
}

impl NetKind {
    /// Parse a prototype kind string. Unknown strings are a fatal config error.
    pub fn parse(s: &str) -> Result<Self, NetError> {
        match s {
            "pipe" => Ok(NetKind::Pipe),
            "hv_power" => Ok(NetKind::HvPower),
            "lv_power" => Ok(NetKind::LvPower),
            other => Err(NetError::UnknownKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetKind::Pipe => "pipe",
            NetKind::HvPower => "hv_power",
            NetKind::LvPower => "lv_power",
        }
    }
}

// ============================================================================
// DIRECTIONS
// ============================================================================

/// One of the four cardinal connection directions on the tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dir {
    North,
    East,
    South,
    West,
}

/// Fixed iteration order for deterministic floods.
pub const ALL_DIRS: [Dir; 4] = [Dir::North, Dir::East, Dir::South, Dir::West];

impl Dir {
    /// Tile offset for this direction (+y = north).
    #[inline]
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Dir::North => (0, 1),
            Dir::East => (1, 0),
            Dir::South => (0, -1),
            Dir::West => (-1, 0),
        }
    }

    #[inline]
    pub fn opposite(&self) -> Dir {
        match self {
            Dir::North => Dir::South,
            Dir::East => Dir::West,
            Dir::South => Dir::North,
            Dir::West => Dir::East,
        }
    }

    /// Rotate clockwise by the given number of quarter turns.
    #[inline]
    pub fn rotated(&self, quarter_turns: u8) -> Dir {
        let idx = match self {
            Dir::North => 0u8,
            Dir::East => 1,
            Dir::South => 2,
            Dir::West => 3,
        };
        match (idx + quarter_turns) % 4 {
            0 => Dir::North,
            1 => Dir::East,
            2 => Dir::South,
            _ => Dir::West,
        }
    }

    #[inline]
    fn bit(&self) -> u8 {
        match self {
            Dir::North => 1,
            Dir::East => 2,
            Dir::South => 4,
            Dir::West => 8,
        }
    }
}

/// Bitmask of connection directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirMask(u8);

impl DirMask {
    pub const NONE: DirMask = DirMask(0);
    pub const ALL: DirMask = DirMask(0b1111);

    pub fn from_dirs(dirs: &[Dir]) -> Self {
        let mut mask = 0u8;
        for d in dirs {
            mask |= d.bit();
        }
        DirMask(mask)
    }

    #[inline]
    pub fn contains(&self, dir: Dir) -> bool {
        self.0 & dir.bit() != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Rotate the whole mask by the entity's facing.
    pub fn rotated(&self, facing: Facing) -> DirMask {
        let turns = facing.quarter_turns();
        if turns == 0 {
            return *self;
        }
        let mut out = 0u8;
        for d in ALL_DIRS {
            if self.contains(d) {
                out |= d.rotated(turns).bit();
            }
        }
        DirMask(out)
    }

    /// Iterate the set directions in fixed N-E-S-W order.
    pub fn iter(&self) -> impl Iterator<Item = Dir> + '_ {
        ALL_DIRS.into_iter().filter(|d| self.contains(*d))
    }
}

// ============================================================================
// PROTOTYPE CONFIGURATION
// ============================================================================

/// Kind-specific contributions a node makes to its group's aggregate state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NodeAttrs {
    /// Pipe volume this node adds to a pipe net, in liters.
    #[serde(default)]
    pub volume_l: f32,
    /// Continuous supply this node adds to a power net, in watts.
    #[serde(default)]
    pub supply_w: f32,
    /// Continuous load this node adds to a power net, in watts.
    #[serde(default)]
    pub load_w: f32,
}

/// Static configuration for one node slot, read at entity initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Slot name, unique within the owning conduit.
    pub slot: String,
    /// Group kind tag, e.g. "pipe" or "hv_power".
    pub kind: String,
    /// Declared connection directions, before rotation.
    pub dirs: Vec<Dir>,
    /// Whether the node only connects while its owner is anchored.
    #[serde(default = "default_true")]
    pub need_anchored: bool,
    /// Whether connection directions rotate with the owner's facing.
    #[serde(default)]
    pub rotates: bool,
    /// One-way nodes push into neighbors regardless of the neighbor's facing
    /// masks. The raw reachable relation becomes asymmetric at such nodes.
    #[serde(default)]
    pub one_way: bool,
    #[serde(default)]
    pub attrs: NodeAttrs,
}

fn default_true() -> bool {
    true
}

impl NodeSpec {
    /// A straight or junction pipe segment with the default pipe volume.
    pub fn pipe(slot: &str, dirs: &[Dir]) -> Self {
        Self {
            slot: slot.to_string(),
            kind: "pipe".to_string(),
            dirs: dirs.to_vec(),
            need_anchored: true,
            rotates: true,
            one_way: false,
            attrs: NodeAttrs {
                volume_l: 200.0,
                ..Default::default()
            },
        }
    }

    /// An omnidirectional HV cable node.
    pub fn hv_wire(slot: &str) -> Self {
        Self {
            slot: slot.to_string(),
            kind: "hv_power".to_string(),
            dirs: ALL_DIRS.to_vec(),
            need_anchored: true,
            rotates: false,
            one_way: false,
            attrs: NodeAttrs::default(),
        }
    }

    /// An omnidirectional LV cable node.
    pub fn lv_wire(slot: &str) -> Self {
        Self {
            slot: slot.to_string(),
            kind: "lv_power".to_string(),
            dirs: ALL_DIRS.to_vec(),
            need_anchored: true,
            rotates: false,
            one_way: false,
            attrs: NodeAttrs::default(),
        }
    }

    pub fn with_attrs(mut self, attrs: NodeAttrs) -> Self {
        self.attrs = attrs;
        self
    }
}

// ============================================================================
// NODE ARENA RECORD
// ============================================================================

/// Generational handle into the node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// One connection point in the arena.
///
/// Bookkeeping fields (`flood_gen`, `undirect_gen`, `flagged_for_flood`,
/// `net_id`) belong to the orchestrator; everything else is fixed at
/// registration except the cached transform state.
#[derive(Debug, Clone)]
pub struct Node {
    pub slot: String,
    pub owner: Entity,
    /// Copy of the owner's `ConduitId`, for the diagnostics export.
    pub conduit_id: u32,
    pub kind: NetKind,
    pub need_anchored: bool,
    pub rotates: bool,
    pub one_way: bool,
    pub attrs: NodeAttrs,
    /// Declared directions, unrotated.
    pub dirs: DirMask,
    /// Directions after applying the owner's facing. Recomputed on rotation.
    pub current_dirs: DirMask,
    /// Cached anchor state of the owner, maintained by the topology systems.
    pub anchored: bool,
    /// Set when the owning container is being removed. In-flight floods skip
    /// deleting nodes; the arena slot is freed at the end of the next pass.
    pub deleting: bool,
    pub group: Option<GroupKey>,
    /// Visited marker for the current flood pass.
    pub flood_gen: u64,
    /// Marks that an asymmetric raw edge was already reported this pass.
    pub undirect_gen: u64,
    /// Set while the node sits in the dirty queue, to dedupe enqueues.
    pub flagged_for_flood: bool,
    /// Network-local id, assigned per pass. Diagnostics only.
    pub net_id: u32,
}

impl Node {
    /// Cheap reachability pre-filter: deleting nodes and `need_anchored`
    /// nodes on unanchored owners never connect.
    #[inline]
    pub fn connectable(&self) -> bool {
        !self.deleting && (!self.need_anchored || self.anchored)
    }

    /// Recompute the rotation-dependent direction mask.
    pub fn apply_facing(&mut self, facing: Facing) {
        self.current_dirs = if self.rotates {
            self.dirs.rotated(facing)
        } else {
            self.dirs
        };
    }

    /// Type label for the diagnostics export.
    pub fn type_label(&self) -> &'static str {
        if self.one_way {
            "one_way"
        } else if self.dirs == DirMask::ALL {
            "omni"
        } else {
            "directional"
        }
    }
}
