//! Group-kind implementations: pipe networks and power networks.
//!
//! The grouping core treats aggregate state as opaque; this module supplies
//! the concrete payloads behind the four lifecycle hooks. Payloads are a
//! closed tagged union rather than trait objects, so dispatch is a match
//! and groups stay `Send + 'static` without boxing.
//!
//! Merge folding is commutative and associative up to floating-point
//! tolerance; split distribution receives the complete new partition in one
//! call. The core invokes each hook at most once per group per pass.

use crate::node::{NetKind, NodeAttrs};
use serde::{Deserialize, Serialize};

/// Ideal gas constant, J/(mol K). Pressure in kPa falls out of n*R*T/V
/// with volume in liters.
pub const GAS_CONSTANT_R: f32 = 8.314;

// ============================================================================
// PIPE NETWORKS
// ============================================================================

/// A uniform gas volume shared by a whole pipe network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasMixture {
    /// Total pipe volume, liters.
    pub volume_l: f32,
    /// Total gas amount, moles.
    pub moles: f32,
    /// Mixture temperature, kelvin.
    pub temperature_k: f32,
}

impl Default for GasMixture {
    fn default() -> Self {
        Self {
            volume_l: 0.0,
            moles: 0.0,
            temperature_k: 293.15, // room temperature
        }
    }
}

impl GasMixture {
    /// Ideal-gas pressure, kPa. Zero-volume mixtures read as vacuum.
    pub fn pressure_kpa(&self) -> f32 {
        if self.volume_l <= f32::EPSILON {
            0.0
        } else {
            self.moles * GAS_CONSTANT_R * self.temperature_k / self.volume_l
        }
    }

    /// Fold another mixture in, mixing temperature weighted by moles.
    pub fn merge(&mut self, other: GasMixture) {
        let total = self.moles + other.moles;
        if total > f32::EPSILON {
            self.temperature_k = (self.temperature_k * self.moles
                + other.temperature_k * other.moles)
                / total;
        }
        self.moles = total;
        self.volume_l += other.volume_l;
    }

    /// Remove pipe volume and the gas occupying it (leaks with the pipe).
    pub fn remove_volume(&mut self, volume_l: f32) {
        if self.volume_l <= f32::EPSILON {
            return;
        }
        let frac = (volume_l / self.volume_l).clamp(0.0, 1.0);
        self.moles *= 1.0 - frac;
        self.volume_l = (self.volume_l - volume_l).max(0.0);
    }
}

/// Aggregate state of an atmospheric pipe network.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipeNet {
    pub air: GasMixture,
}

// ============================================================================
// POWER NETWORKS
// ============================================================================

/// Aggregate state of a power network: summed continuous supply and load.
///
/// The actual distribution math lives in the consumer that reads these
/// sums; the grouping core only keeps them consistent with membership.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PowerNet {
    /// Static counter of continuous supply on this network, watts.
    pub supply_w: f32,
    /// Static counter of continuous load on this network, watts.
    pub load_w: f32,
}

// ============================================================================
// PAYLOAD DISPATCH
// ============================================================================

/// One slice of a split partition: the contributions the former members
/// bring into the part, and the part's group payload to fold them into.
pub struct SplitPart<'a> {
    /// Attributes of the prior group's members that landed in this part.
    pub member_attrs: &'a [NodeAttrs],
    /// Payload of the resulting group.
    pub target: &'a mut GroupPayload,
}

/// Kind-specific aggregate state, dispatched through the lifecycle hooks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum GroupPayload {
    Pipe(PipeNet),
    Power(PowerNet),
}

impl GroupPayload {
    /// Zeroed payload for a freshly created group of the given kind.
    pub fn new_for(kind: NetKind) -> Self {
        match kind {
            NetKind::Pipe => GroupPayload::Pipe(PipeNet::default()),
            NetKind::HvPower | NetKind::LvPower => GroupPayload::Power(PowerNet::default()),
        }
    }

    /// Incremental hook: nodes joined the group without bringing a prior
    /// group's aggregate with them.
    pub fn on_nodes_added(&mut self, nodes: &[NodeAttrs]) {
        match self {
            GroupPayload::Pipe(net) => {
                for attrs in nodes {
                    net.air.volume_l += attrs.volume_l;
                }
            }
            GroupPayload::Power(net) => {
                for attrs in nodes {
                    net.supply_w += attrs.supply_w;
                    net.load_w += attrs.load_w;
                }
            }
        }
    }

    /// Incremental hook: nodes left the group entirely (deleted or no
    /// longer connectable). Pipe volume leaves with its share of gas.
    pub fn on_nodes_removed(&mut self, nodes: &[NodeAttrs]) {
        match self {
            GroupPayload::Pipe(net) => {
                for attrs in nodes {
                    net.air.remove_volume(attrs.volume_l);
                }
            }
            GroupPayload::Power(net) => {
                for attrs in nodes {
                    net.supply_w -= attrs.supply_w;
                    net.load_w -= attrs.load_w;
                }
            }
        }
    }

    /// Merge hook: fold the absorbed group's aggregate into this survivor.
    pub fn on_groups_merged(&mut self, absorbed: GroupPayload) {
        match (self, absorbed) {
            (GroupPayload::Pipe(net), GroupPayload::Pipe(other)) => {
                net.air.merge(other.air);
            }
            (GroupPayload::Power(net), GroupPayload::Power(other)) => {
                net.supply_w += other.supply_w;
                net.load_w += other.load_w;
            }
            _ => {
                log::error!("attempted to merge group payloads of different kinds");
            }
        }
    }

    /// Split hook: distribute this aggregate across the complete new
    /// partition. Gas is conserved among the surviving parts, proportional
    /// to the pipe volume each part represents; power sums are rebuilt from
    /// member contributions.
    pub fn on_group_split(self, parts: &mut [SplitPart<'_>]) {
        match self {
            GroupPayload::Pipe(net) => {
                let part_volume =
                    |p: &SplitPart<'_>| p.member_attrs.iter().map(|a| a.volume_l).sum::<f32>();
                let surviving: f32 = parts.iter().map(part_volume).sum();
                for part in parts.iter_mut() {
                    let volume = part_volume(part);
                    let moles = if surviving > f32::EPSILON {
                        net.air.moles * volume / surviving
                    } else {
                        0.0
                    };
                    part.target.on_groups_merged(GroupPayload::Pipe(PipeNet {
                        air: GasMixture {
                            volume_l: volume,
                            moles,
                            temperature_k: net.air.temperature_k,
                        },
                    }));
                }
            }
            GroupPayload::Power(_) => {
                for part in parts.iter_mut() {
                    let share = PowerNet {
                        supply_w: part.member_attrs.iter().map(|a| a.supply_w).sum(),
                        load_w: part.member_attrs.iter().map(|a| a.load_w).sum(),
                    };
                    part.target.on_groups_merged(GroupPayload::Power(share));
                }
            }
        }
    }

    pub fn as_pipe(&self) -> Option<&PipeNet> {
        match self {
            GroupPayload::Pipe(net) => Some(net),
            _ => None,
        }
    }

    pub fn as_power(&self) -> Option<&PowerNet> {
        match self {
            GroupPayload::Power(net) => Some(net),
            _ => None,
        }
    }
}
