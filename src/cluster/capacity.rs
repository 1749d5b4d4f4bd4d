//! Worker capacity strategies
//!
//! A synthesis run has exactly one capacity strategy. It is chosen once from
//! the context values and rendered by a single exhaustive match, so adding a
//! strategy forces every consumer to handle it.

use std::fmt;

use tracing::info;

use super::autoscaling::{
    CommittedCapacity, SelfManagedCapacity, SelfManagedOptions, SpotMarketOptions,
};
use super::connections::connect_nodes_to_control_plane;
use super::control_plane::ClusterRef;
use super::nodegroup::{add_managed_nodegroup, NodegroupOptions};
use super::ClusterError;
use crate::config::settings::{
    NodeGroupKind, SpotStrategy, DEFAULT_INSTANCE_TYPE, PLACEHOLDER_SPOT_PRICE,
    SPOT_FALLBACK_INSTANCE_TYPES,
};
use crate::network::ResolvedNetwork;
use crate::template::{ConstructPath, Template};

/// Market a managed node group buys capacity from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityType {
    Spot,
    OnDemand,
}

impl CapacityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityType::Spot => "SPOT",
            CapacityType::OnDemand => "ON_DEMAND",
        }
    }
}

/// How worker capacity is provisioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityStrategy {
    /// Self-managed on-demand group with a fixed size
    FixedOnDemand { instance_type: String, count: u32 },

    /// Self-managed group patched onto a spot launch template
    SpotAutoScalingGroup {
        instance_types: Vec<String>,
        min_count: u32,
        max_count: u32,
        /// Explicit bid ceiling; `None` leaves requests capped at the
        /// on-demand price
        spot_price_ceiling: Option<String>,
    },

    /// Managed node group owning its own market selection
    ManagedNodeGroup {
        capacity_type: CapacityType,
        instance_types: Vec<String>,
        desired_size: u32,
        max_size: u32,
    },
}

impl fmt::Display for CapacityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityStrategy::FixedOnDemand { .. } => write!(f, "fixed-on-demand"),
            CapacityStrategy::SpotAutoScalingGroup { .. } => write!(f, "spot-autoscaling-group"),
            CapacityStrategy::ManagedNodeGroup { .. } => write!(f, "managed-nodegroup"),
        }
    }
}

impl CapacityStrategy {
    /// One-line human-readable description
    pub fn describe(&self) -> String {
        match self {
            CapacityStrategy::FixedOnDemand {
                instance_type,
                count,
            } => format!("{} x {} on-demand (self-managed)", count, instance_type),
            CapacityStrategy::SpotAutoScalingGroup {
                instance_types,
                min_count,
                max_count,
                spot_price_ceiling,
            } => format!(
                "{}..{} x {} spot, max price {} (self-managed, launch template)",
                min_count,
                max_count,
                instance_types.join(","),
                spot_price_ceiling.as_deref().unwrap_or("on-demand")
            ),
            CapacityStrategy::ManagedNodeGroup {
                capacity_type,
                instance_types,
                desired_size,
                max_size,
            } => format!(
                "{}..{} x {} {} (managed node group)",
                desired_size,
                max_size,
                instance_types.join(","),
                capacity_type.as_str()
            ),
        }
    }
}

/// Context values the selection depends on
#[derive(Debug, Clone)]
pub struct CapacityInputs<'a> {
    pub spot_only: bool,
    pub spot_strategy: SpotStrategy,
    pub node_group: NodeGroupKind,
    pub instance_type: Option<&'a str>,
    pub desired: u32,
    pub max: Option<u32>,
    pub spot_price: Option<&'a str>,
}

// ============================================================================
// SBIO: Pure selection (no I/O)
// ============================================================================

/// Pick the capacity strategy for a run
pub fn select_capacity(inputs: &CapacityInputs<'_>) -> CapacityStrategy {
    let single_type = || vec![inputs.instance_type.unwrap_or(DEFAULT_INSTANCE_TYPE).to_string()];

    if !inputs.spot_only {
        return match inputs.node_group {
            NodeGroupKind::SelfManaged => CapacityStrategy::FixedOnDemand {
                instance_type: inputs.instance_type.unwrap_or(DEFAULT_INSTANCE_TYPE).to_string(),
                count: inputs.desired,
            },
            NodeGroupKind::Managed => CapacityStrategy::ManagedNodeGroup {
                capacity_type: CapacityType::OnDemand,
                instance_types: single_type(),
                desired_size: inputs.desired,
                max_size: nodegroup_max(inputs.desired, inputs.max),
            },
        };
    }

    match inputs.spot_strategy {
        SpotStrategy::LaunchTemplate => CapacityStrategy::SpotAutoScalingGroup {
            instance_types: single_type(),
            min_count: inputs.desired,
            max_count: inputs.max.unwrap_or(inputs.desired).max(inputs.desired).max(1),
            spot_price_ceiling: inputs.spot_price.map(str::to_string),
        },
        SpotStrategy::ManagedNodeGroup => CapacityStrategy::ManagedNodeGroup {
            capacity_type: CapacityType::Spot,
            instance_types: match inputs.instance_type {
                Some(t) => vec![t.to_string()],
                None => SPOT_FALLBACK_INSTANCE_TYPES
                    .iter()
                    .map(|t| t.to_string())
                    .collect(),
            },
            desired_size: inputs.desired,
            max_size: nodegroup_max(inputs.desired, inputs.max),
        },
    }
}

fn nodegroup_max(desired: u32, max: Option<u32>) -> u32 {
    max.unwrap_or(desired).max(desired).max(1)
}

// ============================================================================
// Rendering
// ============================================================================

/// What rendering produced, for the add-ons that depend on it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedCapacity {
    /// Self-managed group, when one was generated
    pub self_managed: Option<CommittedCapacity>,
    /// Managed node group logical id, when one was generated
    pub nodegroup_id: Option<String>,
}

/// Add the worker capacity for `strategy` to the template
pub fn render_capacity(
    template: &mut Template,
    strategy: &CapacityStrategy,
    root: &ConstructPath,
    stack_name: &str,
    cluster: &ClusterRef,
    network: &ResolvedNetwork,
) -> Result<RenderedCapacity, ClusterError> {
    match strategy {
        CapacityStrategy::FixedOnDemand {
            instance_type,
            count,
        } => {
            if *count == 0 {
                info!("Default capacity is 0; no worker nodes generated");
                return Ok(RenderedCapacity::default());
            }
            let options = SelfManagedOptions {
                instance_type: instance_type.clone(),
                min_size: *count,
                max_size: *count,
                desired_capacity: Some(*count),
                spot_price: None,
                rolling_update: false,
            };
            let capacity = SelfManagedCapacity::build(
                template,
                &cluster.path.child("DefaultCapacity"),
                stack_name,
                cluster,
                network,
                &options,
            )?;
            connect_nodes_to_control_plane(
                template,
                &capacity.security_group,
                &cluster.security_group,
            )?;
            Ok(RenderedCapacity {
                self_managed: Some(capacity.commit(template)?),
                nodegroup_id: None,
            })
        }

        CapacityStrategy::SpotAutoScalingGroup {
            instance_types,
            min_count,
            max_count,
            spot_price_ceiling,
        } => {
            let instance_type = instance_types
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string());
            // the placeholder only marks the nodes as spot; the launch
            // configuration carrying it is replaced below
            let options = SelfManagedOptions {
                instance_type,
                min_size: *min_count,
                max_size: *max_count,
                desired_capacity: None,
                spot_price: Some(PLACEHOLDER_SPOT_PRICE.to_string()),
                rolling_update: true,
            };
            let mut capacity = SelfManagedCapacity::build(
                template,
                &cluster.path.child("SpotASG"),
                stack_name,
                cluster,
                network,
                &options,
            )?;
            connect_nodes_to_control_plane(
                template,
                &capacity.security_group,
                &cluster.security_group,
            )?;
            capacity.use_spot_launch_template(
                root.child("LaunchTemplate"),
                SpotMarketOptions {
                    max_price: spot_price_ceiling.clone(),
                },
            )?;
            Ok(RenderedCapacity {
                self_managed: Some(capacity.commit(template)?),
                nodegroup_id: None,
            })
        }

        CapacityStrategy::ManagedNodeGroup {
            capacity_type,
            instance_types,
            desired_size,
            max_size,
        } => {
            let id = match capacity_type {
                CapacityType::Spot => "NodegroupSpotCapacity",
                CapacityType::OnDemand => "NodegroupDefaultCapacity",
            };
            let options = NodegroupOptions {
                capacity_type: *capacity_type,
                instance_types: instance_types.clone(),
                min_size: *desired_size,
                desired_size: *desired_size,
                max_size: *max_size,
            };
            let nodegroup_id =
                add_managed_nodegroup(template, &cluster.path.child(id), cluster, network, &options)?;
            Ok(RenderedCapacity {
                self_managed: None,
                nodegroup_id: Some(nodegroup_id),
            })
        }
    }
}
