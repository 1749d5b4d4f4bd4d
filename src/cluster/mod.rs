//! # EKS cluster construct
//!
//! Builds the control plane, its worker capacity and the in-cluster add-ons
//! under the `EksCluster` construct:
//!
//! ```text
//! EksCluster
//! ├── Cluster                  control plane, role, security group
//! │   ├── DefaultCapacity      fixed on-demand group
//! │   ├── SpotASG              spot group (patched)
//! │   ├── Nodegroup*           managed node group
//! │   ├── AwsAuth              node role mapping
//! │   └── chart-spot-interrupt-handler
//! └── LaunchTemplate           spot launch template
//! ```

pub mod addons;
pub mod ami;
pub mod autoscaling;
pub mod capacity;
pub mod connections;
pub mod control_plane;
pub mod nodegroup;
pub mod userdata;

pub use capacity::{render_capacity, select_capacity, CapacityStrategy, CapacityType};
pub use control_plane::ClusterRef;

use thiserror::Error;
use tracing::info;

use crate::config::Settings;
use crate::network::ResolvedNetwork;
use crate::template::{ConstructPath, Template, TemplateError};

/// Root construct id
pub const CLUSTER_CONSTRUCT_ID: &str = "EksCluster";

#[derive(Error, Debug)]
pub enum ClusterError {
    /// An override targeted a generated resource that is not there
    #[error("Construct '{construct}' has no generated {resource} to override")]
    MissingGeneratedResource { construct: String, resource: String },

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Add the cluster, its capacity and add-ons. Returns the cluster handle.
pub fn add_eks_cluster(
    template: &mut Template,
    settings: &Settings,
    network: &ResolvedNetwork,
) -> Result<ClusterRef, ClusterError> {
    let root = ConstructPath::root(CLUSTER_CONSTRUCT_ID);
    let cluster = control_plane::add_control_plane(
        template,
        &root.child("Cluster"),
        &settings.stack_name,
        &settings.kubernetes_version,
        network,
    )?;
    control_plane::add_cluster_outputs(template, &cluster)?;

    info!("Capacity strategy: {}", settings.capacity.describe());
    let rendered = render_capacity(
        template,
        &settings.capacity,
        &root,
        &settings.stack_name,
        &cluster,
        network,
    )?;

    if let Some(ref group) = rendered.self_managed {
        addons::add_aws_auth(template, &cluster, &[group.role_id.clone()])?;
    }
    if matches!(settings.capacity, CapacityStrategy::SpotAutoScalingGroup { .. })
        && settings.spot_interrupt_handler
    {
        addons::add_spot_interrupt_handler(template, &cluster)?;
    }

    Ok(cluster)
}
