//! Managed node groups

use serde_json::json;
use tracing::debug;

use super::ami::managed_ami_type;
use super::autoscaling::WORKER_NODE_POLICIES;
use super::capacity::CapacityType;
use super::control_plane::ClusterRef;
use crate::network::ResolvedNetwork;
use crate::template::intrinsics::{assume_role_policy, get_att, managed_policy_arn};
use crate::template::{ConstructPath, Resource, Template, TemplateError};

#[derive(Debug, Clone, PartialEq)]
pub struct NodegroupOptions {
    pub capacity_type: CapacityType,
    pub instance_types: Vec<String>,
    pub min_size: u32,
    pub desired_size: u32,
    pub max_size: u32,
}

/// Add a node role and a managed node group. Returns the node group's
/// logical id.
pub fn add_managed_nodegroup(
    template: &mut Template,
    path: &ConstructPath,
    cluster: &ClusterRef,
    network: &ResolvedNetwork,
    options: &NodegroupOptions,
) -> Result<String, TemplateError> {
    let role_id = template.add(
        &path.child("NodeGroupRole"),
        Resource::new("AWS::IAM::Role")
            .with_property("AssumeRolePolicyDocument", assume_role_policy("ec2.amazonaws.com"))
            .with_property(
                "ManagedPolicyArns",
                json!(WORKER_NODE_POLICIES
                    .iter()
                    .map(|p| managed_policy_arn(p))
                    .collect::<Vec<_>>()),
            ),
    )?;

    let ami_type = options
        .instance_types
        .first()
        .map(|t| managed_ami_type(t))
        .unwrap_or("AL2_x86_64");

    debug!(
        "Managed node group {} ({}, {:?})",
        path,
        options.capacity_type.as_str(),
        options.instance_types
    );

    template.add(
        path,
        Resource::new("AWS::EKS::Nodegroup")
            .with_property("ClusterName", cluster.name())
            .with_property("NodeRole", get_att(&role_id, "Arn"))
            .with_property("Subnets", json!(network.worker_subnets()))
            .with_property(
                "ScalingConfig",
                json!({
                    "MinSize": options.min_size,
                    "DesiredSize": options.desired_size,
                    "MaxSize": options.max_size,
                }),
            )
            .with_property("InstanceTypes", json!(options.instance_types))
            .with_property("CapacityType", json!(options.capacity_type.as_str()))
            .with_property("AmiType", json!(ami_type))
            .with_property("ForceUpdateEnabled", json!(true)),
    )
}
