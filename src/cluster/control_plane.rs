//! Managed Kubernetes control plane

use serde_json::{json, Value};

use super::connections::{allow_all_egress, SecurityGroupRef};
use crate::network::ResolvedNetwork;
use crate::template::intrinsics::{
    assume_role_policy, aws_region, get_att, join, managed_policy_arn, reference, tag,
};
use crate::template::{ConstructPath, Output, Resource, Template, TemplateError};

/// The control plane as seen by capacity and add-on constructs
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRef {
    pub path: ConstructPath,
    pub logical_id: String,
    pub role_id: String,
    pub security_group: SecurityGroupRef,
    pub kubernetes_version: String,
}

impl ClusterRef {
    /// Generated cluster name
    pub fn name(&self) -> Value {
        reference(&self.logical_id)
    }

    pub fn endpoint(&self) -> Value {
        get_att(&self.logical_id, "Endpoint")
    }

    /// `kubernetes.io/cluster/<name>` ownership tag key
    pub fn ownership_tag_key(&self) -> Value {
        join("", vec![json!("kubernetes.io/cluster/"), self.name()])
    }
}

/// Add the cluster role, control-plane security group and cluster
pub fn add_control_plane(
    template: &mut Template,
    path: &ConstructPath,
    stack_name: &str,
    kubernetes_version: &str,
    network: &ResolvedNetwork,
) -> Result<ClusterRef, TemplateError> {
    let role_id = template.add(
        &path.child("Role"),
        Resource::new("AWS::IAM::Role")
            .with_property("AssumeRolePolicyDocument", assume_role_policy("eks.amazonaws.com"))
            .with_property(
                "ManagedPolicyArns",
                json!([managed_policy_arn("AmazonEKSClusterPolicy")]),
            ),
    )?;

    let sg_path = path.child("ControlPlaneSecurityGroup");
    let sg_id = template.add(
        &sg_path,
        Resource::new("AWS::EC2::SecurityGroup")
            .with_property("GroupDescription", json!("EKS Control Plane Security Group"))
            .with_property("SecurityGroupEgress", allow_all_egress())
            .with_property("VpcId", network.vpc_id.clone())
            .with_property(
                "Tags",
                json!([tag(json!("Name"), json!(format!("{}/{}", stack_name, sg_path)))]),
            ),
    )?;
    let security_group = SecurityGroupRef {
        logical_id: sg_id,
        path: sg_path,
        allow_all_outbound: true,
    };

    let cluster_id = template.add(
        path,
        Resource::new("AWS::EKS::Cluster")
            .with_property("Version", json!(kubernetes_version))
            .with_property("RoleArn", get_att(&role_id, "Arn"))
            .with_property(
                "ResourcesVpcConfig",
                json!({
                    "SecurityGroupIds": [security_group.group_id()],
                    "SubnetIds": network.all_subnets(),
                }),
            ),
    )?;

    Ok(ClusterRef {
        path: path.clone(),
        logical_id: cluster_id,
        role_id,
        security_group,
        kubernetes_version: kubernetes_version.to_string(),
    })
}

/// Stack outputs for connecting to the cluster
pub fn add_cluster_outputs(template: &mut Template, cluster: &ClusterRef) -> Result<(), TemplateError> {
    template.add_output(
        cluster.path.child("ClusterName").logical_id(),
        Output {
            value: cluster.name(),
            description: Some("Name of the EKS cluster".to_string()),
        },
    )?;
    template.add_output(
        cluster.path.child("ClusterEndpoint").logical_id(),
        Output {
            value: cluster.endpoint(),
            description: Some("Kubernetes API server endpoint".to_string()),
        },
    )?;
    template.add_output(
        cluster.path.child("ConfigCommand").logical_id(),
        Output {
            value: join(
                "",
                vec![
                    json!("aws eks update-kubeconfig --name "),
                    cluster.name(),
                    json!(" --region "),
                    aws_region(),
                ],
            ),
            description: Some("Command that writes a kubeconfig for the cluster".to_string()),
        },
    )?;
    template.add_output(
        cluster.path.child("GetTokenCommand").logical_id(),
        Output {
            value: join(
                "",
                vec![
                    json!("aws eks get-token --cluster-name "),
                    cluster.name(),
                    json!(" --region "),
                    aws_region(),
                ],
            ),
            description: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> ResolvedNetwork {
        ResolvedNetwork {
            vpc_id: json!("vpc-1"),
            public_subnets: vec![json!("subnet-a")],
            private_subnets: vec![json!("subnet-b")],
        }
    }

    #[test]
    fn test_control_plane_resources() {
        let mut template = Template::new(None);
        let path = ConstructPath::root("EksCluster").child("Cluster");
        let cluster = add_control_plane(&mut template, &path, "stack", "1.18", &network()).unwrap();

        let resource = template.resource(&cluster.logical_id).unwrap();
        assert_eq!(resource.resource_type, "AWS::EKS::Cluster");
        assert_eq!(resource.property("Version"), Some(&json!("1.18")));
        assert_eq!(
            resource.property("ResourcesVpcConfig").unwrap()["SubnetIds"],
            json!(["subnet-a", "subnet-b"])
        );
        assert!(cluster.security_group.allow_all_outbound);
        assert_eq!(template.count_of_type("AWS::IAM::Role"), 1);
        assert_eq!(template.count_of_type("AWS::EC2::SecurityGroup"), 1);
    }

    #[test]
    fn test_outputs() {
        let mut template = Template::new(None);
        let path = ConstructPath::root("EksCluster").child("Cluster");
        let cluster = add_control_plane(&mut template, &path, "stack", "1.18", &network()).unwrap();
        add_cluster_outputs(&mut template, &cluster).unwrap();

        assert_eq!(template.outputs.len(), 4);
        let config = template
            .outputs
            .iter()
            .find(|(id, _)| id.contains("ConfigCommand"))
            .map(|(_, o)| o)
            .unwrap();
        assert_eq!(config.value["Fn::Join"][1][1], cluster.name());
    }
}
