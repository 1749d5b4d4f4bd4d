//! In-cluster resources applied through the engine's kubectl provider

use serde_json::{json, Value};

use super::control_plane::ClusterRef;
use crate::template::intrinsics::{get_att, join, reference};
use crate::template::{ConstructPath, Parameter, Resource, Template, TemplateError};

/// Parameter carrying the kubectl provider's service token
pub const KUBECTL_PROVIDER_PARAMETER: &str = "KubectlProviderServiceToken";

pub const NODE_TERMINATION_HANDLER_CHART: &str = "aws-node-termination-handler";
pub const EKS_CHARTS_REPOSITORY: &str = "https://aws.github.io/eks-charts";

fn service_token(template: &mut Template) -> Result<Value, TemplateError> {
    template.add_parameter(
        KUBECTL_PROVIDER_PARAMETER,
        Parameter {
            parameter_type: "String".to_string(),
            default: None,
            description: Some("Service token of the kubectl provider".to_string()),
        },
    )?;
    Ok(reference(KUBECTL_PROVIDER_PARAMETER))
}

/// A `mapRoles` entry letting instances of `role_id` join as nodes
fn node_role_mapping(role_id: &str) -> Value {
    join(
        "",
        vec![
            json!("- rolearn: "),
            get_att(role_id, "Arn"),
            json!("\n  username: system:node:{{EC2PrivateDNSName}}\n  groups:\n    - system:bootstrappers\n    - system:nodes\n"),
        ],
    )
}

/// Map self-managed node roles into the `aws-auth` ConfigMap
pub fn add_aws_auth(
    template: &mut Template,
    cluster: &ClusterRef,
    node_role_ids: &[String],
) -> Result<String, TemplateError> {
    let token = service_token(template)?;
    let map_roles = join(
        "",
        node_role_ids.iter().map(|id| node_role_mapping(id)).collect(),
    );
    let manifest = json!([{
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": "aws-auth", "namespace": "kube-system" },
        "data": { "mapRoles": map_roles, "mapUsers": "[]", "mapAccounts": "[]" },
    }]);

    template.add(
        &cluster.path.child("AwsAuth").child("manifest"),
        Resource::new("Custom::KubernetesManifest")
            .with_property("ServiceToken", token)
            .with_property("ClusterName", cluster.name())
            .with_property("Manifest", manifest)
            .with_property("Overwrite", json!(true))
            .with_depends_on(cluster.logical_id.clone()),
    )
}

/// Install the node termination handler so spot interruptions drain nodes
pub fn add_spot_interrupt_handler(
    template: &mut Template,
    cluster: &ClusterRef,
) -> Result<String, TemplateError> {
    let token = service_token(template)?;
    let path: ConstructPath = cluster.path.child("chart-spot-interrupt-handler");
    template.add(
        &path,
        Resource::new("Custom::HelmChart")
            .with_property("ServiceToken", token)
            .with_property("ClusterName", cluster.name())
            .with_property("Release", json!("ekssynth-spot-interrupt-handler"))
            .with_property("Chart", json!(NODE_TERMINATION_HANDLER_CHART))
            .with_property("Repository", json!(EKS_CHARTS_REPOSITORY))
            .with_property("Namespace", json!("kube-system"))
            .with_property(
                "Values",
                json!({ "nodeSelector": { "lifecycle": "Ec2Spot" } }),
            )
            .with_depends_on(cluster.logical_id.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::control_plane::add_control_plane;
    use crate::network::ResolvedNetwork;

    fn cluster(template: &mut Template) -> ClusterRef {
        let network = ResolvedNetwork {
            vpc_id: json!("vpc-1"),
            public_subnets: vec![json!("subnet-a")],
            private_subnets: vec![],
        };
        let path = ConstructPath::root("EksCluster").child("Cluster");
        add_control_plane(template, &path, "stack", "1.18", &network).unwrap()
    }

    #[test]
    fn test_aws_auth_maps_node_roles() {
        let mut template = Template::new(None);
        let cluster = cluster(&mut template);
        let id = add_aws_auth(&mut template, &cluster, &["NodeRole".to_string()]).unwrap();

        let resource = template.resource(&id).unwrap();
        let data = &resource.property("Manifest").unwrap()[0]["data"];
        let mapping = &data["mapRoles"]["Fn::Join"][1][0]["Fn::Join"][1];
        assert_eq!(mapping[1], get_att("NodeRole", "Arn"));
        assert!(mapping[2].as_str().unwrap().contains("system:bootstrappers"));
        assert!(template.parameters.contains_key(KUBECTL_PROVIDER_PARAMETER));
    }

    #[test]
    fn test_interrupt_handler_shares_service_token() {
        let mut template = Template::new(None);
        let cluster = cluster(&mut template);
        add_aws_auth(&mut template, &cluster, &["NodeRole".to_string()]).unwrap();
        let id = add_spot_interrupt_handler(&mut template, &cluster).unwrap();

        let chart = template.resource(&id).unwrap();
        assert_eq!(chart.property("Chart"), Some(&json!("aws-node-termination-handler")));
        assert_eq!(template.parameters.len(), 1);
    }
}
