//! Self-managed worker capacity
//!
//! [`SelfManagedCapacity::build`] generates the default shape of a
//! self-managed autoscaling group: instance role and profile, node security
//! group, a launch configuration and the group itself. The launch
//! configuration and group stay in memory as typed values until
//! [`SelfManagedCapacity::commit`], so callers can override them first.
//! The spot path uses that window to replace the launch configuration with a
//! spot launch template, since a launch configuration cannot express
//! one-time spot requests.

use serde_json::{json, Value};
use tracing::debug;

use super::ami::EksOptimizedImage;
use super::connections::{disallow_all_egress, SecurityGroupRef};
use super::control_plane::ClusterRef;
use super::userdata::amazon_linux_user_data;
use super::ClusterError;
use crate::network::ResolvedNetwork;
use crate::template::intrinsics::{
    assume_role_policy, base64, get_att, managed_policy_arn, reference, tag,
};
use crate::template::{ConstructPath, Resource, Template};

/// Managed policies every worker node role carries
pub const WORKER_NODE_POLICIES: &[&str] = &[
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
    "AmazonEC2ContainerRegistryReadOnly",
];

/// Processes suspended while a rolling update replaces instances
const ROLLING_UPDATE_SUSPENDED_PROCESSES: &[&str] = &[
    "HealthCheck",
    "ReplaceUnhealthy",
    "AZRebalance",
    "AlarmNotification",
    "ScheduledActions",
];

/// Options for generating a self-managed group
#[derive(Debug, Clone, PartialEq)]
pub struct SelfManagedOptions {
    pub instance_type: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: Option<u32>,
    /// Set on the launch configuration; also marks nodes as spot in user data
    pub spot_price: Option<String>,
    pub rolling_update: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfiguration {
    pub path: ConstructPath,
    pub logical_id: String,
    pub image_id: Value,
    pub instance_type: String,
    pub instance_profile_id: String,
    pub security_group_ids: Vec<Value>,
    /// Un-encoded user data
    pub user_data: Value,
    pub spot_price: Option<String>,
    pub depends_on: Vec<String>,
}

impl LaunchConfiguration {
    pub fn to_resource(&self) -> Resource {
        let mut resource = Resource::new("AWS::AutoScaling::LaunchConfiguration")
            .with_property("ImageId", self.image_id.clone())
            .with_property("InstanceType", json!(self.instance_type))
            .with_property("IamInstanceProfile", reference(&self.instance_profile_id))
            .with_property("SecurityGroups", json!(self.security_group_ids))
            .with_property("UserData", base64(self.user_data.clone()))
            .with_optional_property("SpotPrice", self.spot_price.as_ref().map(|p| json!(p)));
        for id in &self.depends_on {
            resource = resource.with_depends_on(id.clone());
        }
        resource
    }
}

/// Spot requests are one-time: an interrupted instance is replaced by the
/// group, not re-requested
pub const SPOT_INSTANCE_TYPE: &str = "one-time";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpotMarketOptions {
    /// Bid ceiling; `None` caps requests at the on-demand price
    pub max_price: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchTemplate {
    pub path: ConstructPath,
    pub logical_id: String,
    pub image_id: Value,
    pub instance_type: String,
    pub instance_profile_arn: Value,
    pub security_group_ids: Vec<Value>,
    /// Un-encoded user data
    pub user_data: Value,
    pub market: Option<SpotMarketOptions>,
}

impl LaunchTemplate {
    /// A launch template starting instances exactly the way `config` would
    pub fn mirroring(
        config: &LaunchConfiguration,
        path: ConstructPath,
        market: Option<SpotMarketOptions>,
    ) -> Self {
        Self {
            logical_id: path.logical_id(),
            path,
            image_id: config.image_id.clone(),
            instance_type: config.instance_type.clone(),
            instance_profile_arn: get_att(&config.instance_profile_id, "Arn"),
            security_group_ids: config.security_group_ids.clone(),
            user_data: config.user_data.clone(),
            market,
        }
    }

    pub fn to_resource(&self) -> Resource {
        let mut data = json!({
            "ImageId": self.image_id,
            "InstanceType": self.instance_type,
            "IamInstanceProfile": { "Arn": self.instance_profile_arn },
            "UserData": base64(self.user_data.clone()),
            "SecurityGroupIds": self.security_group_ids,
        });
        if let Some(ref market) = self.market {
            let mut spot_options = json!({
                "SpotInstanceType": SPOT_INSTANCE_TYPE,
            });
            if let Some(ref price) = market.max_price {
                spot_options["MaxPrice"] = json!(price);
            }
            data["InstanceMarketOptions"] = json!({
                "MarketType": "spot",
                "SpotOptions": spot_options,
            });
        }
        Resource::new("AWS::EC2::LaunchTemplate").with_property("LaunchTemplateData", data)
    }
}

/// What an autoscaling group launches instances from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSource {
    Configuration(String),
    Template(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoScalingGroup {
    pub path: ConstructPath,
    pub logical_id: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: Option<u32>,
    pub launch: LaunchSource,
    pub subnets: Vec<Value>,
    pub tags: Vec<Value>,
    pub rolling_update: bool,
}

impl AutoScalingGroup {
    /// Logical id of the launch configuration the group references, if any
    pub fn launch_configuration_name(&self) -> Option<&str> {
        match self.launch {
            LaunchSource::Configuration(ref id) => Some(id),
            LaunchSource::Template(_) => None,
        }
    }

    /// Point the group at a launch template instead of its launch
    /// configuration. Returns the id of the configuration that was dropped.
    pub fn replace_launch_configuration(
        &mut self,
        template_id: &str,
    ) -> Result<String, ClusterError> {
        let removed = self
            .launch_configuration_name()
            .map(str::to_string)
            .ok_or_else(|| ClusterError::MissingGeneratedResource {
                construct: self.path.to_string(),
                resource: "LaunchConfigurationName".to_string(),
            })?;
        self.launch = LaunchSource::Template(template_id.to_string());
        Ok(removed)
    }

    pub fn to_resource(&self) -> Resource {
        let mut resource = Resource::new("AWS::AutoScaling::AutoScalingGroup")
            .with_property("MinSize", json!(self.min_size.to_string()))
            .with_property("MaxSize", json!(self.max_size.to_string()))
            .with_optional_property(
                "DesiredCapacity",
                self.desired_capacity.map(|d| json!(d.to_string())),
            )
            .with_property("VPCZoneIdentifier", json!(self.subnets))
            .with_property("Tags", json!(self.tags));

        resource = match self.launch {
            LaunchSource::Configuration(ref id) => {
                resource.with_property("LaunchConfigurationName", reference(id))
            }
            LaunchSource::Template(ref id) => resource.with_property(
                "LaunchTemplate",
                json!({
                    "LaunchTemplateId": reference(id),
                    "Version": get_att(id, "LatestVersionNumber"),
                }),
            ),
        };

        let mut policy = json!({
            "AutoScalingScheduledAction": { "IgnoreUnmodifiedGroupSizeProperties": true }
        });
        if self.rolling_update {
            policy["AutoScalingRollingUpdate"] = json!({
                "WaitOnResourceSignals": false,
                "PauseTime": "PT0S",
                "SuspendProcesses": ROLLING_UPDATE_SUSPENDED_PROCESSES,
            });
        }
        resource.with_update_policy(policy)
    }
}

/// A self-managed node group under construction
#[derive(Debug, Clone, PartialEq)]
pub struct SelfManagedCapacity {
    pub path: ConstructPath,
    pub role_id: String,
    pub instance_profile_id: String,
    pub security_group: SecurityGroupRef,
    pub launch_configuration: Option<LaunchConfiguration>,
    pub launch_template: Option<LaunchTemplate>,
    pub group: AutoScalingGroup,
}

impl SelfManagedCapacity {
    /// Generate the default group shape. The role, instance profile and
    /// security group are added to `template` immediately; the launch
    /// configuration and group wait for [`commit`](Self::commit).
    pub fn build(
        template: &mut Template,
        path: &ConstructPath,
        stack_name: &str,
        cluster: &ClusterRef,
        network: &ResolvedNetwork,
        options: &SelfManagedOptions,
    ) -> Result<Self, ClusterError> {
        let role_id = template.add(
            &path.child("InstanceRole"),
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

        let instance_profile_id = template.add(
            &path.child("InstanceProfile"),
            Resource::new("AWS::IAM::InstanceProfile")
                .with_property("Roles", json!([reference(&role_id)])),
        )?;

        let sg_path = path.child("InstanceSecurityGroup");
        let sg_id = template.add(
            &sg_path,
            Resource::new("AWS::EC2::SecurityGroup")
                .with_property(
                    "GroupDescription",
                    json!(format!("{}/{}", stack_name, sg_path)),
                )
                .with_property("SecurityGroupEgress", disallow_all_egress())
                .with_property("VpcId", network.vpc_id.clone())
                .with_property(
                    "Tags",
                    json!([
                        tag(cluster.ownership_tag_key(), json!("owned")),
                        tag(json!("Name"), json!(format!("{}/{}", stack_name, path))),
                    ]),
                ),
        )?;
        let security_group = SecurityGroupRef {
            logical_id: sg_id,
            path: sg_path,
            allow_all_outbound: false,
        };

        let group_path = path.child("ASG");
        let group_id = group_path.logical_id();
        let spot = options.spot_price.is_some();

        let image = EksOptimizedImage::for_instance_type(&cluster.kubernetes_version, &options.instance_type);
        let launch_path = path.child("LaunchConfig");
        let launch_configuration = LaunchConfiguration {
            logical_id: launch_path.logical_id(),
            path: launch_path,
            image_id: image.image_id(template)?,
            instance_type: options.instance_type.clone(),
            instance_profile_id: instance_profile_id.clone(),
            security_group_ids: vec![security_group.group_id()],
            user_data: amazon_linux_user_data(cluster.name(), &group_id, spot),
            spot_price: options.spot_price.clone(),
            depends_on: vec![role_id.clone()],
        };

        let group = AutoScalingGroup {
            logical_id: group_id,
            path: group_path,
            min_size: options.min_size,
            max_size: options.max_size,
            desired_capacity: options.desired_capacity,
            launch: LaunchSource::Configuration(launch_configuration.logical_id.clone()),
            subnets: network.worker_subnets(),
            tags: vec![
                json!({
                    "Key": "Name",
                    "PropagateAtLaunch": true,
                    "Value": format!("{}/{}", stack_name, path),
                }),
                json!({
                    "Key": cluster.ownership_tag_key(),
                    "PropagateAtLaunch": true,
                    "Value": "owned",
                }),
            ],
            rolling_update: options.rolling_update,
        };

        debug!(
            "Generated self-managed group {} ({} x {}..{})",
            path, options.instance_type, options.min_size, options.max_size
        );

        Ok(Self {
            path: path.clone(),
            role_id,
            instance_profile_id,
            security_group,
            launch_configuration: Some(launch_configuration),
            launch_template: None,
            group,
        })
    }

    /// Replace the generated launch configuration with a launch template
    /// carrying spot market options.
    ///
    /// Fails when there is no launch configuration to replace: skipping the
    /// override would silently deploy on-demand instances.
    pub fn use_spot_launch_template(
        &mut self,
        template_path: ConstructPath,
        market: SpotMarketOptions,
    ) -> Result<&LaunchTemplate, ClusterError> {
        let config = self.launch_configuration.as_ref().ok_or_else(|| {
            ClusterError::MissingGeneratedResource {
                construct: self.path.to_string(),
                resource: "LaunchConfiguration".to_string(),
            }
        })?;
        let launch_template = LaunchTemplate::mirroring(config, template_path, Some(market));

        let removed = self.group.replace_launch_configuration(&launch_template.logical_id)?;
        debug!(
            "Replaced launch configuration {} with launch template {}",
            removed, launch_template.logical_id
        );

        self.launch_configuration = None;
        Ok(&*self.launch_template.insert(launch_template))
    }

    /// Add the launch configuration or template and the group to `template`
    pub fn commit(self, template: &mut Template) -> Result<CommittedCapacity, ClusterError> {
        if let Some(ref config) = self.launch_configuration {
            template.add(&config.path, config.to_resource())?;
        }
        if let Some(ref launch_template) = self.launch_template {
            template.add(&launch_template.path, launch_template.to_resource())?;
        }
        let group_id = template.add(&self.group.path, self.group.to_resource())?;

        Ok(CommittedCapacity {
            group_id,
            role_id: self.role_id,
            security_group: self.security_group,
        })
    }
}

/// What remains relevant about a self-managed group once it is in the template
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedCapacity {
    pub group_id: String,
    pub role_id: String,
    pub security_group: SecurityGroupRef,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::control_plane::add_control_plane;

    fn setup() -> (Template, ClusterRef, ResolvedNetwork) {
        let mut template = Template::new(None);
        let network = ResolvedNetwork {
            vpc_id: json!("vpc-1"),
            public_subnets: vec![json!("subnet-a")],
            private_subnets: vec![json!("subnet-b"), json!("subnet-c")],
        };
        let path = ConstructPath::root("EksCluster").child("Cluster");
        let cluster = add_control_plane(&mut template, &path, "stack", "1.18", &network).unwrap();
        (template, cluster, network)
    }

    fn options(spot_price: Option<&str>) -> SelfManagedOptions {
        SelfManagedOptions {
            instance_type: "m5.large".to_string(),
            min_size: 3,
            max_size: 3,
            desired_capacity: None,
            spot_price: spot_price.map(String::from),
            rolling_update: spot_price.is_some(),
        }
    }

    fn spot_market() -> SpotMarketOptions {
        SpotMarketOptions {
            max_price: Some("0.25".to_string()),
        }
    }

    #[test]
    fn test_default_shape_uses_launch_configuration() {
        let (mut template, cluster, network) = setup();
        let path = cluster.path.child("Nodes");
        let capacity =
            SelfManagedCapacity::build(&mut template, &path, "stack", &cluster, &network, &options(None))
                .unwrap();
        capacity.commit(&mut template).unwrap();

        assert_eq!(template.count_of_type("AWS::AutoScaling::LaunchConfiguration"), 1);
        assert_eq!(template.count_of_type("AWS::EC2::LaunchTemplate"), 0);
        let (_, group) = template.resources_of_type("AWS::AutoScaling::AutoScalingGroup")[0];
        assert!(group.property("LaunchConfigurationName").is_some());
        assert_eq!(group.property("MinSize"), Some(&json!("3")));
        assert_eq!(group.property("VPCZoneIdentifier"), Some(&json!(["subnet-b", "subnet-c"])));
        assert!(group.update_policy.as_ref().unwrap().get("AutoScalingRollingUpdate").is_none());
    }

    #[test]
    fn test_spot_patch_swaps_in_launch_template() {
        let (mut template, cluster, network) = setup();
        let path = cluster.path.child("SpotASG");
        let mut capacity = SelfManagedCapacity::build(
            &mut template,
            &path,
            "stack",
            &cluster,
            &network,
            &options(Some("0.1094")),
        )
        .unwrap();

        let config = capacity.launch_configuration.clone().unwrap();
        let launch_template = capacity
            .use_spot_launch_template(ConstructPath::root("EksCluster").child("LaunchTemplate"), spot_market())
            .unwrap()
            .clone();

        assert_eq!(launch_template.image_id, config.image_id);
        assert_eq!(launch_template.user_data, config.user_data);
        assert_eq!(launch_template.security_group_ids, config.security_group_ids);
        assert_eq!(
            launch_template.instance_profile_arn,
            get_att(&capacity.instance_profile_id, "Arn")
        );
        assert!(capacity.launch_configuration.is_none());
        assert_eq!(capacity.group.launch_configuration_name(), None);

        capacity.commit(&mut template).unwrap();
        assert_eq!(template.count_of_type("AWS::AutoScaling::LaunchConfiguration"), 0);
        assert_eq!(template.count_of_type("AWS::EC2::LaunchTemplate"), 1);

        let (_, group) = template.resources_of_type("AWS::AutoScaling::AutoScalingGroup")[0];
        assert!(group.property("LaunchConfigurationName").is_none());
        assert_eq!(
            group.property("LaunchTemplate").unwrap()["LaunchTemplateId"],
            reference(&launch_template.logical_id)
        );
        assert!(group.update_policy.as_ref().unwrap().get("AutoScalingRollingUpdate").is_some());

        let (_, lt) = template.resources_of_type("AWS::EC2::LaunchTemplate")[0];
        let market = &lt.property("LaunchTemplateData").unwrap()["InstanceMarketOptions"];
        assert_eq!(market["MarketType"], "spot");
        assert_eq!(market["SpotOptions"]["SpotInstanceType"], "one-time");
        assert_eq!(market["SpotOptions"]["MaxPrice"], "0.25");
    }

    #[test]
    fn test_launch_template_without_bid_has_no_max_price() {
        let (mut template, cluster, network) = setup();
        let path = cluster.path.child("SpotASG");
        let mut capacity = SelfManagedCapacity::build(
            &mut template,
            &path,
            "stack",
            &cluster,
            &network,
            &options(Some("0.1094")),
        )
        .unwrap();
        let launch_template = capacity
            .use_spot_launch_template(
                ConstructPath::root("EksCluster").child("LaunchTemplate"),
                SpotMarketOptions::default(),
            )
            .unwrap()
            .to_resource();

        let spot_options =
            &launch_template.property("LaunchTemplateData").unwrap()["InstanceMarketOptions"]["SpotOptions"];
        assert_eq!(spot_options["SpotInstanceType"], "one-time");
        assert!(spot_options.get("MaxPrice").is_none());
    }

    #[test]
    fn test_spot_patch_fails_fast_without_launch_configuration() {
        let (mut template, cluster, network) = setup();
        let path = cluster.path.child("SpotASG");
        let mut capacity = SelfManagedCapacity::build(
            &mut template,
            &path,
            "stack",
            &cluster,
            &network,
            &options(Some("0.1094")),
        )
        .unwrap();
        capacity.launch_configuration = None;

        let result = capacity.use_spot_launch_template(
            ConstructPath::root("EksCluster").child("LaunchTemplate"),
            spot_market(),
        );
        assert!(matches!(
            result,
            Err(ClusterError::MissingGeneratedResource { resource, .. }) if resource == "LaunchConfiguration"
        ));
    }

    #[test]
    fn test_group_already_on_launch_template_cannot_be_replaced() {
        let (mut template, cluster, network) = setup();
        let path = cluster.path.child("Nodes");
        let mut capacity =
            SelfManagedCapacity::build(&mut template, &path, "stack", &cluster, &network, &options(None))
                .unwrap();
        capacity.group.launch = LaunchSource::Template("Existing".to_string());

        let result = capacity.group.replace_launch_configuration("Other");
        assert!(matches!(result, Err(ClusterError::MissingGeneratedResource { .. })));
    }

    #[test]
    fn test_node_security_group_restricts_egress() {
        let (mut template, cluster, network) = setup();
        let path = cluster.path.child("Nodes");
        let capacity =
            SelfManagedCapacity::build(&mut template, &path, "stack", &cluster, &network, &options(None))
                .unwrap();

        assert!(!capacity.security_group.allow_all_outbound);
        let sg = template.resource(&capacity.security_group.logical_id).unwrap();
        assert_eq!(sg.property("SecurityGroupEgress"), Some(&disallow_all_egress()));
    }
}
