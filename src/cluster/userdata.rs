//! Bootstrap user data for self-managed worker nodes

use serde_json::{json, Value};

use crate::template::intrinsics::{aws_region, aws_stack_name, join};

/// Node label and taint applied to spot workers
pub const SPOT_NODE_LABEL: &str = "lifecycle=Ec2Spot";
pub const SPOT_NODE_TAINT: &str = "spotInstance=true:PreferNoSchedule";
pub const ON_DEMAND_NODE_LABEL: &str = "lifecycle=OnDemand";

/// Extra kubelet arguments for a node's market
pub fn kubelet_extra_args(spot: bool) -> String {
    if spot {
        format!(
            "--node-labels {} --register-with-taints={}",
            SPOT_NODE_LABEL, SPOT_NODE_TAINT
        )
    } else {
        format!("--node-labels {}", ON_DEMAND_NODE_LABEL)
    }
}

/// Amazon Linux 2 user data joining `cluster_name` and signalling the
/// autoscaling group `asg_logical_id` once bootstrap finishes.
/// Returned un-encoded; callers wrap it in `Fn::Base64`.
pub fn amazon_linux_user_data(cluster_name: Value, asg_logical_id: &str, spot: bool) -> Value {
    join(
        "",
        vec![
            json!("#!/bin/bash\nset -o xtrace\n/etc/eks/bootstrap.sh "),
            cluster_name,
            json!(format!(
                " --kubelet-extra-args \"{}\" --use-max-pods true\n/opt/aws/bin/cfn-signal --exit-code $? --stack ",
                kubelet_extra_args(spot)
            )),
            aws_stack_name(),
            json!(format!(" --resource {} --region ", asg_logical_id)),
            aws_region(),
        ],
    )
}
