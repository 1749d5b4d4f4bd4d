//! Intrinsic function helpers
//!
//! Values resolved by the provisioning engine at apply time. They are plain
//! `serde_json::Value`s so they can be dropped anywhere in a property tree.

use serde_json::{json, Value};

/// `{"Ref": id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [id, attribute]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::Base64": value}`
pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// `{"Fn::Join": [delimiter, parts]}`
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// `{"Fn::Select": [index, list]}`
pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

/// Availability zones of the deployment region
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

pub fn aws_region() -> Value {
    reference("AWS::Region")
}

pub fn aws_partition() -> Value {
    reference("AWS::Partition")
}

pub fn aws_stack_name() -> Value {
    reference("AWS::StackName")
}

/// ARN of an AWS-managed IAM policy in the current partition
pub fn managed_policy_arn(policy_name: &str) -> Value {
    join(
        "",
        vec![
            json!("arn:"),
            aws_partition(),
            json!(format!(":iam::aws:policy/{}", policy_name)),
        ],
    )
}

/// Trust policy letting a service principal assume a role
pub fn assume_role_policy(service: &str) -> Value {
    json!({
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service }
        }],
        "Version": "2012-10-17"
    })
}

/// Standard tag list entry
pub fn tag(key: Value, value: Value) -> Value {
    json!({ "Key": key, "Value": value })
}
