//! Worker node images
//!
//! Self-managed nodes boot the EKS-optimized Amazon Linux 2 image, resolved
//! at apply time from its public SSM parameter. Managed node groups only
//! need the matching AMI type.

use serde_json::Value;

use crate::template::intrinsics::reference;
use crate::template::{logical_id, Parameter, Template, TemplateError};

const SSM_IMAGE_PARAMETER_TYPE: &str = "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>";

/// Hardware class of an instance type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Standard,
    Gpu,
    Inferentia,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuArch {
    X86_64,
    Arm64,
}

fn family(instance_type: &str) -> &str {
    instance_type.split('.').next().unwrap_or(instance_type)
}

/// Classify an instance type such as `p3.2xlarge` or `inf1.xlarge`
pub fn node_type_for(instance_type: &str) -> NodeType {
    let family = family(instance_type);
    let mut chars = family.chars();
    if family.starts_with("inf") {
        return NodeType::Inferentia;
    }
    match (chars.next(), chars.next()) {
        (Some('p'), Some(d)) | (Some('g'), Some(d)) if d.is_ascii_digit() => NodeType::Gpu,
        _ => NodeType::Standard,
    }
}

/// Graviton families carry a `g` right after the generation digit
/// (`m6g`, `c6gn`, `r6gd`, `t4g`); `a1` is the first-generation Arm family.
pub fn cpu_arch_for(instance_type: &str) -> CpuArch {
    let family = family(instance_type);
    if family == "a1" {
        return CpuArch::Arm64;
    }
    let after_letters = family.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let after_digits = after_letters.trim_start_matches(|c: char| c.is_ascii_digit());
    if after_letters.len() != after_digits.len() && after_digits.starts_with('g') {
        CpuArch::Arm64
    } else {
        CpuArch::X86_64
    }
}

/// AMI type of a managed node group running `instance_type`
pub fn managed_ami_type(instance_type: &str) -> &'static str {
    match (node_type_for(instance_type), cpu_arch_for(instance_type)) {
        (NodeType::Gpu, _) | (NodeType::Inferentia, _) => "AL2_x86_64_GPU",
        (NodeType::Standard, CpuArch::Arm64) => "AL2_ARM_64",
        (NodeType::Standard, CpuArch::X86_64) => "AL2_x86_64",
    }
}

/// The EKS-optimized image for a Kubernetes version and instance type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EksOptimizedImage {
    pub kubernetes_version: String,
    pub node_type: NodeType,
    pub cpu_arch: CpuArch,
}

impl EksOptimizedImage {
    pub fn for_instance_type(kubernetes_version: &str, instance_type: &str) -> Self {
        Self {
            kubernetes_version: kubernetes_version.to_string(),
            node_type: node_type_for(instance_type),
            cpu_arch: cpu_arch_for(instance_type),
        }
    }

    /// Public SSM parameter publishing the recommended image id
    pub fn ssm_parameter_name(&self) -> String {
        let flavour = match (self.node_type, self.cpu_arch) {
            (NodeType::Gpu, _) | (NodeType::Inferentia, _) => "amazon-linux-2-gpu",
            (NodeType::Standard, CpuArch::Arm64) => "amazon-linux-2-arm64",
            (NodeType::Standard, CpuArch::X86_64) => "amazon-linux-2",
        };
        format!(
            "/aws/service/eks/optimized-ami/{}/{}/recommended/image_id",
            self.kubernetes_version, flavour
        )
    }

    /// Register the image parameter and return a reference to the image id
    pub fn image_id(&self, template: &mut Template) -> Result<Value, TemplateError> {
        let name = self.ssm_parameter_name();
        let id = logical_id(&["SsmParameterValue", name.as_str()]);
        template.add_parameter(
            id.clone(),
            Parameter {
                parameter_type: SSM_IMAGE_PARAMETER_TYPE.to_string(),
                default: Some(name),
                description: None,
            },
        )?;
        Ok(reference(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_types() {
        assert_eq!(node_type_for("m5.large"), NodeType::Standard);
        assert_eq!(node_type_for("p3.2xlarge"), NodeType::Gpu);
        assert_eq!(node_type_for("g4dn.xlarge"), NodeType::Gpu);
        assert_eq!(node_type_for("inf1.xlarge"), NodeType::Inferentia);
        assert_eq!(node_type_for("t3.medium"), NodeType::Standard);
    }

    #[test]
    fn test_cpu_arch() {
        assert_eq!(cpu_arch_for("m6g.large"), CpuArch::Arm64);
        assert_eq!(cpu_arch_for("c6gn.16xlarge"), CpuArch::Arm64);
        assert_eq!(cpu_arch_for("t4g.micro"), CpuArch::Arm64);
        assert_eq!(cpu_arch_for("a1.large"), CpuArch::Arm64);
        assert_eq!(cpu_arch_for("g4dn.xlarge"), CpuArch::X86_64);
        assert_eq!(cpu_arch_for("m5.large"), CpuArch::X86_64);
    }

    #[test]
    fn test_managed_ami_type() {
        assert_eq!(managed_ami_type("m5.large"), "AL2_x86_64");
        assert_eq!(managed_ami_type("m6g.large"), "AL2_ARM_64");
        assert_eq!(managed_ami_type("p3.2xlarge"), "AL2_x86_64_GPU");
    }

    #[test]
    fn test_ssm_parameter_name() {
        let image = EksOptimizedImage::for_instance_type("1.18", "m5.large");
        assert_eq!(
            image.ssm_parameter_name(),
            "/aws/service/eks/optimized-ami/1.18/amazon-linux-2/recommended/image_id"
        );
        let arm = EksOptimizedImage::for_instance_type("1.18", "m6g.large");
        assert!(arm.ssm_parameter_name().contains("amazon-linux-2-arm64"));
    }

    #[test]
    fn test_image_parameter_is_shared() {
        let mut template = Template::new(None);
        let image = EksOptimizedImage::for_instance_type("1.18", "m5.large");
        let first = image.image_id(&mut template).unwrap();
        let second = image.image_id(&mut template).unwrap();
        assert_eq!(first, second);
        assert_eq!(template.parameters.len(), 1);
    }
}
