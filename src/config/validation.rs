//! Settings validation hints
//!
//! Settings that parse can still be surprising: values that are ignored by
//! the selected capacity strategy, conflicting network flags, or lookups
//! that will fail for lack of a cached answer. These checks report them
//! without aborting; `validate` exits non-zero on errors and `synth` logs
//! warnings.

use serde::{Deserialize, Serialize};

use super::settings::{keys, NodeGroupKind, Settings};
use crate::cluster::ami::{cpu_arch_for, node_type_for, CpuArch, NodeType};
use crate::cluster::CapacityStrategy;
use crate::network::{NetworkLookup, NetworkRef};
use crate::stack::Environment;

/// Validation result with severity levels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ValidationSeverity {
    /// Informational hint
    Info,
    /// Warning - synthesis works but a value has no effect
    Warning,
    /// Error - synthesis will fail
    Error,
}

/// A single validation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub severity: ValidationSeverity,
    pub code: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Validation result containing all messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub messages: Vec<ValidationMessage>,
    pub passed: bool,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            passed: true,
        }
    }

    pub fn add(&mut self, msg: ValidationMessage) {
        if msg.severity == ValidationSeverity::Error {
            self.passed = false;
        }
        self.messages.push(msg);
    }

    pub fn info(mut self, code: &str, message: &str) -> Self {
        self.add(ValidationMessage {
            severity: ValidationSeverity::Info,
            code: code.to_string(),
            message: message.to_string(),
            suggestion: None,
        });
        self
    }

    pub fn warning(mut self, code: &str, message: &str, suggestion: Option<&str>) -> Self {
        self.add(ValidationMessage {
            severity: ValidationSeverity::Warning,
            code: code.to_string(),
            message: message.to_string(),
            suggestion: suggestion.map(String::from),
        });
        self
    }

    pub fn error(mut self, code: &str, message: &str, suggestion: Option<&str>) -> Self {
        self.add(ValidationMessage {
            severity: ValidationSeverity::Error,
            code: code.to_string(),
            message: message.to_string(),
            suggestion: suggestion.map(String::from),
        });
        self
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == ValidationSeverity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == ValidationSeverity::Warning)
    }
}

// ============================================================================
// SBIO: Pure validation logic (no I/O)
// ============================================================================

/// Check settings for values the selected strategy ignores or combinations
/// that behave unexpectedly
pub fn validate_settings(settings: &Settings) -> ValidationResult {
    let mut result = ValidationResult::new();
    let values = &settings.values;

    if values.use_default_vpc && values.use_vpc_id.is_some() {
        result = result.warning(
            "NET001",
            "use_default_vpc=1 takes precedence; use_vpc_id is ignored",
            Some("Unset one of use_default_vpc or use_vpc_id"),
        );
    }

    if values.spot_only && values.node_group == NodeGroupKind::Managed {
        result = result.warning(
            "CAP001",
            "node_group is ignored when spot_only=1; spot_strategy selects the node group kind",
            Some("Set spot_strategy=managed-nodegroup for a managed spot node group"),
        );
    }

    match settings.capacity {
        CapacityStrategy::FixedOnDemand { count, .. } => {
            if count == 0 {
                result = result.info("CAP002", "default_capacity=0: no worker nodes are generated");
            }
            if values.max_capacity.is_some() {
                result = result.warning(
                    "CAP003",
                    "max_capacity is ignored by fixed on-demand capacity",
                    Some("Use node_group=managed or spot_only=1 for a scalable group"),
                );
            }
        }
        CapacityStrategy::SpotAutoScalingGroup { .. } => {
            if !settings.spot_interrupt_handler {
                result = result.warning(
                    "CAP004",
                    "Spot nodes without the interruption handler are not drained before reclaim",
                    Some("Set spot_interrupt_handler=1"),
                );
            }
        }
        CapacityStrategy::ManagedNodeGroup { .. } => {}
    }

    let price_used = matches!(settings.capacity, CapacityStrategy::SpotAutoScalingGroup { .. });
    if !price_used && values.spot_price.is_some() {
        result = result.warning(
            "CAP005",
            &format!("{} only applies to the launch-template spot strategy", keys::SPOT_PRICE),
            None,
        );
    }

    if let Some(ref instance_type) = values.instance_type {
        match (node_type_for(instance_type), cpu_arch_for(instance_type)) {
            (NodeType::Gpu, _) | (NodeType::Inferentia, _) => {
                result = result.info(
                    "AMI001",
                    &format!("{} uses the GPU-accelerated EKS-optimized image", instance_type),
                );
            }
            (NodeType::Standard, CpuArch::Arm64) => {
                result = result.info(
                    "AMI002",
                    &format!("{} uses the arm64 EKS-optimized image", instance_type),
                );
            }
            (NodeType::Standard, CpuArch::X86_64) => {}
        }
    }

    result
}

/// Check that a network lookup can be answered
pub fn validate_environment(
    settings: &Settings,
    env: &Environment,
    lookups: &dyn NetworkLookup,
) -> ValidationResult {
    let result = ValidationResult::new();
    let lookup = match settings.network {
        NetworkRef::Lookup(ref lookup) => lookup,
        NetworkRef::Allocate { .. } => return result,
    };

    let (account, region) = match (env.account.as_deref(), env.region.as_deref()) {
        (Some(account), Some(region)) => (account, region),
        _ => {
            return result.error(
                "ENV001",
                &format!("Looking up the {} requires an account and region", lookup),
                Some("Pass --account and --region or set AWS_ACCOUNT_ID and AWS_REGION"),
            )
        }
    };

    let key = lookup.cache_key(account, region);
    if lookups.lookup_vpc(&key).is_none() {
        return result.error(
            "ENV002",
            &format!("No cached lookup result for '{}'", key),
            Some("Record one with `eks-synth context record-vpc`"),
        );
    }
    result
}

/// Combine two results
pub fn merge(mut first: ValidationResult, second: ValidationResult) -> ValidationResult {
    for message in second.messages {
        first.add(message);
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::VpcLookupResult;
    use std::collections::BTreeMap;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let raw: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_context(&raw).unwrap()
    }

    fn codes(result: &ValidationResult) -> Vec<&str> {
        result.messages.iter().map(|m| m.code.as_str()).collect()
    }

    #[test]
    fn test_defaults_pass_cleanly() {
        let result = validate_settings(&settings(&[]));
        assert!(result.passed);
        assert!(result.messages.is_empty());
    }

    #[test]
    fn test_conflicting_network_flags() {
        let result = validate_settings(&settings(&[("use_default_vpc", "1"), ("use_vpc_id", "vpc-1")]));
        assert!(result.has_warnings());
        assert!(codes(&result).contains(&"NET001"));
    }

    #[test]
    fn test_ignored_values() {
        let result = validate_settings(&settings(&[
            ("max_capacity", "5"),
            ("spot_price", "0.2"),
        ]));
        assert_eq!(codes(&result), vec!["CAP003", "CAP005"]);
        assert!(result.passed);
    }

    #[test]
    fn test_spot_without_interrupt_handler() {
        let result = validate_settings(&settings(&[
            ("spot_only", "1"),
            ("spot_interrupt_handler", "0"),
        ]));
        assert!(codes(&result).contains(&"CAP004"));
    }

    #[test]
    fn test_zero_capacity_info() {
        let result = validate_settings(&settings(&[("default_capacity", "0")]));
        assert_eq!(result.messages[0].severity, ValidationSeverity::Info);
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_gpu_instance_hint() {
        let result = validate_settings(&settings(&[("instance_type", "p3.2xlarge")]));
        assert_eq!(codes(&result), vec!["AMI001"]);
    }

    #[test]
    fn test_lookup_requires_environment() {
        let lookups: BTreeMap<String, VpcLookupResult> = BTreeMap::new();
        let result = validate_environment(
            &settings(&[("use_default_vpc", "1")]),
            &Environment::default(),
            &lookups,
        );
        assert!(!result.passed);
        assert_eq!(codes(&result), vec!["ENV001"]);
    }

    #[test]
    fn test_lookup_cache_miss() {
        let lookups: BTreeMap<String, VpcLookupResult> = BTreeMap::new();
        let env = Environment::new(Some("123456789012".to_string()), Some("us-west-2".to_string()));
        let result = validate_environment(&settings(&[("use_vpc_id", "vpc-9")]), &env, &lookups);
        assert!(result.has_errors());
        assert!(result.messages[0].message.contains("filter.vpc-id=vpc-9"));
    }

    #[test]
    fn test_allocated_network_needs_no_environment() {
        let lookups: BTreeMap<String, VpcLookupResult> = BTreeMap::new();
        let result = validate_environment(&settings(&[]), &Environment::default(), &lookups);
        assert!(result.passed);
    }

    #[test]
    fn test_merge() {
        let a = ValidationResult::new().info("A", "a");
        let b = ValidationResult::new().error("B", "b", None);
        let merged = merge(a, b);
        assert_eq!(merged.messages.len(), 2);
        assert!(!merged.passed);
    }
}
