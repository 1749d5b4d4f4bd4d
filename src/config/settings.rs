//! Typed synthesis settings
//!
//! The context bag is loosely typed (every value is a string). This module
//! turns it into [`Settings`] once, with every default enumerated here, and
//! performs the capacity-strategy selection at that boundary.

use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::cluster::capacity::{select_capacity, CapacityInputs, CapacityStrategy};
use crate::network::{resolve_network, NetworkRef};

/// Context keys understood by the synthesizer
pub mod keys {
    pub const STACK_NAME: &str = "stackName";
    pub const USE_DEFAULT_VPC: &str = "use_default_vpc";
    pub const USE_VPC_ID: &str = "use_vpc_id";
    pub const SPOT_ONLY: &str = "spot_only";
    pub const SPOT_STRATEGY: &str = "spot_strategy";
    pub const NODE_GROUP: &str = "node_group";
    pub const INSTANCE_TYPE: &str = "instance_type";
    pub const DEFAULT_CAPACITY: &str = "default_capacity";
    pub const MAX_CAPACITY: &str = "max_capacity";
    pub const SPOT_PRICE: &str = "spot_price";
    pub const KUBERNETES_VERSION: &str = "kubernetes_version";
    pub const SPOT_INTERRUPT_HANDLER: &str = "spot_interrupt_handler";

    pub const ALL: &[&str] = &[
        STACK_NAME,
        USE_DEFAULT_VPC,
        USE_VPC_ID,
        SPOT_ONLY,
        SPOT_STRATEGY,
        NODE_GROUP,
        INSTANCE_TYPE,
        DEFAULT_CAPACITY,
        MAX_CAPACITY,
        SPOT_PRICE,
        KUBERNETES_VERSION,
        SPOT_INTERRUPT_HANDLER,
    ];
}

pub const DEFAULT_STACK_NAME: &str = "eks-synth-demo-stack";
pub const DEFAULT_INSTANCE_TYPE: &str = "m5.large";
pub const DEFAULT_CAPACITY: u32 = 2;
/// Spot price put on the transient launch configuration of the spot
/// group. It only marks the nodes as spot; the launch template replacing
/// the configuration carries no bid unless `spot_price` is set.
pub const PLACEHOLDER_SPOT_PRICE: &str = "0.1094";
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.18";

/// Instance types tried in order by a spot managed node group when no
/// instance type is configured
pub const SPOT_FALLBACK_INSTANCE_TYPES: &[&str] =
    &["m5.large", "m5a.large", "m5d.large", "m5ad.large"];

/// Errors raised while building settings from the context bag
#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("Invalid boolean for '{key}': '{value}' (expected 0/1/true/false)")]
    InvalidFlag { key: String, value: String },

    #[error("Invalid integer for '{key}': '{value}'")]
    InvalidInteger { key: String, value: String },

    #[error("Invalid instance type: '{0}'")]
    InvalidInstanceType(String),

    #[error("Invalid Kubernetes version: '{0}' (expected 1.<minor>)")]
    InvalidKubernetesVersion(String),

    #[error("Invalid spot price: '{0}'")]
    InvalidSpotPrice(String),

    #[error("Invalid value for '{key}': '{value}' (expected one of: {expected})")]
    InvalidChoice {
        key: String,
        value: String,
        expected: String,
    },

    #[error("Invalid stack name: '{0}'")]
    InvalidStackName(String),

    #[error("max_capacity ({max}) is lower than default_capacity ({min})")]
    CapacityRange { min: u32, max: u32 },
}

/// How spot capacity is provisioned when `spot_only` is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpotStrategy {
    /// Self-managed autoscaling group patched with a spot launch template
    #[default]
    LaunchTemplate,
    /// Managed node group with native spot capacity
    ManagedNodeGroup,
}

impl SpotStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotStrategy::LaunchTemplate => "launch-template",
            SpotStrategy::ManagedNodeGroup => "managed-nodegroup",
        }
    }
}

/// Which node group flavour carries on-demand capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeGroupKind {
    #[default]
    SelfManaged,
    Managed,
}

impl NodeGroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeGroupKind::SelfManaged => "self-managed",
            NodeGroupKind::Managed => "managed",
        }
    }
}

/// Strongly-typed view of the context bag, before strategy selection
#[derive(Debug, Clone, PartialEq)]
pub struct ContextValues {
    pub stack_name: String,
    pub use_default_vpc: bool,
    pub use_vpc_id: Option<String>,
    pub spot_only: bool,
    pub spot_strategy: SpotStrategy,
    pub node_group: NodeGroupKind,
    pub instance_type: Option<String>,
    pub default_capacity: u32,
    pub max_capacity: Option<u32>,
    /// Explicit spot bid ceiling; unset caps spot requests at the on-demand price
    pub spot_price: Option<String>,
    pub kubernetes_version: String,
    pub spot_interrupt_handler: bool,
}

impl Default for ContextValues {
    fn default() -> Self {
        Self {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            use_default_vpc: false,
            use_vpc_id: None,
            spot_only: false,
            spot_strategy: SpotStrategy::default(),
            node_group: NodeGroupKind::default(),
            instance_type: None,
            default_capacity: DEFAULT_CAPACITY,
            max_capacity: None,
            spot_price: None,
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            spot_interrupt_handler: true,
        }
    }
}

/// Settings for one synthesis run. Exactly one capacity strategy is active.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub stack_name: String,
    pub network: NetworkRef,
    pub kubernetes_version: String,
    pub capacity: CapacityStrategy,
    pub spot_interrupt_handler: bool,
    /// The parsed context values the settings were derived from
    pub values: ContextValues,
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Parse a 0/1 style flag
pub fn parse_flag(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(SettingsError::InvalidFlag {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, SettingsError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| SettingsError::InvalidInteger {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Validate a single instance type such as `m5.large` or `c6gn.16xlarge`
pub fn parse_instance_type(value: &str) -> Result<String, SettingsError> {
    let trimmed = value.trim();
    let pattern = Regex::new(r"^[a-z][a-z0-9-]*\.[a-z0-9]+$")
        .map_err(|_| SettingsError::InvalidInstanceType(value.to_string()))?;
    if pattern.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(SettingsError::InvalidInstanceType(value.to_string()))
    }
}

/// Validate a Kubernetes version of the form `1.<minor>`
pub fn parse_kubernetes_version(value: &str) -> Result<String, SettingsError> {
    let trimmed = value.trim();
    let pattern = Regex::new(r"^1\.[0-9]{1,2}$")
        .map_err(|_| SettingsError::InvalidKubernetesVersion(value.to_string()))?;
    if pattern.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(SettingsError::InvalidKubernetesVersion(value.to_string()))
    }
}

fn parse_spot_price(value: &str) -> Result<String, SettingsError> {
    let trimmed = value.trim();
    match trimmed.parse::<f64>() {
        Ok(price) if price > 0.0 && price.is_finite() => Ok(trimmed.to_string()),
        _ => Err(SettingsError::InvalidSpotPrice(value.to_string())),
    }
}

fn parse_stack_name(value: &str) -> Result<String, SettingsError> {
    let trimmed = value.trim();
    let pattern = Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$")
        .map_err(|_| SettingsError::InvalidStackName(value.to_string()))?;
    if pattern.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(SettingsError::InvalidStackName(value.to_string()))
    }
}

fn parse_spot_strategy(value: &str) -> Result<SpotStrategy, SettingsError> {
    match value.trim() {
        "launch-template" | "legacy" => Ok(SpotStrategy::LaunchTemplate),
        "managed-nodegroup" | "managed" => Ok(SpotStrategy::ManagedNodeGroup),
        other => Err(SettingsError::InvalidChoice {
            key: keys::SPOT_STRATEGY.to_string(),
            value: other.to_string(),
            expected: "launch-template, managed-nodegroup".to_string(),
        }),
    }
}

fn parse_node_group(value: &str) -> Result<NodeGroupKind, SettingsError> {
    match value.trim() {
        "self-managed" => Ok(NodeGroupKind::SelfManaged),
        "managed" => Ok(NodeGroupKind::Managed),
        other => Err(SettingsError::InvalidChoice {
            key: keys::NODE_GROUP.to_string(),
            value: other.to_string(),
            expected: "self-managed, managed".to_string(),
        }),
    }
}

/// Treat empty strings as unset, the way an absent context value behaves
fn non_empty<'a>(raw: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    raw.get(key).map(|v| v.as_str()).filter(|v| !v.trim().is_empty())
}

/// Parse the raw context bag into typed values, applying defaults
pub fn parse_context_values(
    raw: &BTreeMap<String, String>,
) -> Result<ContextValues, SettingsError> {
    for key in raw.keys() {
        if !keys::ALL.contains(&key.as_str()) {
            debug!("Ignoring unknown context key '{}'", key);
        }
    }

    let mut values = ContextValues::default();

    if let Some(v) = non_empty(raw, keys::STACK_NAME) {
        values.stack_name = parse_stack_name(v)?;
    }
    if let Some(v) = raw.get(keys::USE_DEFAULT_VPC) {
        values.use_default_vpc = parse_flag(keys::USE_DEFAULT_VPC, v)?;
    }
    values.use_vpc_id = non_empty(raw, keys::USE_VPC_ID).map(|v| v.trim().to_string());
    if let Some(v) = raw.get(keys::SPOT_ONLY) {
        values.spot_only = parse_flag(keys::SPOT_ONLY, v)?;
    }
    if let Some(v) = non_empty(raw, keys::SPOT_STRATEGY) {
        values.spot_strategy = parse_spot_strategy(v)?;
    }
    if let Some(v) = non_empty(raw, keys::NODE_GROUP) {
        values.node_group = parse_node_group(v)?;
    }
    if let Some(v) = non_empty(raw, keys::INSTANCE_TYPE) {
        values.instance_type = Some(parse_instance_type(v)?);
    }
    if let Some(v) = non_empty(raw, keys::DEFAULT_CAPACITY) {
        values.default_capacity = parse_u32(keys::DEFAULT_CAPACITY, v)?;
    }
    if let Some(v) = non_empty(raw, keys::MAX_CAPACITY) {
        let max = parse_u32(keys::MAX_CAPACITY, v)?;
        if max < values.default_capacity {
            return Err(SettingsError::CapacityRange {
                min: values.default_capacity,
                max,
            });
        }
        values.max_capacity = Some(max);
    }
    if let Some(v) = non_empty(raw, keys::SPOT_PRICE) {
        values.spot_price = Some(parse_spot_price(v)?);
    }
    if let Some(v) = non_empty(raw, keys::KUBERNETES_VERSION) {
        values.kubernetes_version = parse_kubernetes_version(v)?;
    }
    if let Some(v) = raw.get(keys::SPOT_INTERRUPT_HANDLER) {
        values.spot_interrupt_handler = parse_flag(keys::SPOT_INTERRUPT_HANDLER, v)?;
    }

    Ok(values)
}

impl Settings {
    /// Build settings from the raw context bag: parse, then resolve the
    /// network reference and select the capacity strategy.
    pub fn from_context(raw: &BTreeMap<String, String>) -> Result<Self, SettingsError> {
        let values = parse_context_values(raw)?;
        Ok(Self::from_values(values))
    }

    /// Build settings from already-parsed values
    pub fn from_values(values: ContextValues) -> Self {
        let network = resolve_network(values.use_default_vpc, values.use_vpc_id.as_deref());
        let capacity = select_capacity(&CapacityInputs {
            spot_only: values.spot_only,
            spot_strategy: values.spot_strategy,
            node_group: values.node_group,
            instance_type: values.instance_type.as_deref(),
            desired: values.default_capacity,
            max: values.max_capacity,
            spot_price: values.spot_price.as_deref(),
        });

        Self {
            stack_name: values.stack_name.clone(),
            network,
            kubernetes_version: values.kubernetes_version.clone(),
            capacity,
            spot_interrupt_handler: values.spot_interrupt_handler,
            values,
        }
    }
}
