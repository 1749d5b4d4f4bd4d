//! Network resolution
//!
//! Decides which VPC hosts the cluster and turns that decision into template
//! values. Precedence, evaluated in order:
//!
//! 1. `use_default_vpc=1` - look up the account's default VPC
//! 2. `use_vpc_id=<id>` - look up an existing VPC by id
//! 3. otherwise - allocate a new VPC (3 AZs, 1 NAT gateway)
//!
//! Lookups are answered from results cached in the context file; there is
//! no fallback or retry, a missing answer aborts synthesis.

pub mod vpc;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::stack::Environment;
use crate::template::{ConstructPath, Template, TemplateError};

/// Availability zones spanned by a freshly allocated VPC
pub const DEFAULT_MAX_AZS: u32 = 3;

/// NAT gateways in a freshly allocated VPC
pub const DEFAULT_NAT_GATEWAYS: u32 = 1;

/// Errors raised while materializing a network reference
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("VPC lookup ({0}) requires an explicit account and region")]
    EnvironmentRequired(VpcLookup),

    #[error("No cached lookup result for '{0}' (record one with `context record-vpc`)")]
    LookupNotCached(String),

    #[error("Looked-up VPC '{0}' has no subnets")]
    NoSubnets(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// How an existing VPC is looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpcLookup {
    /// The account's default VPC
    Default,
    /// A VPC by explicit id
    ById(String),
}

impl VpcLookup {
    /// Key under which the lookup result is cached in the context file
    pub fn cache_key(&self, account: &str, region: &str) -> String {
        let filter = match self {
            VpcLookup::Default => "filter.isDefault=true".to_string(),
            VpcLookup::ById(id) => format!("filter.vpc-id={}", id),
        };
        format!(
            "vpc-provider:account={}:region={}:{}",
            account, region, filter
        )
    }
}

impl fmt::Display for VpcLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpcLookup::Default => write!(f, "default VPC"),
            VpcLookup::ById(id) => write!(f, "VPC {}", id),
        }
    }
}

/// Which network hosts the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkRef {
    /// Reuse an existing VPC
    Lookup(VpcLookup),
    /// Allocate a new VPC
    Allocate { max_azs: u32, nat_gateways: u32 },
}

impl fmt::Display for NetworkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkRef::Lookup(lookup) => write!(f, "lookup {}", lookup),
            NetworkRef::Allocate {
                max_azs,
                nat_gateways,
            } => write!(
                f,
                "new VPC ({} AZs, {} NAT gateway{})",
                max_azs,
                nat_gateways,
                if *nat_gateways == 1 { "" } else { "s" }
            ),
        }
    }
}

/// A cached answer to a VPC lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcLookupResult {
    pub vpc_id: String,
    #[serde(default)]
    pub availability_zones: Vec<String>,
    #[serde(default)]
    pub public_subnet_ids: Vec<String>,
    #[serde(default)]
    pub private_subnet_ids: Vec<String>,
}

/// Source of VPC lookup answers
pub trait NetworkLookup {
    fn lookup_vpc(&self, cache_key: &str) -> Option<&VpcLookupResult>;
}

impl NetworkLookup for BTreeMap<String, VpcLookupResult> {
    fn lookup_vpc(&self, cache_key: &str) -> Option<&VpcLookupResult> {
        self.get(cache_key)
    }
}

/// The network the cluster is placed into, as template values
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNetwork {
    pub vpc_id: Value,
    pub public_subnets: Vec<Value>,
    pub private_subnets: Vec<Value>,
}

impl ResolvedNetwork {
    /// Every subnet, public first
    pub fn all_subnets(&self) -> Vec<Value> {
        self.public_subnets
            .iter()
            .chain(self.private_subnets.iter())
            .cloned()
            .collect()
    }

    /// Subnets worker nodes are launched into: private when available
    pub fn worker_subnets(&self) -> Vec<Value> {
        if self.private_subnets.is_empty() {
            self.public_subnets.clone()
        } else {
            self.private_subnets.clone()
        }
    }
}

// ============================================================================
// SBIO: Pure resolution (no I/O)
// ============================================================================

/// Resolve the network reference from the two network context flags
pub fn resolve_network(use_default_vpc: bool, use_vpc_id: Option<&str>) -> NetworkRef {
    if use_default_vpc {
        return NetworkRef::Lookup(VpcLookup::Default);
    }
    match use_vpc_id {
        Some(id) => NetworkRef::Lookup(VpcLookup::ById(id.to_string())),
        None => NetworkRef::Allocate {
            max_azs: DEFAULT_MAX_AZS,
            nat_gateways: DEFAULT_NAT_GATEWAYS,
        },
    }
}

/// Turn a network reference into template values, adding VPC resources to
/// the template when a new network is allocated.
pub fn materialize_network(
    network: &NetworkRef,
    env: &Environment,
    lookups: &dyn NetworkLookup,
    stack_name: &str,
    template: &mut Template,
) -> Result<ResolvedNetwork, NetworkError> {
    match network {
        NetworkRef::Lookup(lookup) => {
            let (account, region) = match (env.account.as_deref(), env.region.as_deref()) {
                (Some(account), Some(region)) => (account, region),
                _ => return Err(NetworkError::EnvironmentRequired(lookup.clone())),
            };
            let key = lookup.cache_key(account, region);
            let result = lookups
                .lookup_vpc(&key)
                .ok_or_else(|| NetworkError::LookupNotCached(key.clone()))?;
            info!("Resolved {} to {}", lookup, result.vpc_id);
            from_lookup(result)
        }
        NetworkRef::Allocate {
            max_azs,
            nat_gateways,
        } => {
            let path = ConstructPath::root("Vpc");
            let resolved = vpc::allocate(template, &path, stack_name, *max_azs, *nat_gateways)?;
            info!(
                "Allocated new VPC across {} AZs with {} NAT gateway(s)",
                max_azs, nat_gateways
            );
            Ok(resolved)
        }
    }
}

fn from_lookup(result: &VpcLookupResult) -> Result<ResolvedNetwork, NetworkError> {
    if result.public_subnet_ids.is_empty() && result.private_subnet_ids.is_empty() {
        return Err(NetworkError::NoSubnets(result.vpc_id.clone()));
    }
    if result.private_subnet_ids.is_empty() {
        warn!(
            "VPC {} has no private subnets; worker nodes will be placed in public subnets",
            result.vpc_id
        );
    }

    Ok(ResolvedNetwork {
        vpc_id: Value::String(result.vpc_id.clone()),
        public_subnets: literal_ids(&result.public_subnet_ids),
        private_subnets: literal_ids(&result.private_subnet_ids),
    })
}

fn literal_ids(ids: &[String]) -> Vec<Value> {
    ids.iter().map(|id| Value::String(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new(Some("123456789012".to_string()), Some("us-west-2".to_string()))
    }

    fn cached(key: &str) -> BTreeMap<String, VpcLookupResult> {
        let mut lookups = BTreeMap::new();
        lookups.insert(
            key.to_string(),
            VpcLookupResult {
                vpc_id: "vpc-123".to_string(),
                availability_zones: vec!["us-west-2a".to_string(), "us-west-2b".to_string()],
                public_subnet_ids: vec!["subnet-pub-a".to_string(), "subnet-pub-b".to_string()],
                private_subnet_ids: vec!["subnet-priv-a".to_string()],
            },
        );
        lookups
    }

    #[test]
    fn test_default_vpc_wins_over_vpc_id() {
        assert_eq!(
            resolve_network(true, Some("vpc-123")),
            NetworkRef::Lookup(VpcLookup::Default)
        );
    }

    #[test]
    fn test_lookup_by_id() {
        assert_eq!(
            resolve_network(false, Some("vpc-123")),
            NetworkRef::Lookup(VpcLookup::ById("vpc-123".to_string()))
        );
    }

    #[test]
    fn test_allocate_when_neither_flag_set() {
        assert_eq!(
            resolve_network(false, None),
            NetworkRef::Allocate {
                max_azs: 3,
                nat_gateways: 1
            }
        );
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(
            VpcLookup::Default.cache_key("1", "eu-west-1"),
            "vpc-provider:account=1:region=eu-west-1:filter.isDefault=true"
        );
        assert_eq!(
            VpcLookup::ById("vpc-9".to_string()).cache_key("1", "eu-west-1"),
            "vpc-provider:account=1:region=eu-west-1:filter.vpc-id=vpc-9"
        );
    }

    #[test]
    fn test_materialize_lookup_uses_cached_ids() {
        let lookup = VpcLookup::ById("vpc-123".to_string());
        let lookups = cached(&lookup.cache_key("123456789012", "us-west-2"));
        let mut template = Template::new(None);

        let resolved = materialize_network(
            &NetworkRef::Lookup(lookup),
            &env(),
            &lookups,
            "stack",
            &mut template,
        )
        .unwrap();

        assert_eq!(resolved.vpc_id, Value::String("vpc-123".to_string()));
        assert_eq!(resolved.all_subnets().len(), 3);
        assert_eq!(resolved.worker_subnets(), vec![Value::String("subnet-priv-a".to_string())]);
        assert!(template.resources.is_empty());
    }

    #[test]
    fn test_materialize_lookup_without_cache_fails() {
        let mut template = Template::new(None);
        let result = materialize_network(
            &NetworkRef::Lookup(VpcLookup::Default),
            &env(),
            &BTreeMap::<String, VpcLookupResult>::new(),
            "stack",
            &mut template,
        );
        assert!(matches!(result, Err(NetworkError::LookupNotCached(_))));
    }

    #[test]
    fn test_materialize_lookup_without_environment_fails() {
        let mut template = Template::new(None);
        let result = materialize_network(
            &NetworkRef::Lookup(VpcLookup::Default),
            &Environment::default(),
            &BTreeMap::<String, VpcLookupResult>::new(),
            "stack",
            &mut template,
        );
        assert!(matches!(
            result,
            Err(NetworkError::EnvironmentRequired(VpcLookup::Default))
        ));
    }

    #[test]
    fn test_public_only_vpc_places_workers_in_public_subnets() {
        let result = VpcLookupResult {
            vpc_id: "vpc-default".to_string(),
            availability_zones: vec![],
            public_subnet_ids: vec!["subnet-a".to_string()],
            private_subnet_ids: vec![],
        };
        let resolved = from_lookup(&result).unwrap();
        assert_eq!(resolved.worker_subnets(), vec![Value::String("subnet-a".to_string())]);
    }

    #[test]
    fn test_lookup_without_subnets_fails() {
        let result = VpcLookupResult {
            vpc_id: "vpc-empty".to_string(),
            availability_zones: vec![],
            public_subnet_ids: vec![],
            private_subnet_ids: vec![],
        };
        assert!(matches!(from_lookup(&result), Err(NetworkError::NoSubnets(_))));
    }
}
