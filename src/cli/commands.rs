//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::{
    keys, parse_context_values, validate_environment, validate_settings, ConfigError, Settings,
    SettingsError, ValidationResult,
};
use crate::context::{merge_overrides, parse_override, ContextError, ContextFile};
use crate::network::{NetworkLookup, VpcLookup, VpcLookupResult};
use crate::stack::{synthesize, Environment, SynthError};
use crate::template::{Template, TemplateError};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Synthesis failed: {0}")]
    Synth(#[from] SynthError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recording a lookup requires an account and region (--account/--region)")]
    EnvironmentRequired,

    #[error("Validation failed with {0} error(s)")]
    ValidationFailed(usize),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

/// Parse all `-c key=value` overrides
pub fn parse_overrides(raw: &[String]) -> CommandResult<Vec<(String, String)>> {
    raw.iter()
        .map(|o| parse_override(o).map_err(CommandError::from))
        .collect()
}

// ============================================================================
// Context Commands (Pure business logic)
// ============================================================================

/// Info about a stored context value for display
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub key: String,
    pub value: String,
    /// Whether the key is one the synthesizer reads
    pub known: bool,
}

/// List stored context values
pub fn context_list(file: &ContextFile) -> Vec<ContextEntry> {
    file.context
        .iter()
        .map(|(key, value)| ContextEntry {
            key: key.clone(),
            value: value.clone(),
            known: keys::ALL.contains(&key.as_str()),
        })
        .collect()
}

pub fn context_get<'a>(file: &'a ContextFile, key: &str) -> CommandResult<&'a str> {
    Ok(file.get(key)?)
}

/// Store a value after checking the resulting context still parses
pub fn context_set(file: &mut ContextFile, key: &str, value: &str) -> CommandResult<Option<String>> {
    let candidate = merge_overrides(&file.context, &[(key.to_string(), value.to_string())]);
    parse_context_values(&candidate)?;
    Ok(file.set(key, value))
}

pub fn context_unset(file: &mut ContextFile, key: &str) -> CommandResult<String> {
    Ok(file.unset(key)?)
}

/// Info about a cached lookup for display
#[derive(Debug, Clone, PartialEq)]
pub struct LookupInfo {
    pub key: String,
    pub vpc_id: String,
    pub azs: usize,
    pub public_subnets: usize,
    pub private_subnets: usize,
}

pub fn lookup_list(file: &ContextFile) -> Vec<LookupInfo> {
    file.lookups
        .iter()
        .map(|(key, result)| LookupInfo {
            key: key.clone(),
            vpc_id: result.vpc_id.clone(),
            azs: result.availability_zones.len(),
            public_subnets: result.public_subnet_ids.len(),
            private_subnets: result.private_subnet_ids.len(),
        })
        .collect()
}

/// Store a lookup result under the key synthesis will look it up by.
/// Returns the key.
pub fn record_vpc(
    file: &mut ContextFile,
    lookup: &VpcLookup,
    env: &Environment,
    result: VpcLookupResult,
) -> CommandResult<String> {
    let (account, region) = match (env.account.as_deref(), env.region.as_deref()) {
        (Some(account), Some(region)) => (account, region),
        _ => return Err(CommandError::EnvironmentRequired),
    };
    let key = lookup.cache_key(account, region);
    file.record_lookup(key.clone(), result);
    Ok(key)
}

// ============================================================================
// Synthesis Commands
// ============================================================================

/// Synthesize the template
pub fn run_synth(
    settings: &Settings,
    env: &Environment,
    lookups: &dyn NetworkLookup,
) -> CommandResult<Template> {
    Ok(synthesize(settings, env, lookups)?)
}

/// Summary of a synthesis for display
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSummary {
    pub stack_name: String,
    pub environment: String,
    pub network: String,
    pub kubernetes_version: String,
    pub strategy: String,
    pub capacity: String,
    /// Resource type to count
    pub resources: BTreeMap<String, usize>,
    pub parameters: usize,
    pub outputs: usize,
}

/// Synthesize and summarize
pub fn plan(
    settings: &Settings,
    env: &Environment,
    lookups: &dyn NetworkLookup,
) -> CommandResult<PlanSummary> {
    let template = synthesize(settings, env, lookups)?;

    let mut resources = BTreeMap::new();
    for resource in template.resources.values() {
        *resources.entry(resource.resource_type.clone()).or_insert(0) += 1;
    }

    Ok(PlanSummary {
        stack_name: settings.stack_name.clone(),
        environment: env.uri(),
        network: settings.network.to_string(),
        kubernetes_version: settings.kubernetes_version.clone(),
        strategy: settings.capacity.to_string(),
        capacity: settings.capacity.describe(),
        resources,
        parameters: template.parameters.len(),
        outputs: template.outputs.len(),
    })
}

/// Run every validation check
pub fn run_validation(
    settings: &Settings,
    env: &Environment,
    lookups: &dyn NetworkLookup,
) -> ValidationResult {
    crate::config::validation::merge(
        validate_settings(settings),
        validate_environment(settings, env, lookups),
    )
}
