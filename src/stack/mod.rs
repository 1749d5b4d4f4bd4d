//! Stack synthesis and cloud assembly output

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::{add_eks_cluster, ClusterError};
use crate::config::{Settings, SettingsError};
use crate::network::{materialize_network, NetworkError, NetworkLookup};
use crate::template::{Template, TemplateError};

/// Cloud assembly schema version written to `manifest.json`
pub const ASSEMBLY_VERSION: &str = "9.0.0";

/// Artifact type of a synthesized stack
pub const STACK_ARTIFACT_TYPE: &str = "aws:cloudformation:stack";

pub const ACCOUNT_ENV: &str = "AWS_ACCOUNT_ID";
pub const REGION_ENV: &str = "AWS_REGION";
pub const DEFAULT_REGION_ENV: &str = "AWS_DEFAULT_REGION";

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Target account and region of the stack. Either may be unknown, in which
/// case the stack is environment-agnostic and cannot perform lookups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn new(account: Option<String>, region: Option<String>) -> Self {
        Self { account, region }
    }

    /// Fill whatever was not given explicitly from the process environment
    pub fn with_env_fallback(account: Option<String>, region: Option<String>) -> Self {
        let account = account.or_else(|| non_empty_var(ACCOUNT_ENV));
        let region = region
            .or_else(|| non_empty_var(REGION_ENV))
            .or_else(|| non_empty_var(DEFAULT_REGION_ENV));
        Self { account, region }
    }

    /// `aws://<account>/<region>` with placeholders for unknown parts
    pub fn uri(&self) -> String {
        format!(
            "aws://{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region")
        )
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ============================================================================
// SBIO: Pure synthesis (no I/O)
// ============================================================================

/// Build the complete template for one stack
pub fn synthesize(
    settings: &Settings,
    env: &Environment,
    lookups: &dyn NetworkLookup,
) -> Result<Template, SynthError> {
    info!(
        "Synthesizing stack {} ({}, network: {})",
        settings.stack_name,
        env.uri(),
        settings.network
    );

    let mut template = Template::new(Some(format!(
        "EKS cluster {} with {} capacity",
        settings.stack_name, settings.capacity
    )));

    let network = materialize_network(
        &settings.network,
        env,
        lookups,
        &settings.stack_name,
        &mut template,
    )?;
    add_eks_cluster(&mut template, settings, &network)?;

    debug!("Synthesized {} resources", template.resources.len());
    Ok(template)
}

/// `manifest.json` of a cloud assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub version: String,
    pub artifacts: BTreeMap<String, Artifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub environment: String,
    pub properties: ArtifactProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactProperties {
    pub template_file: String,
}

/// File name the stack template is written under
pub fn template_file_name(stack_name: &str) -> String {
    format!("{}.template.json", stack_name)
}

/// Describe a single-stack assembly
pub fn build_manifest(stack_name: &str, env: &Environment) -> AssemblyManifest {
    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        stack_name.to_string(),
        Artifact {
            artifact_type: STACK_ARTIFACT_TYPE.to_string(),
            environment: env.uri(),
            properties: ArtifactProperties {
                template_file: template_file_name(stack_name),
            },
        },
    );
    AssemblyManifest {
        version: ASSEMBLY_VERSION.to_string(),
        artifacts,
    }
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Write the template and manifest into `dir`. Returns the template path.
pub fn write_assembly(
    dir: &Path,
    stack_name: &str,
    env: &Environment,
    template: &Template,
) -> Result<PathBuf, SynthError> {
    std::fs::create_dir_all(dir)?;

    let template_path = dir.join(template_file_name(stack_name));
    std::fs::write(&template_path, template.to_json()?)?;

    let manifest = serde_json::to_string_pretty(&build_manifest(stack_name, env))?;
    std::fs::write(dir.join("manifest.json"), manifest)?;

    info!("Wrote {}", template_path.display());
    Ok(template_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_uri() {
        let env = Environment::new(Some("123456789012".to_string()), Some("us-west-2".to_string()));
        assert_eq!(env.uri(), "aws://123456789012/us-west-2");

        let agnostic = Environment::default();
        assert_eq!(agnostic.uri(), "aws://unknown-account/unknown-region");
    }

    #[test]
    fn test_explicit_environment_wins() {
        let env = Environment::with_env_fallback(Some("111111111111".to_string()), Some("eu-west-1".to_string()));
        assert_eq!(env.account.as_deref(), Some("111111111111"));
        assert_eq!(env.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_manifest() {
        let env = Environment::new(Some("123456789012".to_string()), None);
        let manifest = build_manifest("demo", &env);
        let artifact = &manifest.artifacts["demo"];
        assert_eq!(artifact.artifact_type, "aws:cloudformation:stack");
        assert_eq!(artifact.environment, "aws://123456789012/unknown-region");
        assert_eq!(artifact.properties.template_file, "demo.template.json");

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["artifacts"]["demo"]["type"], "aws:cloudformation:stack");
        assert_eq!(json["artifacts"]["demo"]["properties"]["templateFile"], "demo.template.json");
    }

    #[test]
    fn test_write_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let template = Template::new(None);
        let path = write_assembly(dir.path(), "demo", &Environment::default(), &template).unwrap();

        assert_eq!(path, dir.path().join("demo.template.json"));
        assert!(path.exists());
        assert!(dir.path().join("manifest.json").exists());
    }
}
