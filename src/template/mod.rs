//! Provisioning template model
//!
//! The synthesized document handed to the provisioning engine: parameters,
//! resources and outputs keyed by logical id. Everything is kept in sorted
//! maps so two syntheses of the same settings serialize byte-for-byte
//! identically.

pub mod intrinsics;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Template format version understood by the provisioning engine
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Metadata key recording the construct path a resource was generated from
pub const PATH_METADATA_KEY: &str = "synth:path";

/// Logical ids are limited to 255 characters; leave room for the hash suffix
const MAX_HUMAN_ID_LEN: usize = 240;

/// Errors raised while assembling or serializing a template
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Duplicate logical id: '{0}'")]
    DuplicateLogicalId(String),

    #[error("Failed to serialize template: {0}")]
    SerializeError(String),
}

/// Serialization format of the synthesized document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

// ============================================================================
// SBIO: Pure data structures
// ============================================================================

/// The complete resource document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,

    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

/// A template parameter, resolved by the provisioning engine at apply time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A stack output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single declarative resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Resource {
    /// Create an empty resource of the given type
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
            update_policy: None,
            metadata: None,
        }
    }

    /// Set a property
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Set a property only when a value is present
    pub fn with_optional_property(self, key: impl Into<String>, value: Option<Value>) -> Self {
        match value {
            Some(v) => self.with_property(key, v),
            None => self,
        }
    }

    /// Add an explicit dependency on another resource
    pub fn with_depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    /// Attach an update policy
    pub fn with_update_policy(mut self, policy: Value) -> Self {
        self.update_policy = Some(policy);
        self
    }

    /// Look up a property value
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Path of a construct in the synthesized tree, e.g. `EksCluster/Cluster/Role`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstructPath {
    segments: Vec<String>,
}

impl ConstructPath {
    /// A top-level construct
    pub fn root(id: impl Into<String>) -> Self {
        Self {
            segments: vec![id.into()],
        }
    }

    /// A child construct of this one
    pub fn child(&self, id: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(id.into());
        Self { segments }
    }

    /// The deterministic logical id for this path
    pub fn logical_id(&self) -> String {
        logical_id(&self.segments)
    }
}

impl fmt::Display for ConstructPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Compute a logical id from construct path segments.
///
/// Alphanumeric characters of every segment are concatenated and suffixed
/// with the first 8 hex digits of the SHA-256 of the `/`-joined path, so ids
/// stay readable while distinct paths never collide after stripping.
pub fn logical_id<S: AsRef<str>>(segments: &[S]) -> String {
    let mut human: String = segments
        .iter()
        .flat_map(|s| s.as_ref().chars().filter(|c| c.is_ascii_alphanumeric()))
        .collect();
    human.truncate(MAX_HUMAN_ID_LEN);

    let joined = segments
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("/");
    let digest = Sha256::digest(joined.as_bytes());
    let suffix: String = digest.iter().take(4).map(|b| format!("{:02X}", b)).collect();

    format!("{}{}", human, suffix)
}

impl Template {
    /// Create an empty template
    pub fn new(description: Option<String>) -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description,
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource generated by the construct at `path`.
    /// Returns the logical id it was registered under.
    pub fn add(
        &mut self,
        path: &ConstructPath,
        mut resource: Resource,
    ) -> Result<String, TemplateError> {
        let id = path.logical_id();
        let mut metadata = match resource.metadata.take() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        metadata.insert(PATH_METADATA_KEY.to_string(), Value::String(path.to_string()));
        resource.metadata = Some(Value::Object(metadata));
        self.add_resource(id.clone(), resource)?;
        Ok(id)
    }

    /// Add a resource under an explicit logical id
    pub fn add_resource(
        &mut self,
        id: impl Into<String>,
        resource: Resource,
    ) -> Result<(), TemplateError> {
        let id = id.into();
        if self.resources.contains_key(&id) {
            return Err(TemplateError::DuplicateLogicalId(id));
        }
        self.resources.insert(id, resource);
        Ok(())
    }

    /// Add a parameter. Re-adding an identical parameter is a no-op, so
    /// shared parameters (node images, service tokens) can be requested by
    /// several constructs.
    pub fn add_parameter(
        &mut self,
        id: impl Into<String>,
        parameter: Parameter,
    ) -> Result<(), TemplateError> {
        let id = id.into();
        match self.parameters.get(&id) {
            Some(existing) if *existing == parameter => Ok(()),
            Some(_) => Err(TemplateError::DuplicateLogicalId(id)),
            None => {
                self.parameters.insert(id, parameter);
                Ok(())
            }
        }
    }

    /// Add an output
    pub fn add_output(
        &mut self,
        id: impl Into<String>,
        output: Output,
    ) -> Result<(), TemplateError> {
        let id = id.into();
        if self.outputs.contains_key(&id) {
            return Err(TemplateError::DuplicateLogicalId(id));
        }
        self.outputs.insert(id, output);
        Ok(())
    }

    /// Get a resource by logical id
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// All resources of a given type, in logical id order
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<(&str, &Resource)> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == resource_type)
            .map(|(id, r)| (id.as_str(), r))
            .collect()
    }

    /// Count resources of a given type
    pub fn count_of_type(&self, resource_type: &str) -> usize {
        self.resources
            .values()
            .filter(|r| r.resource_type == resource_type)
            .count()
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, TemplateError> {
        serde_json::to_string_pretty(self).map_err(|e| TemplateError::SerializeError(e.to_string()))
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, TemplateError> {
        serde_yaml::to_string(self).map_err(|e| TemplateError::SerializeError(e.to_string()))
    }

    /// Serialize in the requested format
    pub fn render(&self, format: OutputFormat) -> Result<String, TemplateError> {
        match format {
            OutputFormat::Json => self.to_json(),
            OutputFormat::Yaml => self.to_yaml(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_logical_id_is_readable_and_stable() {
        let a = logical_id(&["EksCluster", "Cluster", "Role"]);
        let b = logical_id(&["EksCluster", "Cluster", "Role"]);
        assert_eq!(a, b);
        assert!(a.starts_with("EksClusterClusterRole"));
        assert_eq!(a.len(), "EksClusterClusterRole".len() + 8);
    }

    #[test]
    fn test_logical_id_distinguishes_stripped_collisions() {
        let a = logical_id(&["Node-Group", "A"]);
        let b = logical_id(&["NodeGroup", "A"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_construct_path_display() {
        let path = ConstructPath::root("EksCluster").child("Cluster");
        assert_eq!(path.to_string(), "EksCluster/Cluster");
    }

    #[test]
    fn test_add_records_path_metadata() {
        let mut template = Template::new(None);
        let path = ConstructPath::root("Vpc");
        let id = template
            .add(&path, Resource::new("AWS::EC2::VPC").with_property("CidrBlock", json!("10.0.0.0/16")))
            .unwrap();

        let resource = template.resource(&id).unwrap();
        assert_eq!(resource.metadata, Some(json!({ "synth:path": "Vpc" })));
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let mut template = Template::new(None);
        template.add_resource("A", Resource::new("AWS::EC2::VPC")).unwrap();
        let result = template.add_resource("A", Resource::new("AWS::EC2::VPC"));
        assert!(matches!(result, Err(TemplateError::DuplicateLogicalId(id)) if id == "A"));
    }

    #[test]
    fn test_identical_parameter_is_shared() {
        let mut template = Template::new(None);
        let param = Parameter {
            parameter_type: "String".to_string(),
            default: Some("x".to_string()),
            description: None,
        };
        template.add_parameter("P", param.clone()).unwrap();
        assert!(template.add_parameter("P", param).is_ok());

        let other = Parameter {
            parameter_type: "String".to_string(),
            default: Some("y".to_string()),
            description: None,
        };
        assert!(template.add_parameter("P", other).is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let mut template = Template::new(Some("demo".to_string()));
        template
            .add_resource(
                "Vpc",
                Resource::new("AWS::EC2::VPC").with_property("CidrBlock", json!("10.0.0.0/16")),
            )
            .unwrap();

        let value: Value = serde_json::from_str(&template.to_json().unwrap()).unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Description"], "demo");
        assert_eq!(value["Resources"]["Vpc"]["Type"], "AWS::EC2::VPC");
        assert_eq!(value["Resources"]["Vpc"]["Properties"]["CidrBlock"], "10.0.0.0/16");
        assert!(value.get("Parameters").is_none());
        assert!(value["Resources"]["Vpc"].get("DependsOn").is_none());
    }

    #[test]
    fn test_yaml_render() {
        let mut template = Template::new(None);
        template
            .add_resource("Vpc", Resource::new("AWS::EC2::VPC"))
            .unwrap();
        let yaml = template.render(OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("AWSTemplateFormatVersion:"));
        assert!(yaml.contains("2010-09-09"));
        assert!(yaml.contains("Type: AWS::EC2::VPC"));
    }
}
