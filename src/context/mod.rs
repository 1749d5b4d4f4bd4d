use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::VpcLookupResult;

/// Default context file location: ~/.eks-synth/context.yaml
pub fn default_context_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".eks-synth")
        .join("context.yaml")
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(raw: &str) -> Result<PathBuf, ContextError> {
    shellexpand::full(raw)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| ContextError::InvalidPath(raw.to_string(), e.to_string()))
}

/// Errors that can occur during context operations
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Context key '{0}' is not set")]
    KeyNotFound(String),

    #[error("Invalid override '{0}': expected key=value")]
    InvalidOverride(String),

    #[error("Invalid path '{0}': {1}")]
    InvalidPath(String, String),

    #[error("Failed to parse context file: {0}")]
    ParseError(String),

    #[error("Failed to write context file: {0}")]
    WriteError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// The context file: key/value settings plus cached lookup results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContextFile {
    /// Context values, e.g. `spot_only: "1"`
    #[serde(default)]
    pub context: BTreeMap<String, String>,

    /// Cached VPC lookup results keyed by lookup key
    #[serde(default)]
    pub lookups: BTreeMap<String, VpcLookupResult>,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse a context file from YAML
pub fn parse_context_file(content: &str) -> Result<ContextFile, ContextError> {
    if content.trim().is_empty() {
        return Ok(ContextFile::default());
    }
    serde_yaml::from_str(content).map_err(|e| ContextError::ParseError(e.to_string()))
}

/// Serialize a context file to YAML
pub fn serialize_context_file(file: &ContextFile) -> Result<String, ContextError> {
    serde_yaml::to_string(file).map_err(|e| ContextError::WriteError(e.to_string()))
}

/// Parse a `key=value` override. The value may be empty or contain `=`.
pub fn parse_override(raw: &str) -> Result<(String, String), ContextError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ContextError::InvalidOverride(raw.to_string())),
    }
}

/// Layer overrides on top of stored context values; overrides win
pub fn merge_overrides(
    stored: &BTreeMap<String, String>,
    overrides: &[(String, String)],
) -> BTreeMap<String, String> {
    let mut merged = stored.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

impl ContextFile {
    pub fn get(&self, key: &str) -> Result<&str, ContextError> {
        self.context
            .get(key)
            .map(|v| v.as_str())
            .ok_or_else(|| ContextError::KeyNotFound(key.to_string()))
    }

    /// Set a value, returning the previous one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.context.insert(key.into(), value.into())
    }

    pub fn unset(&mut self, key: &str) -> Result<String, ContextError> {
        self.context
            .remove(key)
            .ok_or_else(|| ContextError::KeyNotFound(key.to_string()))
    }

    /// Store a lookup result, replacing any previous one for the key
    pub fn record_lookup(&mut self, key: impl Into<String>, result: VpcLookupResult) {
        self.lookups.insert(key.into(), result);
    }
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load the context file; a missing file is an empty context
pub fn load_context_from(path: &Path) -> Result<ContextFile, ContextError> {
    if !path.exists() {
        return Ok(ContextFile::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_context_file(&content)
}

/// Save the context file, creating parent directories
pub fn save_context_to(file: &ContextFile, path: &Path) -> Result<(), ContextError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = serialize_context_file(file)?;
    std::fs::write(path, content)?;
    Ok(())
}
