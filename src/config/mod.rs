pub mod settings;
pub mod validation;

pub use settings::{
    keys, parse_context_values, ContextValues, NodeGroupKind, Settings, SettingsError,
    SpotStrategy,
};
pub use validation::{
    validate_environment, validate_settings, ValidationMessage, ValidationResult,
    ValidationSeverity,
};

use std::path::Path;

use thiserror::Error;

use crate::context::{load_context_from, merge_overrides, ContextError, ContextFile};

/// Errors for loading settings from disk (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),
}

/// Settings plus the context file they came from
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub file: ContextFile,
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load the context file and build settings, with `overrides` taking
/// precedence over stored values
pub fn load_settings(
    path: &Path,
    overrides: &[(String, String)],
) -> Result<LoadedSettings, ConfigError> {
    let file = load_context_from(path)?;
    let effective = merge_overrides(&file.context, overrides);
    let settings = Settings::from_context(&effective)?;
    Ok(LoadedSettings { settings, file })
}
