//! Configuration validation

use buildfork_util::is_valid_env_name;
use thiserror::Error;

use crate::schema::{RawBuildConfig, RawConfig};

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid variable name for {field}: {value:?}")]
    InvalidVariableName { field: &'static str, value: String },

    #[error("Variables {0} and {1} must differ")]
    VariableClash(&'static str, &'static str),

    #[error("heap.fraction must be in (0, 1], got {0}")]
    InvalidHeapFraction(f64),

    #[error("build.{0} cannot be empty")]
    EmptyCommand(&'static str),
}

/// Validate a raw configuration, collecting every error
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let launcher = &config.launcher;
    for (field, value) in [
        ("launcher.parent_pid_var", &launcher.parent_pid_var),
        ("launcher.tuning_var", &launcher.tuning_var),
    ] {
        if let Some(value) = value
            && !is_valid_env_name(value)
        {
            errors.push(ValidationError::InvalidVariableName {
                field,
                value: value.clone(),
            });
        }
    }

    if let (Some(pid_var), Some(tuning_var)) = (&launcher.parent_pid_var, &launcher.tuning_var)
        && pid_var == tuning_var
    {
        errors.push(ValidationError::VariableClash(
            "launcher.parent_pid_var",
            "launcher.tuning_var",
        ));
    }

    if let Some(fraction) = config.heap.fraction
        && !(fraction > 0.0 && fraction <= 1.0)
    {
        errors.push(ValidationError::InvalidHeapFraction(fraction));
    }

    if let Some(build) = &config.build {
        errors.extend(validate_build(build));
    }

    errors
}

fn validate_build(build: &RawBuildConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if build.command.first().is_none_or(|program| program.is_empty()) {
        errors.push(ValidationError::EmptyCommand("command"));
    }

    if let Some(persist) = &build.persist
        && persist.first().is_none_or(|program| program.is_empty())
    {
        errors.push(ValidationError::EmptyCommand("persist"));
    }

    errors
}
