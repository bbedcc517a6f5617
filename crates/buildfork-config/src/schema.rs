//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Launcher settings
    #[serde(default)]
    pub launcher: RawLauncherConfig,

    /// Heap tuning for the forked child
    #[serde(default)]
    pub heap: RawHeapConfig,

    /// Build command run by the launcher
    pub build: Option<RawBuildConfig>,
}

/// Launcher-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawLauncherConfig {
    /// Variable carrying the parent pid (default: PPID)
    pub parent_pid_var: Option<String>,

    /// Interpreter-tuning variable extended with heap flags (default: NODE_OPTIONS)
    pub tuning_var: Option<String>,

    /// Shutdown transport preference (default: auto)
    pub transport: Option<RawTransport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawTransport {
    Auto,
    Signals,
    Message,
}

/// Heap flag settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawHeapConfig {
    /// Share of physical memory given to the old generation (default: 0.75)
    pub fraction: Option<f64>,

    /// Semi-space size in MiB (default: 128)
    pub semi_space_mib: Option<u32>,

    /// Stack trace limit (default: 0)
    pub stack_trace_limit: Option<u32>,
}

/// Build command settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawBuildConfig {
    /// Program and arguments of the build
    pub command: Vec<String>,

    /// Background step run after the completion notice
    pub persist: Option<Vec<String>>,
}
