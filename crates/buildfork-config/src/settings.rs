//! Validated launcher settings

use buildfork_util::{DEFAULT_PARENT_PID_VAR, DEFAULT_TUNING_VAR};

use crate::schema::{RawBuildConfig, RawConfig, RawHeapConfig, RawLauncherConfig, RawTransport};

/// Default share of physical memory for the old generation
pub const DEFAULT_HEAP_FRACTION: f64 = 0.75;

/// Default semi-space size in MiB
pub const DEFAULT_SEMI_SPACE_MIB: u32 = 128;

/// Default stack trace limit
pub const DEFAULT_STACK_TRACE_LIMIT: u32 = 0;

/// Default build program
pub const DEFAULT_BUILD_COMMAND: &[&str] = &["npx", "webpack"];

/// Validated configuration ready for use by the supervisor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LauncherConfig {
    pub env: EnvNames,
    pub heap: HeapTuning,
    pub transport: TransportPreference,
    pub build: BuildCommand,
}

impl LauncherConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            env: EnvNames::from_raw(raw.launcher.clone()),
            heap: HeapTuning::from_raw(raw.heap),
            transport: raw
                .launcher
                .transport
                .map(TransportPreference::from)
                .unwrap_or_default(),
            build: raw.build.map(BuildCommand::from_raw).unwrap_or_default(),
        }
    }
}

/// Names of the variables shared with the forked child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvNames {
    pub parent_pid_var: String,
    pub tuning_var: String,
}

impl EnvNames {
    fn from_raw(raw: RawLauncherConfig) -> Self {
        Self {
            parent_pid_var: raw
                .parent_pid_var
                .unwrap_or_else(|| DEFAULT_PARENT_PID_VAR.to_string()),
            tuning_var: raw
                .tuning_var
                .unwrap_or_else(|| DEFAULT_TUNING_VAR.to_string()),
        }
    }
}

impl Default for EnvNames {
    fn default() -> Self {
        Self {
            parent_pid_var: DEFAULT_PARENT_PID_VAR.to_string(),
            tuning_var: DEFAULT_TUNING_VAR.to_string(),
        }
    }
}

/// Heap flags appended to the tuning variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapTuning {
    pub fraction: f64,
    pub semi_space_mib: u32,
    pub stack_trace_limit: u32,
}

impl HeapTuning {
    fn from_raw(raw: RawHeapConfig) -> Self {
        Self {
            fraction: raw.fraction.unwrap_or(DEFAULT_HEAP_FRACTION),
            semi_space_mib: raw.semi_space_mib.unwrap_or(DEFAULT_SEMI_SPACE_MIB),
            stack_trace_limit: raw.stack_trace_limit.unwrap_or(DEFAULT_STACK_TRACE_LIMIT),
        }
    }
}

impl Default for HeapTuning {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_HEAP_FRACTION,
            semi_space_mib: DEFAULT_SEMI_SPACE_MIB,
            stack_trace_limit: DEFAULT_STACK_TRACE_LIMIT,
        }
    }
}

/// Which shutdown transport the launcher should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPreference {
    /// Decided by the host capability probe
    #[default]
    Auto,
    Signals,
    /// Force the no-signals profile: pipes and a message port
    Message,
}

impl From<RawTransport> for TransportPreference {
    fn from(raw: RawTransport) -> Self {
        match raw {
            RawTransport::Auto => TransportPreference::Auto,
            RawTransport::Signals => TransportPreference::Signals,
            RawTransport::Message => TransportPreference::Message,
        }
    }
}

/// The build the launcher runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub command: Vec<String>,
    pub persist: Option<Vec<String>>,
}

impl BuildCommand {
    fn from_raw(raw: RawBuildConfig) -> Self {
        Self {
            command: raw.command,
            persist: raw.persist,
        }
    }

    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }
}

impl Default for BuildCommand {
    fn default() -> Self {
        Self {
            command: DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect(),
            persist: None,
        }
    }
}
