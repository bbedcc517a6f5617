//! Environment variables exchanged between the launcher and the forked child

/// Default variable carrying the parent's pid into the forked child
pub const DEFAULT_PARENT_PID_VAR: &str = "PPID";

/// Default interpreter-tuning variable extended with heap flags
pub const DEFAULT_TUNING_VAR: &str = "NODE_OPTIONS";

/// Set when the child receives a message port instead of relying on signals.
/// Its value is the descriptor number of the port inside the child.
pub const CHANNEL_FD_ENV: &str = "BUILDFORK_CHANNEL_FD";

/// Descriptor the message port is installed on in the child
pub const CHANNEL_FD: i32 = 3;

/// Exported to the build command when the cache is disabled
pub const CACHE_ENV: &str = "BUILDFORK_CACHE";

/// Environment variable for overriding the config path
pub const BUILDFORK_CONFIG_ENV: &str = "BUILDFORK_CONFIG";

/// Check that a string can be used as an environment variable name
pub fn is_valid_env_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('=') && !name.contains('\0')
}
