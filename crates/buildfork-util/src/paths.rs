//! Default paths for buildfork
//!
//! - Config: `$XDG_CONFIG_HOME/buildfork/config.toml` or `~/.config/buildfork/config.toml`

use std::path::PathBuf;

/// Application subdirectory name
const APP_DIR: &str = "buildfork";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Get the default config file path.
///
/// Falls back to `./buildfork.toml` when no user config directory is known.
/// The `BUILDFORK_CONFIG` override is applied by the CLI layer.
pub fn default_config_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join(APP_DIR).join(CONFIG_FILENAME),
        None => PathBuf::from(format!("{}.toml", APP_DIR)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_contains_buildfork() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("buildfork"));
        assert!(path.to_string_lossy().ends_with(".toml"));
    }
}
