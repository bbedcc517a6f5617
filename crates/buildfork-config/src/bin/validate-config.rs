//! Config validation CLI tool
//!
//! Validates a buildfork configuration file and reports any errors.

use buildfork_config::{ConfigError, TransportPreference, CURRENT_CONFIG_VERSION};
use buildfork_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a buildfork configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match buildfork_config::load_config(&config_path) {
        Ok(config) => {
            let transport = match config.transport {
                TransportPreference::Auto => "auto",
                TransportPreference::Signals => "signals",
                TransportPreference::Message => "message",
            };

            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", CURRENT_CONFIG_VERSION);
            println!("  Parent pid variable: {}", config.env.parent_pid_var);
            println!("  Tuning variable: {}", config.env.tuning_var);
            println!("  Transport: {}", transport);
            println!(
                "  Heap: {:.2} of memory, semi-space {} MiB, stack trace limit {}",
                config.heap.fraction, config.heap.semi_space_mib, config.heap.stack_trace_limit
            );
            println!("  Build: {}", config.build.command.join(" "));
            if let Some(persist) = &config.build.persist {
                println!("  Persist: {}", persist.join(" "));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
