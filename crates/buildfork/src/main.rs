//! buildfork - launch a build inline or in a detached child
//!
//! The entry point wires together:
//! - Command line parsing and configuration loading
//! - Logging through the output gate
//! - The process supervisor over the Unix host adapter
//! - The forked-child runtime (`--forked`)

mod build;
mod forked;
mod output;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use buildfork_config::{load_or_default, TransportPreference};
use buildfork_core::{Launch, LaunchFlags, LaunchRequest, ProcessSupervisor};
use buildfork_host_api::HostCapabilities;
use buildfork_host_unix::UnixHost;
use buildfork_util::default_config_path;

use crate::build::CommandBuild;
use crate::output::OutputGate;

/// buildfork - run a build, detaching from it once its output is done
#[derive(Parser, Debug)]
#[command(name = "buildfork", version)]
#[command(about = "Run a build in a detached child that keeps working after its output is done", long_about = None)]
#[command(disable_help_flag = true)]
struct Args {
    /// Use the persistent build cache (default)
    #[arg(short = 'c', long = "cache", overrides_with = "no_cache")]
    cache: bool,

    /// Disable the persistent build cache; the build runs inline
    #[arg(long = "no-cache", overrides_with = "cache")]
    no_cache: bool,

    /// Print this help, then the build tool's help
    #[arg(short = 'h', long)]
    help: bool,

    /// Run the build in watch mode (inline)
    #[arg(short = 'w', long)]
    watch: bool,

    /// Configuration file path (default: ~/.config/buildfork/config.toml)
    #[arg(long, env = "BUILDFORK_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Run as the detached child of a launcher
    #[arg(long, hide = true)]
    forked: bool,

    /// Arguments forwarded to the build
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    build_args: Vec<String>,
}

impl Args {
    fn flags(&self) -> LaunchFlags {
        LaunchFlags {
            cache_enabled: !self.no_cache,
            help_requested: self.help,
            watch_requested: self.watch,
        }
    }
}

fn capabilities(preference: TransportPreference) -> HostCapabilities {
    let probed = HostCapabilities::probe();
    match preference {
        TransportPreference::Auto => probed,
        TransportPreference::Message => probed.without_signals(),
        TransportPreference::Signals => {
            if !probed.posix_signals {
                warn!("Signal transport requested but unavailable, using message port");
            }
            probed
        }
    }
}

async fn run(args: Args, gate: OutputGate) -> Result<i32> {
    let config = load_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let flags = args.flags();
    let build = CommandBuild::new(config.build.clone(), args.build_args.clone(), flags);

    if args.forked {
        return forked::run_forked(&config, build, gate).await;
    }

    if flags.help_requested {
        Args::command()
            .print_help()
            .context("Failed to print help")?;
        println!();
    }

    let host = Arc::new(UnixHost::new(capabilities(config.transport)));
    let supervisor = ProcessSupervisor::new(host, config);

    // The child is this binary again, with the same arguments.
    let exe = std::env::current_exe().context("Failed to locate own executable")?;
    let mut child_args = vec!["--forked".to_string()];
    child_args.extend(std::env::args().skip(1));
    let request = LaunchRequest::new(exe.to_string_lossy(), child_args, flags);

    match supervisor.launch(&request, &build).await? {
        Launch::Inline { exit_code } => Ok(exit_code),
        Launch::Forked(mut session) => Ok(session.run().await?.exit_code()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let gate = OutputGate::new();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(gate.clone())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        forked = args.forked,
        "buildfork starting"
    );

    let exit_code = match run(args, gate).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "buildfork failed");
            eprintln!("buildfork: {:#}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn cache_flags() {
        let args = Args::parse_from(["buildfork"]);
        assert!(args.flags().cache_enabled);

        let args = Args::parse_from(["buildfork", "--no-cache"]);
        assert!(!args.flags().cache_enabled);

        let args = Args::parse_from(["buildfork", "--no-cache", "-c"]);
        assert!(args.flags().cache_enabled);
    }

    #[test]
    fn short_aliases_and_forwarded_args() {
        let args = Args::parse_from(["buildfork", "-w", "-h", "--mode=production", "src/index.js"]);
        let flags = args.flags();
        assert!(flags.watch_requested);
        assert!(flags.help_requested);
        assert_eq!(args.build_args, vec!["--mode=production", "src/index.js"]);
        assert!(!args.forked);
    }

    #[test]
    fn forked_marker_is_accepted() {
        let args = Args::parse_from(["buildfork", "--forked", "--config", "/tmp/b.toml", "x"]);
        assert!(args.forked);
        assert_eq!(args.config, PathBuf::from("/tmp/b.toml"));
        assert_eq!(args.build_args, vec!["x"]);
    }

    #[test]
    fn message_preference_disables_signals() {
        assert!(!capabilities(TransportPreference::Message).posix_signals);
        assert_eq!(
            capabilities(TransportPreference::Auto),
            HostCapabilities::probe()
        );
    }
}
