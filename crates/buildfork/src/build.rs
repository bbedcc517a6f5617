//! Command-backed build routine

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use buildfork_config::BuildCommand;
use buildfork_core::{BuildRoutine, CompletionCallback, CoreError, CoreResult, LaunchFlags};
use buildfork_host_api::ExitStatus;
use buildfork_util::{CACHE_ENV, CHANNEL_FD_ENV};

/// Runs the configured build command with inherited stdio
pub struct CommandBuild {
    command: BuildCommand,
    forwarded: Vec<String>,
    flags: LaunchFlags,
    running: Arc<AtomicU32>,
}

impl CommandBuild {
    pub fn new(command: BuildCommand, forwarded: Vec<String>, flags: LaunchFlags) -> Self {
        Self {
            command,
            forwarded,
            flags,
            running: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Pid of the build process while it runs, 0 otherwise
    pub fn running_pid(&self) -> Arc<AtomicU32> {
        self.running.clone()
    }

    /// Arguments passed to the build program
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.command.args().to_vec();
        args.extend(self.forwarded.iter().cloned());
        if self.flags.watch_requested {
            args.push("--watch".into());
        }
        if self.flags.help_requested {
            args.push("--help".into());
        }
        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(self.command.program());
        cmd.args(self.build_args());
        cmd.env_remove(CHANNEL_FD_ENV);
        if !self.flags.cache_enabled {
            cmd.env(CACHE_ENV, "0");
        }
        cmd
    }

    async fn persist(&self, persist: &[String]) {
        let Some((program, args)) = persist.split_first() else {
            return;
        };

        let result = Command::new(program)
            .args(args)
            .env_remove(CHANNEL_FD_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match result {
            Ok(status) if status.success() => debug!(program = %program, "Persist step finished"),
            Ok(status) => warn!(program = %program, ?status, "Persist step failed"),
            Err(e) => warn!(program = %program, error = %e, "Failed to start persist step"),
        }
    }
}

#[async_trait]
impl BuildRoutine for CommandBuild {
    async fn build(&self, on_complete: Option<CompletionCallback>) -> CoreResult<i32> {
        let program = self.command.program().to_string();
        let mut child = self
            .command()
            .spawn()
            .map_err(|e| CoreError::Build(format!("failed to start {}: {}", program, e)))?;

        let pid = child.id().unwrap_or(0);
        self.running.store(pid, Ordering::SeqCst);
        info!(pid, program = %program, "Build started");

        let status = child.wait().await;
        self.running.store(0, Ordering::SeqCst);
        let status = status.map_err(|e| CoreError::Build(format!("failed to wait for {}: {}", program, e)))?;

        let exit_code = exit_code(status);
        if exit_code != 0 {
            info!(exit_code, "Build failed");
            return Ok(exit_code);
        }

        if let Some(on_complete) = on_complete {
            on_complete();
        }

        if self.flags.cache_enabled
            && let Some(persist) = &self.command.persist
        {
            self.persist(persist).await;
        }

        Ok(0)
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => ExitStatus::with_code(code).exit_code(),
        (None, Some(signal)) => ExitStatus::signaled(signal).exit_code(),
        (None, None) => 1,
    }
}
