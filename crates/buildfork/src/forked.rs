//! Runtime of the forked child

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

use buildfork_config::LauncherConfig;
use buildfork_core::{verify_parent, BuildRoutine, CompletionCallback};
use buildfork_host_api::{HostEvent, ShutdownSignal};
use buildfork_host_unix::{send_signal, ParentLink};

use crate::build::CommandBuild;
use crate::output::OutputGate;

/// Run the build as the launcher's detached child.
///
/// The parent-id check happens before anything else. When the build's
/// foreground output is done, this process goes quiet and tells the parent
/// it may exit.
pub async fn run_forked(config: &LauncherConfig, build: CommandBuild, gate: OutputGate) -> Result<i32> {
    let ppid = nix::unistd::getppid().as_raw() as u32;
    let var = &config.env.parent_pid_var;
    let value = std::env::var(var).ok();
    verify_parent(var, value.as_deref(), ppid).context("Refusing to run as a forked build")?;

    let link = ParentLink::from_env(ppid).context("Failed to open link to parent")?;
    drive(link, build, gate).await
}

/// Run `build` over an open parent link until it finishes or the parent
/// asks it to terminate.
pub async fn drive(mut link: ParentLink, build: CommandBuild, gate: OutputGate) -> Result<i32> {
    let mut notices = link
        .take_notices()
        .context("Parent notices already taken")?;
    info!(ppid = link.ppid(), transport = ?link.transport(), "Forked build starting");

    let notifier = link.notifier();
    let on_complete: CompletionCallback = Box::new(move || {
        gate.silence_output();
        if let Err(e) = notifier.notify() {
            debug!(error = %e, "Parent did not receive completion notice");
        }
    });

    let running = build.running_pid();
    // The build future owns the notifier and must be gone before `finish`.
    let exit_code = {
        let build_future = build.build(Some(on_complete));
        tokio::pin!(build_future);

        loop {
            tokio::select! {
                result = &mut build_future => break result?,
                Some(event) = notices.recv() => match event {
                    HostEvent::Notice(ShutdownSignal::ResizeNotice) => {
                        forward(&running, Signal::SIGWINCH);
                    }
                    HostEvent::Notice(ShutdownSignal::TerminationRequest { signal }) => {
                        info!(signal, "Parent requested termination");
                        match Signal::try_from(signal) {
                            Ok(sig) => forward(&running, sig),
                            Err(e) => warn!(signal, error = %e, "Unknown termination signal"),
                        }
                        break 128 + signal;
                    }
                    other => debug!(?other, "Ignoring notice from parent"),
                },
            }
        }
    };

    link.finish().await;
    Ok(exit_code)
}

fn forward(running: &AtomicU32, sig: Signal) {
    let pid = running.load(Ordering::SeqCst);
    if pid == 0 {
        return;
    }
    if let Err(e) = send_signal(pid, sig) {
        warn!(pid, signal = %sig, error = %e, "Failed to forward signal to build");
    }
}
