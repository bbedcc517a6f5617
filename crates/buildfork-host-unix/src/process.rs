//! Child process spawning

use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::process::Stdio;
use tokio::net::UnixStream;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use buildfork_host_api::{
    ActiveHandles, ChildHandle, ChildStdio, ExitStatus, HostError, HostEvent, HostResult,
    MessagePort, SpawnRequest, StdName,
};
use buildfork_util::{CHANNEL_FD, CHANNEL_FD_ENV};

/// Spawn the child described by `request`.
///
/// A detached child becomes the leader of a new session, so it survives the
/// parent and never receives signals aimed at the parent's process group.
/// [`HostEvent::Exited`] is sent on `events` once the child exits.
pub fn spawn_child(
    request: SpawnRequest,
    registry: ActiveHandles,
    events: mpsc::UnboundedSender<HostEvent>,
) -> HostResult<ChildHandle> {
    let SpawnRequest {
        program,
        args,
        env,
        detached,
        stdout,
        stderr,
        message_port,
    } = request;

    let mut cmd = Command::new(&program);
    cmd.args(&args);

    if let Some(env) = env {
        cmd.env_clear();
        cmd.envs(env);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(into_stdio(stdout));
    cmd.stderr(into_stdio(stderr));

    // The child end must stay open until the child has been spawned.
    let port = if message_port {
        let (parent_end, child_end) = StdUnixStream::pair()?;
        cmd.env(CHANNEL_FD_ENV, CHANNEL_FD.to_string());
        Some((parent_end, child_end))
    } else {
        None
    };
    let port_fd: Option<RawFd> = port.as_ref().map(|(_, child_end)| child_end.as_raw_fd());

    // SAFETY: only async-signal-safe calls (setsid, dup2, fcntl) run between
    // fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            if detached {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
            }
            if let Some(fd) = port_fd {
                if fd == CHANNEL_FD {
                    let flags = nix::libc::fcntl(fd, nix::libc::F_GETFD);
                    if flags < 0
                        || nix::libc::fcntl(fd, nix::libc::F_SETFD, flags & !nix::libc::FD_CLOEXEC)
                            < 0
                    {
                        return Err(std::io::Error::last_os_error());
                    }
                } else if nix::libc::dup2(fd, CHANNEL_FD) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| HostError::SpawnFailed(format!("Failed to spawn {}: {}", program, e)))?;
    drop(cmd);

    let pid = child
        .id()
        .ok_or_else(|| HostError::SpawnFailed(format!("{} exited before reporting a pid", program)))?;

    info!(pid, program = %program, detached, message_port, "Spawned child");

    let mut handle = ChildHandle::new(pid, registry);
    if let Some(out) = child.stdout.take() {
        handle = handle.with_output(StdName::Stdout, Box::new(out));
    }
    if let Some(err) = child.stderr.take() {
        handle = handle.with_output(StdName::Stderr, Box::new(err));
    }

    if let Some((parent_end, child_end)) = port {
        drop(child_end);
        parent_end.set_nonblocking(true)?;
        let (reader, writer) = UnixStream::from_std(parent_end)?.into_split();
        handle = handle.with_message_port(MessagePort::new(reader, writer));
    }

    tokio::spawn(async move {
        let status = match child.wait().await {
            Ok(status) => exit_status(status),
            Err(e) => {
                warn!(pid, error = %e, "Failed to wait for child");
                ExitStatus::with_code(-1)
            }
        };
        debug!(pid, ?status, "Child exited");
        let _ = events.send(HostEvent::Exited { pid, status });
    });

    Ok(handle)
}

fn into_stdio(stdio: ChildStdio) -> Stdio {
    match stdio {
        ChildStdio::Inherit => Stdio::inherit(),
        ChildStdio::Null => Stdio::null(),
        ChildStdio::Piped => Stdio::piped(),
        ChildStdio::Terminal(fd) => Stdio::from(fd),
    }
}

fn exit_status(status: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    if let Some(code) = status.code() {
        ExitStatus::with_code(code)
    } else if let Some(sig) = status.signal() {
        ExitStatus::signaled(sig)
    } else {
        ExitStatus::with_code(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildfork_host_api::{MessageChannel, ShutdownChannel, ShutdownSignal};
    use std::collections::BTreeMap;

    async fn wait_exit(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> ExitStatus {
        match rx.recv().await {
            Some(HostEvent::Exited { status, .. }) => status,
            other => panic!("expected exit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn spawn_simple_process() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = ActiveHandles::new();
        let child = spawn_child(SpawnRequest::new("true"), registry.clone(), tx).unwrap();

        assert!(child.is_ref());
        assert!(wait_exit(&mut rx).await.is_success());
    }

    #[tokio::test]
    async fn exit_code_and_signal_are_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = SpawnRequest::new("sh").args(["-c", "exit 3"]);
        let _a = spawn_child(request, ActiveHandles::new(), tx.clone()).unwrap();
        assert_eq!(wait_exit(&mut rx).await.exit_code(), 3);

        let request = SpawnRequest::new("sh").args(["-c", "kill -9 $$"]);
        let _b = spawn_child(request, ActiveHandles::new(), tx).unwrap();
        assert_eq!(wait_exit(&mut rx).await.exit_code(), 137);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn detached_child_leads_its_own_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Field 6 of /proc/<pid>/stat is the session id.
        let request = SpawnRequest::new("sh")
            .args(["-c", "test \"$(cut -d' ' -f6 /proc/$$/stat)\" = \"$$\""])
            .detached(true);
        let _child = spawn_child(request, ActiveHandles::new(), tx).unwrap();
        assert!(wait_exit(&mut rx).await.is_success());
    }

    #[tokio::test]
    async fn env_replaces_parent_environment() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), std::env::var("PATH").unwrap_or_default());
        env.insert("BUILD_MARKER".to_string(), "fork".to_string());

        let request = SpawnRequest::new("sh")
            .args(["-c", "test \"$BUILD_MARKER\" = fork && test -z \"$HOME\""])
            .env(env);
        let _child = spawn_child(request, ActiveHandles::new(), tx).unwrap();
        assert!(wait_exit(&mut rx).await.is_success());
    }

    #[tokio::test]
    async fn message_port_lands_on_descriptor_three() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = SpawnRequest::new("sh")
            .args([
                "-c",
                "test \"$BUILDFORK_CHANNEL_FD\" = 3 && printf '{\"type\":\"completion_notice\"}\\n' >&3",
            ])
            .message_port(true);
        let mut child = spawn_child(request, ActiveHandles::new(), tx).unwrap();

        let port = child.take_message_port().unwrap();
        let registry = ActiveHandles::new();
        let mut channel = MessageChannel::new(port, &registry);
        let (events, mut notices) = mpsc::unbounded_channel();
        channel.listen(events).unwrap();

        assert_eq!(
            notices.recv().await,
            Some(HostEvent::Notice(ShutdownSignal::CompletionNotice))
        );
    }
}
