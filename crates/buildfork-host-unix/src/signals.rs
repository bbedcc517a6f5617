//! POSIX signal transport

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal as listen_for, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use buildfork_host_api::{
    HostError, HostEvent, HostResult, ShutdownChannel, ShutdownSignal, Transport,
};

/// Parent termination signals that end the fork session
pub const TERMINATION_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// OS signal carrying a [`ShutdownSignal`]
pub fn os_signal(notice: ShutdownSignal) -> HostResult<Signal> {
    match notice {
        ShutdownSignal::CompletionNotice => Ok(Signal::SIGUSR2),
        ShutdownSignal::ResizeNotice => Ok(Signal::SIGWINCH),
        ShutdownSignal::TerminationRequest { signal } => Signal::try_from(signal)
            .map_err(|e| HostError::Signal(format!("invalid signal {}: {}", signal, e))),
    }
}

/// Send `sig` to `pid`. A process that is already gone is not an error.
pub fn send_signal(pid: u32, sig: Signal) -> HostResult<()> {
    let target = i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| HostError::Signal(format!("pid {} out of range", pid)))?;

    match signal::kill(target, sig) {
        Ok(()) => {
            debug!(pid, signal = %sig, "Sent signal");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!(pid, signal = %sig, "Process already gone");
            Ok(())
        }
        Err(e) => Err(HostError::Signal(format!(
            "Failed to send {} to {}: {}",
            sig, pid, e
        ))),
    }
}

/// Listener for a single signal kind
pub fn install(sig: Signal) -> HostResult<tokio::signal::unix::Signal> {
    Ok(listen_for(SignalKind::from_raw(sig as i32))?)
}

/// Shutdown channel talking to the child with OS signals.
///
/// Completion notices arrive as `SIGUSR2` on the parent. The listener must be
/// installed before the child is spawned so an early notice is neither lost
/// nor fatal to the parent.
pub struct SignalChannel {
    pid: u32,
    completion: Option<tokio::signal::unix::Signal>,
    listener: Option<JoinHandle<()>>,
}

impl SignalChannel {
    pub fn new(pid: u32, completion: Option<tokio::signal::unix::Signal>) -> Self {
        Self {
            pid,
            completion,
            listener: None,
        }
    }
}

#[async_trait]
impl ShutdownChannel for SignalChannel {
    fn transport(&self) -> Transport {
        Transport::Signals
    }

    fn listen(&mut self, events: mpsc::UnboundedSender<HostEvent>) -> HostResult<()> {
        let mut completion = self
            .completion
            .take()
            .ok_or_else(|| HostError::ChannelInUse("SIGUSR2 listener not available".into()))?;

        self.listener = Some(tokio::spawn(async move {
            while completion.recv().await.is_some() {
                trace!("Received SIGUSR2");
                if events
                    .send(HostEvent::Notice(ShutdownSignal::CompletionNotice))
                    .is_err()
                {
                    break;
                }
            }
        }));
        Ok(())
    }

    /// Signal listeners never keep the parent alive
    fn unref(&mut self) {}

    async fn send(&mut self, notice: ShutdownSignal) -> HostResult<()> {
        send_signal(self.pid, os_signal(notice)?)
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn notices_map_to_signals() {
        assert_eq!(os_signal(ShutdownSignal::CompletionNotice).unwrap(), Signal::SIGUSR2);
        assert_eq!(os_signal(ShutdownSignal::ResizeNotice).unwrap(), Signal::SIGWINCH);
        assert_eq!(
            os_signal(ShutdownSignal::TerminationRequest { signal: 15 }).unwrap(),
            Signal::SIGTERM
        );
        assert!(os_signal(ShutdownSignal::TerminationRequest { signal: 999 }).is_err());
    }

    #[tokio::test]
    async fn signalling_a_gone_process_is_ok() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        assert!(send_signal(pid, Signal::SIGTERM).is_ok());
    }

    #[tokio::test]
    async fn sigusr2_becomes_completion_notice() {
        let completion = install(Signal::SIGUSR2).unwrap();
        let mut channel = SignalChannel::new(std::process::id(), Some(completion));
        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.listen(tx).unwrap();

        send_signal(std::process::id(), Signal::SIGUSR2).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(HostEvent::Notice(ShutdownSignal::CompletionNotice))
        );
        assert!(channel.listen(mpsc::unbounded_channel().0).is_err());
    }
}
