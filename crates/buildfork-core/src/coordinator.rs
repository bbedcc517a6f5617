//! Completion handshake and termination forwarding

use tokio::sync::mpsc;
use tracing::{debug, info};

use buildfork_host_api::{
    ChildHandle, HostEvent, MessageChannel, ProcessHost, ShutdownChannel, ShutdownSignal,
    Transport,
};

use crate::CoreResult;

/// Where the handshake with the child stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Connected,
    CompletionNoticeReceived,
    Detached,
    Terminating { signal: i32 },
    Closed,
}

/// Signal to forward for a parent exit code, following the 128 + n convention
pub fn forwarded_signal(exit_code: i32) -> Option<i32> {
    (exit_code > 128).then(|| exit_code - 128)
}

/// Owns the shutdown channel to the child
pub struct ShutdownCoordinator {
    pid: u32,
    channel: Box<dyn ShutdownChannel>,
    state: CoordinatorState,
}

impl ShutdownCoordinator {
    /// Pick the transport for `child` and start listening for its notices.
    ///
    /// A message port on the child means the message transport; otherwise the
    /// host's signal channel is used. The channel never keeps the parent alive.
    pub fn connect<H: ProcessHost>(
        host: &H,
        child: &mut ChildHandle,
        events: mpsc::UnboundedSender<HostEvent>,
    ) -> CoreResult<Self> {
        let mut channel: Box<dyn ShutdownChannel> = match child.take_message_port() {
            Some(port) => Box::new(MessageChannel::new(port, host.active_handles())),
            None => host.signal_channel(child.pid()),
        };
        channel.unref();
        channel.listen(events)?;

        info!(pid = child.pid(), transport = ?channel.transport(), "Shutdown channel connected");

        Ok(Self {
            pid: child.pid(),
            channel,
            state: CoordinatorState::Connected,
        })
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn transport(&self) -> Transport {
        self.channel.transport()
    }

    pub fn is_detached(&self) -> bool {
        self.state == CoordinatorState::Detached
    }

    /// Handle a notice from the child. Returns true when the child was
    /// detached by it.
    pub fn on_notice(&mut self, notice: ShutdownSignal, child: &mut ChildHandle) -> bool {
        match (notice, self.state) {
            (ShutdownSignal::CompletionNotice, CoordinatorState::Connected) => {
                self.state = CoordinatorState::CompletionNoticeReceived;
                child.unref();
                self.state = CoordinatorState::Detached;
                info!(pid = self.pid, "Completion notice received, detaching from child");
                true
            }
            (notice, state) => {
                debug!(pid = self.pid, ?notice, ?state, "Ignoring notice from child");
                false
            }
        }
    }

    /// The child closed; nothing is forwarded to it from now on
    pub fn on_child_closed(&mut self) {
        self.state = CoordinatorState::Closed;
    }

    /// The parent is exiting with `exit_code`. Codes above 128 are forwarded
    /// to a child that is still tracked.
    pub async fn on_parent_exit(&mut self, exit_code: i32) -> CoreResult<()> {
        if self.state == CoordinatorState::Closed {
            return Ok(());
        }

        if let Some(signal) = forwarded_signal(exit_code) {
            self.state = CoordinatorState::Terminating { signal };
            info!(pid = self.pid, signal, "Forwarding termination to child");
            self.channel
                .send(ShutdownSignal::TerminationRequest { signal })
                .await?;
        }
        Ok(())
    }

    /// Tell the child its terminal was resized
    pub async fn notify_resize(&mut self) -> CoreResult<()> {
        if self.state == CoordinatorState::Closed {
            return Ok(());
        }
        self.channel.send(ShutdownSignal::ResizeNotice).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildfork_host_api::{HostCapabilities, MockHost, SpawnRequest};
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn forwarded_signals() {
        assert_eq!(forwarded_signal(130), Some(2));
        assert_eq!(forwarded_signal(137), Some(9));
        assert_eq!(forwarded_signal(143), Some(15));
        for code in [0, 1, 2, 127, 128] {
            assert_eq!(forwarded_signal(code), None);
        }
    }

    async fn connected(host: &MockHost, message_port: bool) -> (ChildHandle, ShutdownCoordinator) {
        let mut child = host
            .spawn(SpawnRequest::new("node").message_port(message_port))
            .await
            .unwrap();
        let coordinator = ShutdownCoordinator::connect(host, &mut child, host.event_sender()).unwrap();
        (child, coordinator)
    }

    #[tokio::test]
    async fn completion_notice_detaches_once() {
        let host = MockHost::new();
        let (mut child, mut coordinator) = connected(&host, false).await;
        assert_eq!(coordinator.transport(), Transport::Signals);
        assert!(child.is_ref());

        assert!(coordinator.on_notice(ShutdownSignal::CompletionNotice, &mut child));
        assert_eq!(coordinator.state(), CoordinatorState::Detached);
        assert!(!child.is_ref());
        assert_eq!(host.active_handles().count(), 0);

        assert!(!coordinator.on_notice(ShutdownSignal::CompletionNotice, &mut child));
        assert!(!coordinator.on_notice(ShutdownSignal::ResizeNotice, &mut child));
    }

    #[tokio::test]
    async fn parent_exit_forwarding() {
        let host = MockHost::new();
        let (child, mut coordinator) = connected(&host, false).await;

        coordinator.on_parent_exit(1).await.unwrap();
        assert!(host.sent_signals().is_empty());

        coordinator.on_parent_exit(137).await.unwrap();
        assert_eq!(
            host.sent_signals(),
            vec![(child.pid(), ShutdownSignal::TerminationRequest { signal: 9 })]
        );
        assert_eq!(coordinator.state(), CoordinatorState::Terminating { signal: 9 });
    }

    #[tokio::test]
    async fn nothing_forwarded_after_close() {
        let host = MockHost::new();
        let (_child, mut coordinator) = connected(&host, false).await;

        coordinator.on_child_closed();
        coordinator.on_parent_exit(130).await.unwrap();
        coordinator.notify_resize().await.unwrap();
        assert!(host.sent_signals().is_empty());
    }

    #[tokio::test]
    async fn message_transport_when_port_present() {
        let host = MockHost::new().with_capabilities(HostCapabilities::minimal());
        let (_child, mut coordinator) = connected(&host, true).await;
        assert_eq!(coordinator.transport(), Transport::Message);
        // The message port never keeps the parent alive; the child does.
        assert_eq!(host.active_handles().count(), 1);

        coordinator.on_parent_exit(130).await.unwrap();
        let port = host.take_child_port().unwrap();
        let mut lines = BufReader::new(port).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(
            ShutdownSignal::decode(&line),
            Some(ShutdownSignal::TerminationRequest { signal: 2 })
        );
        assert!(host.sent_signals().is_empty());
    }
}
