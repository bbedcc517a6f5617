//! Fork session event loop

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use buildfork_host_api::{
    ActiveHandles, ChannelKind, ChildHandle, ExitStatus, HostEvent, ProcessHost, StdioChannel,
};

use crate::{CoordinatorState, CoreError, CoreResult, ResizePropagator, ShutdownCoordinator};

/// How a fork session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The child sent its completion notice and nothing keeps the parent alive
    Detached,
    /// The child closed before detaching
    ChildClosed { status: ExitStatus },
    /// The parent received a termination signal
    ParentTerminated { signal: i32 },
}

impl SessionEnd {
    /// Exit code for the parent process
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionEnd::Detached => 0,
            SessionEnd::ChildClosed { status } => status.exit_code(),
            SessionEnd::ParentTerminated { signal } => 128 + signal,
        }
    }
}

/// A running forked child with its channels
pub struct ForkSession<H: ProcessHost> {
    host: Arc<H>,
    child: ChildHandle,
    channels: Vec<Box<dyn StdioChannel>>,
    coordinator: ShutdownCoordinator,
    resize: Option<ResizePropagator>,
    events: mpsc::UnboundedReceiver<HostEvent>,
}

impl<H: ProcessHost> ForkSession<H> {
    pub(crate) fn new(
        host: Arc<H>,
        child: ChildHandle,
        channels: Vec<Box<dyn StdioChannel>>,
        coordinator: ShutdownCoordinator,
        resize: Option<ResizePropagator>,
        events: mpsc::UnboundedReceiver<HostEvent>,
    ) -> Self {
        Self {
            host,
            child,
            channels,
            coordinator,
            resize,
            events,
        }
    }

    pub fn child(&self) -> &ChildHandle {
        &self.child
    }

    pub fn active_handles(&self) -> &ActiveHandles {
        self.host.active_handles()
    }

    pub fn coordinator_state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    pub fn channel_kinds(&self) -> Vec<ChannelKind> {
        self.channels.iter().map(|c| c.kind()).collect()
    }

    pub fn resize_propagator(&self) -> Option<&ResizePropagator> {
        self.resize.as_ref()
    }

    /// React to host events until the session ends.
    ///
    /// The loop finishes when the child closes, the parent is signalled, or no
    /// handle keeps the parent alive any more. Whatever the outcome, the exit
    /// code is passed to the coordinator so a termination can be forwarded.
    pub async fn run(&mut self) -> CoreResult<SessionEnd> {
        let handles = self.host.active_handles().clone();

        let end = loop {
            tokio::select! {
                biased;

                event = self.events.recv() => {
                    let event = event.ok_or(CoreError::EventsClosed)?;
                    if let Some(end) = self.handle_event(event).await {
                        break end;
                    }
                }
                _ = handles.idle() => {
                    debug!("No handle keeps the parent alive");
                    break SessionEnd::Detached;
                }
            }
        };

        info!(?end, exit_code = end.exit_code(), "Fork session ended");
        if let Err(e) = self.coordinator.on_parent_exit(end.exit_code()).await {
            warn!(error = %e, "Failed to forward termination to child");
        }
        Ok(end)
    }

    async fn handle_event(&mut self, event: HostEvent) -> Option<SessionEnd> {
        match event {
            HostEvent::Exited { pid, status } if pid == self.child.pid() => {
                info!(pid, ?status, "Child closed");
                for channel in &mut self.channels {
                    channel.drained().await;
                    channel.destroy();
                }
                let detached = self.coordinator.is_detached();
                self.coordinator.on_child_closed();

                Some(if detached {
                    SessionEnd::Detached
                } else {
                    SessionEnd::ChildClosed { status }
                })
            }
            HostEvent::Exited { pid, .. } => {
                debug!(pid, "Ignoring exit of unrelated process");
                None
            }
            HostEvent::Notice(notice) => {
                self.coordinator.on_notice(notice, &mut self.child);
                None
            }
            HostEvent::ParentResized => {
                if let Some(resize) = self.resize.as_mut() {
                    resize
                        .propagate(&mut self.channels, &mut self.coordinator)
                        .await;
                }
                None
            }
            HostEvent::ParentSignaled { signal } => {
                info!(signal, "Parent received termination signal");
                Some(SessionEnd::ParentTerminated { signal })
            }
        }
    }
}
