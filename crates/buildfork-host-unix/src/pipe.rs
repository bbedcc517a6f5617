//! Plain pipe stdio channel

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use buildfork_host_api::{
    ChannelKind, ChildHandle, ChildStdio, HandleRef, HostError, HostResult, StdName, StdioChannel,
    WindowSize,
};

use crate::relay::spawn_relay;
use crate::terminal::ParentStream;

/// [`StdioChannel`] over an OS pipe created at spawn time
pub struct PipeChannel {
    stream: StdName,
    parent: Option<ParentStream>,
    relay: Option<JoinHandle<()>>,
    keep_alive: Option<HandleRef>,
}

impl PipeChannel {
    pub fn new(parent: ParentStream) -> Self {
        Self {
            stream: parent.name(),
            parent: Some(parent),
            relay: None,
            keep_alive: None,
        }
    }
}

#[async_trait]
impl StdioChannel for PipeChannel {
    fn stream(&self) -> StdName {
        self.stream
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Pipe
    }

    fn child_stdio(&mut self) -> HostResult<ChildStdio> {
        Ok(ChildStdio::Piped)
    }

    fn listen(&mut self, child: &mut ChildHandle) -> HostResult<()> {
        let output = child.take_output(self.stream).ok_or_else(|| {
            HostError::Internal(format!("child {} has no piped {}", child.pid(), self.stream))
        })?;
        let parent = self
            .parent
            .take()
            .ok_or_else(|| HostError::ChannelInUse(format!("{} pipe already listening", self.stream)))?;

        self.keep_alive = Some(child.registry().register(self.stream.as_str()));
        self.relay = Some(spawn_relay(self.stream, output, parent.into_sink()));
        debug!(stream = %self.stream, pid = child.pid(), "Relaying pipe output");
        Ok(())
    }

    fn unref(&mut self) {
        if let Some(keep_alive) = self.keep_alive.as_mut() {
            keep_alive.unref();
        }
    }

    fn parent_size(&self) -> Option<WindowSize> {
        None
    }

    fn resize(&mut self, _size: WindowSize) -> HostResult<()> {
        Ok(())
    }

    async fn drained(&mut self) {
        if let Some(relay) = self.relay.take() {
            if let Err(e) = relay.await {
                warn!(stream = %self.stream, error = %e, "Pipe relay task failed");
            }
        }
    }

    fn destroy(&mut self) {}
}
