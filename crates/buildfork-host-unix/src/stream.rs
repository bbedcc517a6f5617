//! Output stream factory

use tracing::debug;

use buildfork_host_api::{ChannelKind, HostCapabilities, HostResult, StdioChannel};

use crate::pipe::PipeChannel;
use crate::pty::PtyChannel;
use crate::terminal::ParentStream;

/// Builds the stdio channel for one of the child's output streams.
///
/// Only the chosen variant is constructed. A PTY that cannot be allocated is
/// an error; there is no fallback to a pipe.
#[derive(Debug, Clone, Copy)]
pub struct OutputStreamFactory {
    capabilities: HostCapabilities,
}

impl OutputStreamFactory {
    pub fn new(capabilities: HostCapabilities) -> Self {
        Self { capabilities }
    }

    pub fn create(&self, parent: ParentStream) -> HostResult<Box<dyn StdioChannel>> {
        let kind = self.capabilities.channel_kind(parent.is_terminal());
        debug!(stream = %parent.name(), ?kind, "Creating output channel");

        match kind {
            ChannelKind::Pty => Ok(Box::new(PtyChannel::new(parent)?)),
            ChannelKind::Pipe => Ok(Box::new(PipeChannel::new(parent))),
        }
    }
}
