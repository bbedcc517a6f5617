//! Terminal resize propagation

use tracing::{debug, warn};

use buildfork_host_api::StdioChannel;

use crate::ShutdownCoordinator;

/// Follows the parent terminal's geometry. Only registered on hosts with
/// POSIX signals, since pipes have no geometry.
#[derive(Debug, Default)]
pub struct ResizePropagator {
    propagated: usize,
}

impl ResizePropagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resize events handled so far
    pub fn propagated(&self) -> usize {
        self.propagated
    }

    /// Resize every channel that has a parent geometry, then send one resize
    /// notice to the child. Failures are logged and never end the session.
    pub async fn propagate(
        &mut self,
        channels: &mut [Box<dyn StdioChannel>],
        coordinator: &mut ShutdownCoordinator,
    ) {
        for channel in channels.iter_mut() {
            let Some(size) = channel.parent_size() else {
                continue;
            };
            match channel.resize(size) {
                Ok(()) => debug!(stream = %channel.stream(), cols = size.cols, rows = size.rows, "Propagated resize"),
                Err(e) => warn!(stream = %channel.stream(), error = %e, "Failed to resize channel"),
            }
        }

        if let Err(e) = coordinator.notify_resize().await {
            warn!(error = %e, "Failed to send resize notice to child");
        }
        self.propagated += 1;
    }
}
