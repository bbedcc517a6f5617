//! Pseudo-terminal stdio channel
//!
//! The child gets the slave side as its stdout or stderr, so it formats
//! output (colors, progress bars) exactly as it would when run directly in
//! the parent's terminal. The parent reads the master side and forwards the
//! bytes to its own stream.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::openpty;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use buildfork_host_api::{
    ChannelKind, ChildHandle, ChildStdio, HandleRef, HostError, HostResult, StdName, StdioChannel,
    WindowSize,
};

use crate::relay::spawn_relay;
use crate::terminal::{read_window_size, set_window_size, winsize, ParentStream};

/// Errors setting up or driving a pseudo-terminal
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to allocate pseudo-terminal: {0}")]
    Allocation(#[source] Errno),

    #[error("failed to make PTY master non-blocking: {0}")]
    NonBlocking(#[source] Errno),

    #[error("failed to register PTY master with the reactor: {0}")]
    Register(#[source] io::Error),

    #[error("failed to set PTY window size: {0}")]
    Resize(#[source] Errno),
}

impl From<PtyError> for HostError {
    fn from(e: PtyError) -> Self {
        HostError::Terminal(e.to_string())
    }
}

/// Async reader over the PTY master. EIO (every slave closed) reads as EOF.
pub struct PtyMaster {
    fd: Arc<AsyncFd<OwnedFd>>,
}

impl AsyncRead for PtyMaster {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();

            match guard.try_io(|inner| {
                nix::unistd::read(inner.as_raw_fd(), unfilled).map_err(io::Error::from)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// [`StdioChannel`] backed by a pseudo-terminal
pub struct PtyChannel {
    stream: StdName,
    master: Option<Arc<AsyncFd<OwnedFd>>>,
    slave: Option<OwnedFd>,
    parent: Option<ParentStream>,
    parent_fd: Option<i32>,
    relay: Option<JoinHandle<()>>,
    keep_alive: Option<HandleRef>,
}

impl PtyChannel {
    /// Allocate a PTY sized like the parent's terminal
    pub fn new(parent: ParentStream) -> Result<Self, PtyError> {
        let size = parent.window_size();
        let pty = openpty(size.map(winsize).as_ref(), None).map_err(PtyError::Allocation)?;

        set_nonblocking(&pty.master)?;
        let master = AsyncFd::new(pty.master).map_err(PtyError::Register)?;

        debug!(stream = %parent.name(), ?size, "Allocated pseudo-terminal");

        Ok(Self {
            stream: parent.name(),
            master: Some(Arc::new(master)),
            slave: Some(pty.slave),
            parent_fd: parent.is_terminal().then(|| parent.raw_fd()).flatten(),
            parent: Some(parent),
            relay: None,
            keep_alive: None,
        })
    }

    /// Current geometry of the PTY itself
    pub fn window_size(&self) -> Option<WindowSize> {
        let master = self.master.as_ref()?;
        read_window_size(master.as_raw_fd())
    }
}

#[async_trait]
impl StdioChannel for PtyChannel {
    fn stream(&self) -> StdName {
        self.stream
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Pty
    }

    fn child_stdio(&mut self) -> HostResult<ChildStdio> {
        self.slave
            .take()
            .map(ChildStdio::Terminal)
            .ok_or_else(|| HostError::ChannelInUse(format!("{} PTY slave already taken", self.stream)))
    }

    fn listen(&mut self, child: &mut ChildHandle) -> HostResult<()> {
        let master = self
            .master
            .clone()
            .ok_or_else(|| HostError::Terminal(format!("{} PTY already destroyed", self.stream)))?;
        let parent = self
            .parent
            .take()
            .ok_or_else(|| HostError::ChannelInUse(format!("{} PTY already listening", self.stream)))?;

        // The child holds its own copy of the slave now.
        self.slave = None;

        self.keep_alive = Some(child.registry().register(self.stream.as_str()));
        self.relay = Some(spawn_relay(
            self.stream,
            PtyMaster { fd: master },
            parent.into_sink(),
        ));
        debug!(stream = %self.stream, pid = child.pid(), "Relaying PTY output");
        Ok(())
    }

    fn unref(&mut self) {
        if let Some(keep_alive) = self.keep_alive.as_mut() {
            keep_alive.unref();
        }
    }

    fn parent_size(&self) -> Option<WindowSize> {
        self.parent_fd.and_then(read_window_size)
    }

    fn resize(&mut self, size: WindowSize) -> HostResult<()> {
        let Some(master) = self.master.as_ref() else {
            return Ok(());
        };
        let ws = winsize(size);
        // SAFETY: `ws` is a valid winsize and the master fd is open.
        unsafe { set_window_size(master.as_raw_fd(), &ws) }.map_err(PtyError::Resize)?;
        debug!(stream = %self.stream, cols = size.cols, rows = size.rows, "Resized PTY");
        Ok(())
    }

    async fn drained(&mut self) {
        if let Some(relay) = self.relay.take() {
            if let Err(e) = relay.await {
                if !e.is_cancelled() {
                    warn!(stream = %self.stream, error = %e, "PTY relay task failed");
                }
            }
        }
    }

    fn destroy(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        self.slave = None;
        self.master = None;
        debug!(stream = %self.stream, "Destroyed PTY");
    }
}

fn set_nonblocking(fd: &OwnedFd) -> Result<(), PtyError> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL).map_err(PtyError::NonBlocking)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(PtyError::NonBlocking)?;
    Ok(())
}
