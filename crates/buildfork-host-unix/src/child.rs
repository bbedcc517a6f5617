//! Child side of the parent/child link
//!
//! The forked child uses the message port when the parent passed one
//! (advertised by `BUILDFORK_CHANNEL_FD`) and falls back to signals aimed
//! at the parent pid otherwise.

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::Signal;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use buildfork_host_api::{
    ActiveHandles, HostError, HostEvent, HostResult, MessageChannel, MessagePort, ShutdownChannel,
    ShutdownSignal, Transport,
};
use buildfork_util::CHANNEL_FD_ENV;

use crate::signals::{install, send_signal, TERMINATION_SIGNALS};

/// Sends the completion notice to the parent. Cheap to clone, usable from
/// synchronous code.
#[derive(Debug, Clone)]
pub enum CompletionNotifier {
    Signal { ppid: u32 },
    Message(mpsc::UnboundedSender<ShutdownSignal>),
}

impl CompletionNotifier {
    pub fn notify(&self) -> HostResult<()> {
        match self {
            CompletionNotifier::Signal { ppid } => send_signal(*ppid, Signal::SIGUSR2),
            CompletionNotifier::Message(tx) => tx
                .send(ShutdownSignal::CompletionNotice)
                .map_err(|_| HostError::Internal("message port writer is gone".into())),
        }
    }
}

/// Link from the forked child back to its launcher
pub struct ParentLink {
    ppid: u32,
    transport: Transport,
    outgoing: Option<mpsc::UnboundedSender<ShutdownSignal>>,
    close: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
    notices: Option<mpsc::UnboundedReceiver<HostEvent>>,
    watchers: Vec<JoinHandle<()>>,
}

impl ParentLink {
    /// Open the link the parent set up for this process
    pub fn from_env(ppid: u32) -> HostResult<Self> {
        match std::env::var(CHANNEL_FD_ENV) {
            Ok(value) => {
                let fd: RawFd = value.parse().map_err(|_| {
                    HostError::Internal(format!("{} is not a descriptor: {:?}", CHANNEL_FD_ENV, value))
                })?;
                let port = adopt_port(fd)?;
                debug!(fd, "Using message port to reach parent");
                Ok(Self::message(ppid, port))
            }
            Err(_) => Self::signals(ppid),
        }
    }

    /// Link over OS signals: completion as `SIGUSR2` to the parent, resize and
    /// termination as signals received here
    pub fn signals(ppid: u32) -> HostResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watchers = Vec::new();

        let mut winch = install(Signal::SIGWINCH)?;
        let resize_tx = tx.clone();
        watchers.push(tokio::spawn(async move {
            while winch.recv().await.is_some() {
                if resize_tx.send(HostEvent::Notice(ShutdownSignal::ResizeNotice)).is_err() {
                    break;
                }
            }
        }));

        for sig in TERMINATION_SIGNALS {
            let mut stream = install(sig)?;
            let tx = tx.clone();
            watchers.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    let notice = ShutdownSignal::TerminationRequest { signal: sig as i32 };
                    if tx.send(HostEvent::Notice(notice)).is_err() {
                        break;
                    }
                }
            }));
        }

        Ok(Self {
            ppid,
            transport: Transport::Signals,
            outgoing: None,
            close: None,
            writer: None,
            notices: Some(rx),
            watchers,
        })
    }

    /// Link over a message port
    pub fn message(ppid: u32, port: MessagePort) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ShutdownSignal>();

        let registry = ActiveHandles::new();
        let mut channel = MessageChannel::new(port, &registry);
        channel.unref();
        if let Err(e) = channel.listen(events_tx) {
            warn!(error = %e, "Failed to listen on message port");
        }

        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let writer = tokio::spawn(async move {
            let mut closing = false;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut close_rx, if !closing => {
                        // Queued notices are still delivered; new sends fail.
                        out_rx.close();
                        closing = true;
                    }
                    signal = out_rx.recv() => match signal {
                        Some(signal) => {
                            if let Err(e) = channel.send(signal).await {
                                warn!(error = %e, "Failed to send message to parent");
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            ppid,
            transport: Transport::Message,
            outgoing: Some(out_tx),
            close: Some(close_tx),
            writer: Some(writer),
            notices: Some(events_rx),
            watchers: Vec::new(),
        }
    }

    pub fn ppid(&self) -> u32 {
        self.ppid
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn notifier(&self) -> CompletionNotifier {
        match &self.outgoing {
            Some(tx) => CompletionNotifier::Message(tx.clone()),
            None => CompletionNotifier::Signal { ppid: self.ppid },
        }
    }

    /// Notices from the parent, as [`HostEvent::Notice`]. Can only be taken once.
    pub fn take_notices(&mut self) -> Option<mpsc::UnboundedReceiver<HostEvent>> {
        self.notices.take()
    }

    /// Flush anything still queued for the parent.
    ///
    /// Notifiers still held elsewhere stop working once this is called.
    pub async fn finish(mut self) {
        self.outgoing = None;
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
    }
}

impl Drop for ParentLink {
    fn drop(&mut self) {
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
    }
}

/// Take ownership of the inherited message port descriptor
fn adopt_port(fd: RawFd) -> HostResult<MessagePort> {
    // Fails with EBADF unless the descriptor is open.
    fcntl(fd, FcntlArg::F_GETFD)
        .map_err(|e| HostError::Internal(format!("message port fd {} unusable: {}", fd, e)))?;
    // Processes started by the build must not inherit the port.
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map_err(|e| HostError::Internal(format!("message port fd {}: {}", fd, e)))?;

    // SAFETY: the descriptor is open and nothing else in this process owns it.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    let stream = StdUnixStream::from(owned);
    stream.set_nonblocking(true)?;
    let (reader, writer) = UnixStream::from_std(stream)?.into_split();
    Ok(MessagePort::new(reader, writer))
}
