//! Unix host adapter implementation

use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use buildfork_host_api::{
    ActiveHandles, ChildHandle, HostCapabilities, HostError, HostEvent, HostResult, ProcessHost,
    ShutdownChannel, SpawnRequest, StdName, StdioChannel,
};

use crate::process::spawn_child;
use crate::signals::{install, SignalChannel, TERMINATION_SIGNALS};
use crate::stream::OutputStreamFactory;
use crate::system;
use crate::terminal::ParentStream;

/// Unix host adapter
pub struct UnixHost {
    capabilities: HostCapabilities,
    handles: ActiveHandles,
    factory: OutputStreamFactory,
    /// Overrides for the parent's stdout/stderr
    parent_streams: Mutex<HashMap<StdName, ParentStream>>,
    /// `SIGUSR2` listener, installed by `watch_parent` before spawn
    completion: Mutex<Option<tokio::signal::unix::Signal>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<HostEvent>>>,
}

impl UnixHost {
    pub fn new(capabilities: HostCapabilities) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            capabilities,
            handles: ActiveHandles::new(),
            factory: OutputStreamFactory::new(capabilities),
            parent_streams: Mutex::new(HashMap::new()),
            completion: Mutex::new(None),
            watchers: Mutex::new(Vec::new()),
            event_tx: tx,
            event_rx: Mutex::new(Some(rx)),
        }
    }

    /// Relay a child stream somewhere other than the process's own stream
    pub fn with_parent_stream(self, stream: ParentStream) -> Self {
        lock(&self.parent_streams).insert(stream.name(), stream);
        self
    }

    fn forward_signal(&self, sig: Signal, event: HostEvent) -> HostResult<JoinHandle<()>> {
        let mut stream = install(sig)?;
        let tx = self.event_tx.clone();
        Ok(tokio::spawn(async move {
            while stream.recv().await.is_some() {
                debug!(signal = %sig, "Parent received signal");
                if tx.send(event.clone()).is_err() {
                    break;
                }
            }
        }))
    }
}

impl Default for UnixHost {
    fn default() -> Self {
        Self::new(HostCapabilities::probe())
    }
}

impl Drop for UnixHost {
    fn drop(&mut self) {
        for watcher in lock(&self.watchers).drain(..) {
            watcher.abort();
        }
    }
}

#[async_trait]
impl ProcessHost for UnixHost {
    fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }

    fn active_handles(&self) -> &ActiveHandles {
        &self.handles
    }

    fn total_memory(&self) -> HostResult<u64> {
        system::total_memory()
    }

    fn create_output(&self, stream: StdName) -> HostResult<Box<dyn StdioChannel>> {
        let parent = lock(&self.parent_streams)
            .remove(&stream)
            .unwrap_or_else(|| ParentStream::for_stream(stream));
        self.factory.create(parent)
    }

    fn watch_parent(&self) -> HostResult<()> {
        let mut watchers = lock(&self.watchers);
        if !watchers.is_empty() {
            return Ok(());
        }

        if self.capabilities.posix_signals {
            *lock(&self.completion) = Some(install(Signal::SIGUSR2)?);
            watchers.push(self.forward_signal(Signal::SIGWINCH, HostEvent::ParentResized)?);
        }

        for sig in TERMINATION_SIGNALS {
            let event = HostEvent::ParentSignaled { signal: sig as i32 };
            watchers.push(self.forward_signal(sig, event)?);
        }

        info!(posix_signals = self.capabilities.posix_signals, "Watching parent signals");
        Ok(())
    }

    async fn spawn(&self, request: SpawnRequest) -> HostResult<ChildHandle> {
        spawn_child(request, self.handles.clone(), self.event_tx.clone())
    }

    fn signal_channel(&self, pid: u32) -> Box<dyn ShutdownChannel> {
        Box::new(SignalChannel::new(pid, lock(&self.completion).take()))
    }

    fn subscribe(&self) -> HostResult<mpsc::UnboundedReceiver<HostEvent>> {
        lock(&self.event_rx)
            .take()
            .ok_or_else(|| HostError::Internal("subscribe() can only be called once".into()))
    }

    fn event_sender(&self) -> mpsc::UnboundedSender<HostEvent> {
        self.event_tx.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildfork_host_api::{ChannelKind, ExitStatus};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn spawn_and_exit() {
        let host = UnixHost::new(HostCapabilities::posix());
        let mut rx = host.subscribe().unwrap();

        let child = host.spawn(SpawnRequest::new("true")).await.unwrap();
        let pid = child.pid();

        assert_eq!(
            rx.recv().await,
            Some(HostEvent::Exited {
                pid,
                status: ExitStatus::success()
            })
        );
        assert!(host.subscribe().is_err());
    }

    #[tokio::test]
    async fn relays_to_configured_parent_stream() {
        let (sink, mut parent) = tokio::io::duplex(1024);
        let host = UnixHost::new(HostCapabilities::posix())
            .with_parent_stream(ParentStream::with_writer(StdName::Stdout, false, sink));
        let mut rx = host.subscribe().unwrap();

        let mut stdout = host.create_output(StdName::Stdout).unwrap();
        assert_eq!(stdout.kind(), ChannelKind::Pipe);

        let request = SpawnRequest::new("echo")
            .args(["hello"])
            .stdio(StdName::Stdout, stdout.child_stdio().unwrap());
        let mut child = host.spawn(request).await.unwrap();
        stdout.listen(&mut child).unwrap();
        stdout.unref();

        assert!(matches!(rx.recv().await, Some(HostEvent::Exited { .. })));
        stdout.drained().await;
        stdout.destroy();

        let mut out = String::new();
        parent.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn total_memory_is_known() {
        let host = UnixHost::default();
        assert!(host.total_memory().unwrap() > 0);
    }
}
