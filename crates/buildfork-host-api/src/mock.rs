//! Mock process host for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    ActiveHandles, ChannelKind, ChildHandle, ChildStdio, ExitStatus, HandleRef, HostCapabilities,
    HostError, HostEvent, HostResult, MessagePort, ProcessHost, ShutdownChannel, ShutdownSignal,
    SpawnRequest, StdName, StdioChannel, Transport, WindowSize,
};

/// Geometry reported by the mock parent terminal
pub const MOCK_WINDOW_SIZE: WindowSize = WindowSize { cols: 120, rows: 40 };

/// A spawn recorded by [`MockHost`]
#[derive(Debug, Clone)]
pub struct MockSpawn {
    pub pid: u32,
    pub program: String,
    pub args: Vec<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub detached: bool,
    pub message_port: bool,
}

/// What happened to a [`MockStdioChannel`]
#[derive(Debug, Clone, Default)]
pub struct MockChannelLog {
    pub kind: Option<ChannelKind>,
    pub listened: bool,
    pub unrefs: usize,
    pub resizes: Vec<WindowSize>,
    pub destroyed: bool,
    pub received: Vec<u8>,
}

type ChannelLogs = Arc<Mutex<HashMap<StdName, Arc<Mutex<MockChannelLog>>>>>;

/// Mock host adapter for unit/integration testing
pub struct MockHost {
    capabilities: HostCapabilities,
    handles: ActiveHandles,
    next_pid: AtomicU32,
    total_memory: u64,
    parent_terminal: bool,
    watching: AtomicBool,
    outputs: Mutex<HashMap<StdName, Vec<u8>>>,
    spawned: Arc<Mutex<Vec<MockSpawn>>>,
    sent: Arc<Mutex<Vec<(u32, ShutdownSignal)>>>,
    channels: ChannelLogs,
    child_ports: Mutex<Vec<DuplexStream>>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<HostEvent>>>,

    /// Configure spawn to fail
    pub fail_spawn: Arc<Mutex<bool>>,

    /// Configure `listen` on this stream's channel to fail
    pub fail_listen: Arc<Mutex<Option<StdName>>>,
}

impl MockHost {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            capabilities: HostCapabilities::posix(),
            handles: ActiveHandles::new(),
            next_pid: AtomicU32::new(4000),
            total_memory: 16 * 1024 * 1024 * 1024,
            parent_terminal: true,
            watching: AtomicBool::new(false),
            outputs: Mutex::new(HashMap::new()),
            spawned: Arc::new(Mutex::new(Vec::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            channels: Arc::new(Mutex::new(HashMap::new())),
            child_ports: Mutex::new(Vec::new()),
            event_tx: tx,
            event_rx: Mutex::new(Some(rx)),
            fail_spawn: Arc::new(Mutex::new(false)),
            fail_listen: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_capabilities(mut self, caps: HostCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Whether the parent's streams look like terminals
    pub fn with_parent_terminal(mut self, terminal: bool) -> Self {
        self.parent_terminal = terminal;
        self
    }

    pub fn with_total_memory(mut self, bytes: u64) -> Self {
        self.total_memory = bytes;
        self
    }

    /// Bytes the next child has already written to `stream` when spawned
    pub fn with_output(self, stream: StdName, bytes: impl Into<Vec<u8>>) -> Self {
        self.outputs.lock().unwrap().insert(stream, bytes.into());
        self
    }

    pub fn spawned(&self) -> Vec<MockSpawn> {
        self.spawned.lock().unwrap().clone()
    }

    /// Signals sent to children over the signal transport
    pub fn sent_signals(&self) -> Vec<(u32, ShutdownSignal)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn channel_log(&self, stream: StdName) -> Option<MockChannelLog> {
        self.channels
            .lock()
            .unwrap()
            .get(&stream)
            .map(|log| log.lock().unwrap().clone())
    }

    pub fn is_watching_parent(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Child end of the most recent message port
    pub fn take_child_port(&self) -> Option<DuplexStream> {
        self.child_ports.lock().unwrap().pop()
    }

    /// Simulate the child exiting
    pub fn simulate_exit(&self, pid: u32, status: ExitStatus) {
        let _ = self.event_tx.send(HostEvent::Exited { pid, status });
    }

    /// Simulate a signal-transport notice from the child
    pub fn simulate_notice(&self, signal: ShutdownSignal) {
        let _ = self.event_tx.send(HostEvent::Notice(signal));
    }

    /// Simulate the parent terminal being resized
    pub fn simulate_resize(&self) {
        let _ = self.event_tx.send(HostEvent::ParentResized);
    }

    /// Simulate the parent receiving a termination signal
    pub fn simulate_parent_signal(&self, signal: i32) {
        let _ = self.event_tx.send(HostEvent::ParentSignaled { signal });
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessHost for MockHost {
    fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }

    fn active_handles(&self) -> &ActiveHandles {
        &self.handles
    }

    fn total_memory(&self) -> HostResult<u64> {
        Ok(self.total_memory)
    }

    fn create_output(&self, stream: StdName) -> HostResult<Box<dyn StdioChannel>> {
        let kind = self.capabilities.channel_kind(self.parent_terminal);
        let log = Arc::new(Mutex::new(MockChannelLog {
            kind: Some(kind),
            ..Default::default()
        }));
        self.channels.lock().unwrap().insert(stream, log.clone());

        Ok(Box::new(MockStdioChannel {
            stream,
            kind,
            log,
            fail_listen: self.fail_listen.clone(),
            relay: None,
            keep_alive: None,
        }))
    }

    fn watch_parent(&self) -> HostResult<()> {
        self.watching.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn spawn(&self, request: SpawnRequest) -> HostResult<ChildHandle> {
        if *self.fail_spawn.lock().unwrap() {
            return Err(HostError::SpawnFailed("Mock spawn failure".into()));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.spawned.lock().unwrap().push(MockSpawn {
            pid,
            program: request.program.clone(),
            args: request.args.clone(),
            env: request.env.clone(),
            detached: request.detached,
            message_port: request.message_port,
        });

        let mut child = ChildHandle::new(pid, self.handles.clone());
        let mut outputs = self.outputs.lock().unwrap();
        for stream in StdName::ALL {
            let bytes = outputs.remove(&stream).unwrap_or_default();
            child = child.with_output(stream, Box::new(std::io::Cursor::new(bytes)));
        }

        if request.message_port {
            let (parent, child_end) = tokio::io::duplex(4096);
            let (reader, writer) = tokio::io::split(parent);
            self.child_ports.lock().unwrap().push(child_end);
            child = child.with_message_port(MessagePort::new(reader, writer));
        }

        Ok(child)
    }

    fn signal_channel(&self, pid: u32) -> Box<dyn ShutdownChannel> {
        Box::new(MockSignalChannel {
            pid,
            sent: self.sent.clone(),
        })
    }

    fn subscribe(&self) -> HostResult<mpsc::UnboundedReceiver<HostEvent>> {
        self.event_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| HostError::Internal("subscribe() can only be called once".into()))
    }

    fn event_sender(&self) -> mpsc::UnboundedSender<HostEvent> {
        self.event_tx.clone()
    }
}

/// Stdio channel that records every operation
pub struct MockStdioChannel {
    stream: StdName,
    kind: ChannelKind,
    log: Arc<Mutex<MockChannelLog>>,
    relay: Option<JoinHandle<()>>,
    fail_listen: Arc<Mutex<Option<StdName>>>,
    keep_alive: Option<HandleRef>,
}

#[async_trait]
impl StdioChannel for MockStdioChannel {
    fn stream(&self) -> StdName {
        self.stream
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn child_stdio(&mut self) -> HostResult<ChildStdio> {
        Ok(ChildStdio::Piped)
    }

    fn listen(&mut self, child: &mut ChildHandle) -> HostResult<()> {
        if *self.fail_listen.lock().unwrap() == Some(self.stream) {
            return Err(HostError::Internal(format!("Mock listen failure on {}", self.stream.as_str())));
        }
        self.keep_alive = Some(child.registry().register(self.stream.as_str()));
        self.log.lock().unwrap().listened = true;

        if let Some(mut output) = child.take_output(self.stream) {
            let log = self.log.clone();
            self.relay = Some(tokio::spawn(async move {
                let mut received = Vec::new();
                let _ = output.read_to_end(&mut received).await;
                log.lock().unwrap().received.extend(received);
            }));
        }
        Ok(())
    }

    fn unref(&mut self) {
        if let Some(keep_alive) = self.keep_alive.as_mut() {
            keep_alive.unref();
        }
        self.log.lock().unwrap().unrefs += 1;
    }

    fn parent_size(&self) -> Option<WindowSize> {
        match self.kind {
            ChannelKind::Pty => Some(MOCK_WINDOW_SIZE),
            ChannelKind::Pipe => None,
        }
    }

    fn resize(&mut self, size: WindowSize) -> HostResult<()> {
        if self.kind == ChannelKind::Pty {
            self.log.lock().unwrap().resizes.push(size);
        }
        Ok(())
    }

    async fn drained(&mut self) {
        if let Some(relay) = self.relay.take() {
            let _ = relay.await;
        }
    }

    fn destroy(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        self.log.lock().unwrap().destroyed = true;
    }
}

/// Signal transport that records what would have been sent
pub struct MockSignalChannel {
    pid: u32,
    sent: Arc<Mutex<Vec<(u32, ShutdownSignal)>>>,
}

#[async_trait]
impl ShutdownChannel for MockSignalChannel {
    fn transport(&self) -> Transport {
        Transport::Signals
    }

    fn listen(&mut self, _events: mpsc::UnboundedSender<HostEvent>) -> HostResult<()> {
        Ok(())
    }

    fn unref(&mut self) {}

    async fn send(&mut self, signal: ShutdownSignal) -> HostResult<()> {
        self.sent.lock().unwrap().push((self.pid, signal));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_spawn_and_relay() {
        let host = MockHost::new().with_output(StdName::Stdout, "hello");
        let _rx = host.subscribe().unwrap();

        let mut channel = host.create_output(StdName::Stdout).unwrap();
        let mut child = host
            .spawn(SpawnRequest::new("node").args(["build.js"]).detached(true))
            .await
            .unwrap();

        channel.listen(&mut child).unwrap();
        channel.unref();
        channel.drained().await;

        let log = host.channel_log(StdName::Stdout).unwrap();
        assert_eq!(log.received, b"hello");
        assert_eq!(log.kind, Some(ChannelKind::Pty));
        assert_eq!(host.spawned().len(), 1);
        assert!(host.spawned()[0].detached);
        assert_eq!(host.active_handles().count(), 1);
    }

    #[tokio::test]
    async fn mock_spawn_failure() {
        let host = MockHost::new();
        *host.fail_spawn.lock().unwrap() = true;

        let result = host.spawn(SpawnRequest::new("node")).await;
        assert!(matches!(result, Err(HostError::SpawnFailed(_))));
        assert!(host.spawned().is_empty());
    }

    #[test]
    fn subscribe_only_once() {
        let host = MockHost::new();
        assert!(host.subscribe().is_ok());
        assert!(host.subscribe().is_err());
    }
}
