//! Host adapter traits

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    ActiveHandles, ChildHandle, ChildStdio, ExitStatus, HostCapabilities, ShutdownSignal, StdName,
    WindowSize,
};

/// Errors from host adapter operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Terminal error: {0}")]
    Terminal(String),

    #[error("Signal delivery failed: {0}")]
    Signal(String),

    #[error("Channel already in use: {0}")]
    ChannelInUse(String),

    #[error("Message encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Backing of a stdio channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Pty,
    Pipe,
}

/// How shutdown signals travel between parent and child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Signals,
    Message,
}

/// Options for spawning the child
#[derive(Debug)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,

    /// Complete environment for the child; `None` inherits the parent's
    pub env: Option<BTreeMap<String, String>>,

    /// Start the child in its own session so it can outlive the parent
    pub detached: bool,

    pub stdout: ChildStdio,
    pub stderr: ChildStdio,

    /// Pass a message port to the child for the shutdown handshake
    pub message_port: bool,
}

impl SpawnRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: None,
            detached: false,
            stdout: ChildStdio::Inherit,
            stderr: ChildStdio::Inherit,
            message_port: false,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn stdio(mut self, stream: StdName, stdio: ChildStdio) -> Self {
        match stream {
            StdName::Stdout => self.stdout = stdio,
            StdName::Stderr => self.stderr = stdio,
        }
        self
    }

    pub fn message_port(mut self, enabled: bool) -> Self {
        self.message_port = enabled;
        self
    }
}

/// Events from the host adapter
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// The child process has exited
    Exited { pid: u32, status: ExitStatus },

    /// A notice arrived from the child
    Notice(ShutdownSignal),

    /// The parent's controlling terminal was resized
    ParentResized,

    /// The parent received a termination signal
    ParentSignaled { signal: i32 },
}

/// One of the child's output streams, relayed to the parent's stream
#[async_trait]
pub trait StdioChannel: Send {
    fn stream(&self) -> StdName;

    fn kind(&self) -> ChannelKind;

    /// Descriptor to wire into the child. Can only be taken once.
    fn child_stdio(&mut self) -> HostResult<ChildStdio>;

    /// Start forwarding the child's output to the parent's stream.
    ///
    /// Must be called synchronously once the child exists; anything the
    /// child wrote before this point is still buffered by the kernel.
    fn listen(&mut self, child: &mut ChildHandle) -> HostResult<()>;

    /// Stop keeping the parent alive for this channel
    fn unref(&mut self);

    /// Current geometry of the parent's stream, if it has one
    fn parent_size(&self) -> Option<WindowSize>;

    /// Resize the channel's terminal. No-op for pipes.
    fn resize(&mut self, size: WindowSize) -> HostResult<()>;

    /// Resolves once every byte from the child has been forwarded
    async fn drained(&mut self);

    /// Release OS resources
    fn destroy(&mut self);
}

/// Transport for [`ShutdownSignal`]s between parent and child
#[async_trait]
pub trait ShutdownChannel: Send {
    fn transport(&self) -> Transport;

    /// Start delivering notices from the child as [`HostEvent::Notice`]
    fn listen(&mut self, events: mpsc::UnboundedSender<HostEvent>) -> HostResult<()>;

    /// Stop keeping the parent alive for this channel
    fn unref(&mut self);

    /// Send a signal to the child
    async fn send(&mut self, signal: ShutdownSignal) -> HostResult<()>;
}

/// Process host trait - implemented by platform-specific adapters
#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// Get the capabilities of this host
    fn capabilities(&self) -> &HostCapabilities;

    /// Keep-alive registry for this process
    fn active_handles(&self) -> &ActiveHandles;

    /// Total physical memory in bytes
    fn total_memory(&self) -> HostResult<u64>;

    /// Build the channel for one of the child's output streams
    fn create_output(&self, stream: StdName) -> HostResult<Box<dyn StdioChannel>>;

    /// Start reporting parent resize and termination signals as events.
    ///
    /// Called before spawning so no notice from the child can be missed.
    fn watch_parent(&self) -> HostResult<()>;

    /// Spawn the child. An [`HostEvent::Exited`] follows when it exits.
    async fn spawn(&self, request: SpawnRequest) -> HostResult<ChildHandle>;

    /// Signal-based shutdown channel for a child without a message port
    fn signal_channel(&self, pid: u32) -> Box<dyn ShutdownChannel>;

    /// Take the event receiver. Can only be called once.
    fn subscribe(&self) -> HostResult<mpsc::UnboundedReceiver<HostEvent>>;

    /// Sender feeding the same event stream
    fn event_sender(&self) -> mpsc::UnboundedSender<HostEvent>;
}
