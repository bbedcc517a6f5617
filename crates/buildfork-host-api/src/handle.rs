//! Child handle abstraction

use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::OwnedFd;
use tokio::io::AsyncRead;

use crate::{ActiveHandles, HandleRef, MessagePort};

/// One of the child's two output streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdName {
    Stdout,
    Stderr,
}

impl StdName {
    pub const ALL: [StdName; 2] = [StdName::Stdout, StdName::Stderr];

    pub fn as_str(&self) -> &'static str {
        match self {
            StdName::Stdout => "stdout",
            StdName::Stderr => "stderr",
        }
    }

    /// Descriptor number of this stream in any process
    pub fn fd(&self) -> i32 {
        match self {
            StdName::Stdout => 1,
            StdName::Stderr => 2,
        }
    }
}

impl fmt::Display for StdName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal geometry in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl WindowSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// What to wire into one of the child's stdio slots
#[derive(Debug)]
pub enum ChildStdio {
    Inherit,
    Null,
    /// Let the host create a pipe; the read end lands in the [`ChildHandle`]
    Piped,
    /// Slave side of a pseudo-terminal
    Terminal(OwnedFd),
}

/// Read end of a piped child stream
pub type ChildOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Handle to the spawned child
///
/// Holds a keep-alive reference from the moment it is created. The parent
/// stays up while that reference is held; [`ChildHandle::unref`] lets it exit
/// without touching the child process.
pub struct ChildHandle {
    pid: u32,
    keep_alive: HandleRef,
    registry: ActiveHandles,
    message_port: Option<MessagePort>,
    stdout: Option<ChildOutput>,
    stderr: Option<ChildOutput>,
}

impl ChildHandle {
    pub fn new(pid: u32, registry: ActiveHandles) -> Self {
        let keep_alive = registry.register("child");
        Self {
            pid,
            keep_alive,
            registry,
            message_port: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn with_output(mut self, stream: StdName, output: ChildOutput) -> Self {
        match stream {
            StdName::Stdout => self.stdout = Some(output),
            StdName::Stderr => self.stderr = Some(output),
        }
        self
    }

    pub fn with_message_port(mut self, port: MessagePort) -> Self {
        self.message_port = Some(port);
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Registry this handle (and anything attached to it) counts against
    pub fn registry(&self) -> &ActiveHandles {
        &self.registry
    }

    /// Take the read end of a piped stream, if the host created one
    pub fn take_output(&mut self, stream: StdName) -> Option<ChildOutput> {
        match stream {
            StdName::Stdout => self.stdout.take(),
            StdName::Stderr => self.stderr.take(),
        }
    }

    pub fn take_message_port(&mut self) -> Option<MessagePort> {
        self.message_port.take()
    }

    /// Stop keeping the parent alive for this child
    pub fn unref(&mut self) {
        self.keep_alive.unref();
    }

    pub fn is_ref(&self) -> bool {
        self.keep_alive.is_active()
    }
}

impl fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildHandle")
            .field("pid", &self.pid)
            .field("ref", &self.keep_alive.is_active())
            .field("message_port", &self.message_port.is_some())
            .finish()
    }
}

/// Exit status of the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,

    /// Signal number if the process was killed by one
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn success() -> Self {
        Self::with_code(0)
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Shell-style exit code: the code itself, or 128 + signal
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status() {
        assert!(ExitStatus::success().is_success());
        assert!(!ExitStatus::with_code(1).is_success());
        assert!(!ExitStatus::signaled(9).is_success());
    }

    #[test]
    fn exit_code_follows_signal_convention() {
        assert_eq!(ExitStatus::with_code(3).exit_code(), 3);
        assert_eq!(ExitStatus::signaled(2).exit_code(), 130);
        assert_eq!(ExitStatus::signaled(9).exit_code(), 137);
    }

    #[tokio::test]
    async fn unref_releases_child_but_keeps_handle() {
        let registry = ActiveHandles::new();
        let mut child = ChildHandle::new(42, registry.clone());
        assert_eq!(registry.count(), 1);
        assert!(child.is_ref());

        child.unref();
        assert_eq!(registry.count(), 0);
        assert!(!child.is_ref());
        assert_eq!(child.pid(), 42);
    }

    #[test]
    fn outputs_are_taken_once() {
        let mut child = ChildHandle::new(7, ActiveHandles::new())
            .with_output(StdName::Stdout, Box::new(std::io::Cursor::new(b"hi".to_vec())));
        assert!(child.take_output(StdName::Stdout).is_some());
        assert!(child.take_output(StdName::Stdout).is_none());
        assert!(child.take_output(StdName::Stderr).is_none());
    }
}
