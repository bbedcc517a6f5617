//! Host capabilities model

use serde::{Deserialize, Serialize};

use crate::{ChannelKind, Transport};

/// Describes what a process host can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    /// Can send and receive POSIX signals
    pub posix_signals: bool,

    /// Can allocate pseudo-terminals
    pub pseudo_terminals: bool,
}

impl HostCapabilities {
    /// Capabilities of the platform this binary was built for
    pub fn probe() -> Self {
        if cfg!(unix) {
            Self::posix()
        } else {
            Self::minimal()
        }
    }

    /// Full POSIX host: signals and pseudo-terminals
    pub fn posix() -> Self {
        Self {
            posix_signals: true,
            pseudo_terminals: true,
        }
    }

    /// Host without signals or terminals (pipes and a message port only)
    pub fn minimal() -> Self {
        Self {
            posix_signals: false,
            pseudo_terminals: false,
        }
    }

    /// The same host, restricted to the no-signals profile
    pub fn without_signals(self) -> Self {
        Self {
            posix_signals: false,
            ..self
        }
    }

    /// Pick the channel kind for a stream.
    ///
    /// A PTY is only used when the host has signals and the parent's own
    /// stream is a terminal, so the child formats its output the same way a
    /// direct run would.
    pub fn channel_kind(&self, parent_is_terminal: bool) -> ChannelKind {
        if self.posix_signals && self.pseudo_terminals && parent_is_terminal {
            ChannelKind::Pty
        } else {
            ChannelKind::Pipe
        }
    }

    /// Shutdown transport used with a child spawned on this host
    pub fn transport(&self) -> Transport {
        if self.posix_signals {
            Transport::Signals
        } else {
            Transport::Message
        }
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::probe()
    }
}
