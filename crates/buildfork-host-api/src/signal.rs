//! Shutdown signals exchanged between parent and child

use serde::{Deserialize, Serialize};

use crate::HostResult;

/// A notice travelling between the parent and the forked child.
///
/// On the message transport each value is one JSON line; on the signal
/// transport each maps to an OS signal (see the host adapter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShutdownSignal {
    /// Child -> parent: user-visible output is finished
    CompletionNotice,

    /// Parent -> child: terminal geometry changed
    ResizeNotice,

    /// Parent -> child: terminate with this signal number
    TerminationRequest { signal: i32 },
}

impl ShutdownSignal {
    /// Encode as a newline-terminated JSON line
    pub fn encode(&self) -> HostResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one line; anything unrecognized yields `None`
    pub fn decode(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}
