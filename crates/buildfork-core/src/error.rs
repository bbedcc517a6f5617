//! Core error types

use buildfork_host_api::HostError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{var} is not set; this process was not started by the launcher")]
    ParentMissing { var: String },

    #[error("{var} is not a process id: {value:?}")]
    ParentUnparsable { var: String, value: String },

    #[error("Parent pid mismatch: {var}={expected} but the actual parent is {actual}")]
    ParentMismatch {
        var: String,
        expected: u32,
        actual: u32,
    },

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Host event stream closed unexpectedly")]
    EventsClosed,
}

pub type CoreResult<T> = Result<T, CoreError>;
