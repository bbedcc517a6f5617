//! Core launch logic for buildfork
//!
//! This crate contains:
//! - Argument classification (inline vs fork)
//! - Child environment derivation with heap tuning
//! - The process supervisor wiring stdio channels, shutdown and resize
//! - The fork session event loop (Connected -> Detached | Closed | Terminating)

mod build;
mod classify;
mod coordinator;
mod environment;
mod error;
mod resize;
mod session;
mod supervisor;

pub use build::*;
pub use classify::*;
pub use coordinator::*;
pub use environment::*;
pub use error::*;
pub use resize::*;
pub use session::*;
pub use supervisor::*;
