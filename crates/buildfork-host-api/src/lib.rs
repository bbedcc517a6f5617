//! Host adapter trait interfaces for buildfork
//!
//! This crate defines the interface between the supervisor core and
//! platform-specific process hosts. It contains no platform code itself:
//! - Stdio channels and the child handle they attach to
//! - The shutdown transport (signals or a message port)
//! - A keep-alive registry deciding when the parent may exit
//! - A mock host for tests

mod capabilities;
mod handle;
mod keepalive;
mod mock;
mod signal;
mod traits;
mod transport;

pub use capabilities::*;
pub use handle::*;
pub use keepalive::*;
pub use mock::*;
pub use signal::*;
pub use traits::*;
pub use transport::*;
