//! Unix host adapter for buildfork
//!
//! Provides:
//! - Detached child spawning (new session), with an optional message port
//! - PTY and pipe stdio channels relaying to the parent's streams
//! - POSIX signal transport and parent signal watching
//! - The child-side link back to the launcher

mod adapter;
mod child;
mod pipe;
mod process;
mod pty;
mod relay;
mod signals;
mod stream;
mod system;
mod terminal;

pub use adapter::*;
pub use child::*;
pub use pipe::*;
pub use process::*;
pub use pty::*;
pub use relay::*;
pub use signals::*;
pub use stream::*;
pub use system::*;
pub use terminal::*;
