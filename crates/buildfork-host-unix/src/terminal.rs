//! The parent's own output streams

use std::fmt;
use std::io::IsTerminal;
use std::os::fd::RawFd;
use tokio::io::AsyncWrite;

use buildfork_host_api::{StdName, WindowSize};

nix::ioctl_read_bad!(get_window_size, nix::libc::TIOCGWINSZ, nix::pty::Winsize);
nix::ioctl_write_ptr_bad!(set_window_size, nix::libc::TIOCSWINSZ, nix::pty::Winsize);

/// Destination for one of the child's streams in the parent
pub struct ParentStream {
    name: StdName,
    fd: Option<RawFd>,
    is_terminal: bool,
    sink: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ParentStream {
    pub fn stdout() -> Self {
        Self {
            name: StdName::Stdout,
            fd: Some(StdName::Stdout.fd()),
            is_terminal: std::io::stdout().is_terminal(),
            sink: Box::new(tokio::io::stdout()),
        }
    }

    pub fn stderr() -> Self {
        Self {
            name: StdName::Stderr,
            fd: Some(StdName::Stderr.fd()),
            is_terminal: std::io::stderr().is_terminal(),
            sink: Box::new(tokio::io::stderr()),
        }
    }

    pub fn for_stream(name: StdName) -> Self {
        match name {
            StdName::Stdout => Self::stdout(),
            StdName::Stderr => Self::stderr(),
        }
    }

    /// A stream backed by an arbitrary writer, with no terminal geometry
    pub fn with_writer(
        name: StdName,
        is_terminal: bool,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name,
            fd: None,
            is_terminal,
            sink: Box::new(writer),
        }
    }

    pub fn name(&self) -> StdName {
        self.name
    }

    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd
    }

    /// Current geometry of the terminal behind this stream
    pub fn window_size(&self) -> Option<WindowSize> {
        if !self.is_terminal {
            return None;
        }
        let fd = self.fd?;
        read_window_size(fd)
    }

    pub fn into_sink(self) -> Box<dyn AsyncWrite + Send + Unpin> {
        self.sink
    }
}

impl fmt::Debug for ParentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentStream")
            .field("name", &self.name)
            .field("fd", &self.fd)
            .field("is_terminal", &self.is_terminal)
            .finish()
    }
}

pub(crate) fn read_window_size(fd: RawFd) -> Option<WindowSize> {
    let mut ws = winsize(WindowSize::new(0, 0));
    // SAFETY: `ws` is a valid winsize the ioctl writes into.
    match unsafe { get_window_size(fd, &mut ws) } {
        Ok(_) if ws.ws_col > 0 && ws.ws_row > 0 => Some(WindowSize::new(ws.ws_col, ws.ws_row)),
        _ => None,
    }
}

pub(crate) fn winsize(size: WindowSize) -> nix::pty::Winsize {
    nix::pty::Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_streams_have_no_geometry() {
        let stream = ParentStream::with_writer(StdName::Stderr, true, tokio::io::sink());
        assert_eq!(stream.name(), StdName::Stderr);
        assert!(stream.is_terminal());
        assert_eq!(stream.window_size(), None);
    }

    #[test]
    fn non_terminal_has_no_geometry() {
        let stream = ParentStream::with_writer(StdName::Stdout, false, tokio::io::sink());
        assert_eq!(stream.window_size(), None);
    }
}
