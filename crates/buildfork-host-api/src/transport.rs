//! Message-port shutdown transport
//!
//! Used when the host has no POSIX signals. Both directions carry
//! [`ShutdownSignal`]s as JSON lines.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    ActiveHandles, HandleRef, HostError, HostEvent, HostResult, ShutdownChannel, ShutdownSignal,
    Transport,
};

/// Parent side of the out-of-band message channel
pub struct MessagePort {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl MessagePort {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// [`ShutdownChannel`] over a [`MessagePort`]
pub struct MessageChannel {
    reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    keep_alive: HandleRef,
    listener: Option<JoinHandle<()>>,
}

impl MessageChannel {
    pub fn new(port: MessagePort, registry: &ActiveHandles) -> Self {
        Self {
            reader: Some(port.reader),
            writer: port.writer,
            keep_alive: registry.register("message-port"),
            listener: None,
        }
    }
}

#[async_trait]
impl ShutdownChannel for MessageChannel {
    fn transport(&self) -> Transport {
        Transport::Message
    }

    fn listen(&mut self, events: mpsc::UnboundedSender<HostEvent>) -> HostResult<()> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| HostError::ChannelInUse("message port already listening".into()))?;
        self.listener = Some(tokio::spawn(read_notices(reader, events)));
        Ok(())
    }

    fn unref(&mut self) {
        self.keep_alive.unref();
    }

    async fn send(&mut self, signal: ShutdownSignal) -> HostResult<()> {
        let line = signal.encode()?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        debug!(?signal, "Sent message to child");
        Ok(())
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn read_notices(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    events: mpsc::UnboundedSender<HostEvent>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match ShutdownSignal::decode(&line) {
                Some(signal) => {
                    if events.send(HostEvent::Notice(signal)).is_err() {
                        break;
                    }
                }
                None => debug!(line = %line, "Ignoring unrecognized message from child"),
            },
            Ok(None) => {
                debug!("Message port closed by child");
                break;
            }
            Err(e) => {
                debug!(error = %e, "Message port read failed");
                break;
            }
        }
    }
}
