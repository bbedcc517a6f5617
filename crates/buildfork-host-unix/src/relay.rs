//! Byte relay from a child stream to the parent's stream

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::debug;

use buildfork_host_api::StdName;

const RELAY_BUFFER_SIZE: usize = 8192;

/// Copy `reader` into `sink` until EOF, flushing after every chunk so
/// progress output shows up as soon as the child writes it.
pub async fn relay<R, W>(mut reader: R, mut sink: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await?;
        sink.flush().await?;
        total += n as u64;
    }

    Ok(total)
}

/// Run [`relay`] as a task, logging how it ended
pub fn spawn_relay<R, W>(stream: StdName, reader: R, sink: W) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        match relay(reader, sink).await {
            Ok(bytes) => debug!(stream = %stream, bytes, "Relay reached end of stream"),
            Err(e) => debug!(stream = %stream, error = %e, "Relay stopped"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_everything_until_eof() {
        let input: &[u8] = b"compiled 42 modules\n";
        let mut out = Vec::new();

        let n = relay(input, &mut out).await.unwrap();
        assert_eq!(n, input.len() as u64);
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn chunks_arrive_before_eof() {
        let (mut child, reader) = tokio::io::duplex(64);
        let (sink, mut parent) = tokio::io::duplex(64);
        let task = spawn_relay(StdName::Stdout, reader, sink);

        child.write_all(b"progress 10%").await.unwrap();
        let mut buf = [0u8; 12];
        parent.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"progress 10%");

        drop(child);
        task.await.unwrap();
    }
}
