//! Transport over any tokio byte stream.
//!
//! Wraps a read half and a write half (TCP socket, SSH channel, in-memory
//! duplex) and applies [`FrameCodec`] in both directions. Writes are
//! serialized behind a lock; a blocked `receive` is woken by `close`.

use std::sync::atomic::{AtomicU8, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};

use super::{FrameCodec, FramingVersion, Transport, TransportFuture};
use crate::config::TransportConfig;
use crate::error::{NetconfError, Result};

/// Initial read buffer capacity
const READ_BUFFER_SIZE: usize = 8 * 1024;

struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    codec: FrameCodec,
}

struct FrameWriter<W> {
    /// `None` once closed
    io: Option<W>,
    buf: BytesMut,
    codec: FrameCodec,
}

/// Framed transport over an `AsyncRead`/`AsyncWrite` pair.
pub struct StreamTransport<R, W> {
    reader: Mutex<FrameReader<R>>,
    writer: Mutex<FrameWriter<W>>,
    framing: AtomicU8,
    closed: watch::Sender<bool>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a transport with default limits.
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, &TransportConfig::default())
    }

    /// Create a transport with the given limits.
    pub fn with_config(reader: R, writer: W, config: &TransportConfig) -> Self {
        let codec = FrameCodec::new(config.max_message_size, config.max_chunk_size);
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(FrameReader {
                io: reader,
                buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
                codec: codec.clone(),
            }),
            writer: Mutex::new(FrameWriter {
                io: Some(writer),
                buf: BytesMut::new(),
                codec,
            }),
            framing: AtomicU8::new(FramingVersion::V1_0.as_u8()),
            closed,
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn send_message(&self, message: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(NetconfError::Closed);
        }

        let version = self.framing();
        let mut guard = self.writer.lock().await;
        let writer = &mut *guard;
        let Some(io) = writer.io.as_mut() else {
            return Err(NetconfError::Closed);
        };

        writer.buf.clear();
        writer.codec.encode(version, message, &mut writer.buf);
        io.write_all(&writer.buf).await?;
        io.flush().await?;

        tracing::trace!("Sent {} byte message ({} framing)", message.len(), version);
        Ok(())
    }

    async fn receive_message(&self) -> Result<Bytes> {
        let mut closed = self.closed.subscribe();
        if is_set(&mut closed) {
            return Err(NetconfError::Closed);
        }

        let mut guard = self.reader.lock().await;
        let reader = &mut *guard;

        loop {
            let version = self.framing();
            if let Some(message) = reader.codec.decode(version, &mut reader.buf)? {
                tracing::trace!("Received {} byte message ({} framing)", message.len(), version);
                return Ok(message);
            }

            tokio::select! {
                () = wait_closed(&mut closed) => return Err(NetconfError::Closed),
                read = reader.io.read_buf(&mut reader.buf) => {
                    if read? == 0 {
                        return Err(NetconfError::ConnectionClosed);
                    }
                },
            }
        }
    }

    async fn close_stream(&self) -> Result<()> {
        self.closed.send_replace(true);

        let io = self.writer.lock().await.io.take();
        if let Some(mut io) = io {
            tracing::debug!("Closing stream transport");
            if let Err(e) = io.shutdown().await {
                if e.kind() != std::io::ErrorKind::NotConnected {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

impl<S> StreamTransport<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Split a bidirectional stream into a transport.
    pub fn from_stream(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

fn is_set(closed: &mut watch::Receiver<bool>) -> bool {
    *closed.borrow_and_update()
}

/// Resolve once the closed flag is set (or its sender is gone).
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        if is_set(closed) {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn send<'a>(&'a self, message: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(self.send_message(message))
    }

    fn receive(&self) -> TransportFuture<'_, Bytes> {
        Box::pin(self.receive_message())
    }

    fn set_framing(&self, version: FramingVersion) {
        self.framing.store(version.as_u8(), Ordering::SeqCst);
    }

    fn framing(&self) -> FramingVersion {
        FramingVersion::from_u8(self.framing.load(Ordering::SeqCst))
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(self.close_stream())
    }

    fn name(&self) -> &'static str {
        "stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::duplex;

    fn pair() -> (
        StreamTransport<ReadHalf<tokio::io::DuplexStream>, WriteHalf<tokio::io::DuplexStream>>,
        tokio::io::DuplexStream,
    ) {
        let (client, server) = duplex(64 * 1024);
        (StreamTransport::from_stream(client), server)
    }

    #[tokio::test]
    async fn test_send_uses_current_framing() {
        let (transport, mut peer) = pair();

        transport.send(b"<hello/>").await.unwrap();
        transport.set_framing(FramingVersion::V1_1);
        transport.send(b"<rpc/>").await.unwrap();

        let expected = b"<hello/>]]>]]>\n#6\n<rpc/>\n##\n";
        let mut wire = vec![0u8; expected.len()];
        peer.read_exact(&mut wire).await.unwrap();
        assert_eq!(&wire[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_wire_bytes_match_framing() {
        let mock = tokio_test::io::Builder::new()
            .read(b"<hello/>]]>]]>")
            .write(b"<hello/>]]>]]>")
            .write(b"\n#6\n<rpc/>\n##\n")
            .build();
        let transport = StreamTransport::from_stream(mock);

        assert_eq!(transport.receive().await.unwrap(), "<hello/>");
        transport.send(b"<hello/>").await.unwrap();
        transport.set_framing(FramingVersion::V1_1);
        transport.send(b"<rpc/>").await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_reassembles_split_writes() {
        let (transport, mut peer) = pair();
        transport.set_framing(FramingVersion::V1_1);

        let writer = tokio::spawn(async move {
            peer.write_all(b"\n#5\n<ok").await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            peer.write_all(b"/>\n##\n").await.unwrap();
            peer
        });

        let message = transport.receive().await.unwrap();
        assert_eq!(message, "<ok/>");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_unblocks_receive() {
        let (transport, _peer) = pair();
        let transport = Arc::new(transport);

        let receiver = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        transport.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .expect("receive did not unblock")
            .unwrap();
        assert!(matches!(result, Err(NetconfError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_sends() {
        let (transport, _peer) = pair();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.is_closed());
        assert!(matches!(transport.send(b"<rpc/>").await, Err(NetconfError::Closed)));
        assert!(matches!(transport.receive().await, Err(NetconfError::Closed)));
    }

    #[tokio::test]
    async fn test_peer_eof() {
        let (transport, peer) = pair();
        drop(peer);
        assert!(matches!(
            transport.receive().await,
            Err(NetconfError::ConnectionClosed)
        ));
    }
}
