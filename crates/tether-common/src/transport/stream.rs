//! Byte streams under the frame codec.
//!
//! A connection either carries frames as-is or through a gzip stream in each
//! direction. Both ends must agree; a compressed peer talking to a plain one
//! fails on the first frame.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadBuf, ReadHalf, WriteHalf};

/// A duplex byte stream a [`FrameCodec`](super::FrameCodec) can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Boxes `stream`, adding gzip in both directions when `compression` is set.
pub fn wrap_stream<S>(stream: S, compression: bool) -> Box<dyn ByteStream>
where
    S: ByteStream + 'static,
{
    if compression {
        Box::new(GzipStream::new(stream))
    } else {
        Box::new(stream)
    }
}

/// Gzip-compressed duplex stream.
///
/// Every flush of the writer emits a sync-flushed block, so a frame is
/// readable by the peer as soon as the frame sink flushes it.
pub struct GzipStream<S> {
    reader: GzipDecoder<BufReader<ReadHalf<S>>>,
    writer: GzipEncoder<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> GzipStream<S> {
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: GzipDecoder::new(BufReader::new(read_half)),
            writer: GzipEncoder::new(write_half),
        }
    }
}

impl<S: AsyncRead + AsyncWrite> AsyncRead for GzipStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl<S: AsyncRead + AsyncWrite> AsyncWrite for GzipStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}
