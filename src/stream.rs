//! Stream plumbing shared by every backend: chunked copying, and the
//! close-protected adapter used to shield a caller-owned stream from an
//! uploader that (wrongly) closes what it was handed.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite};

/// Default chunk size for `chunked_pipe`, matching the path-utility default.
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Copy `input` into `output` in chunks of `chunk_size` bytes. If `amount` is
/// `Some`, stop after that many bytes (short final chunk respected);
/// otherwise copy until EOF. Returns the number of bytes copied.
pub async fn chunked_pipe<R, W>(
    input: &mut R,
    output: &mut W,
    amount: Option<u64>,
    chunk_size: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    use tokio::io::AsyncWriteExt;

    let mut total = 0u64;
    let mut buf = vec![0u8; chunk_size];

    loop {
        let want = match amount {
            Some(remaining) if remaining.saturating_sub(total) == 0 => break,
            Some(remaining) => (remaining - total).min(chunk_size as u64) as usize,
            None => chunk_size,
        };

        let n = input.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n]).await?;
        total += n as u64;
    }

    Ok(total)
}

/// Wraps an inner stream but swallows `close`/`shutdown`, reporting a local
/// closed flag instead of forwarding it. All other operations proceed only
/// while the local flag is clear and fail with `Other` I/O errors once it is
/// set, mirroring the source adapter's full read/write/seek passthrough.
#[pin_project]
pub struct CloseProtectedStream<S> {
    #[pin]
    inner: S,
    closed: bool,
}

impl<S> CloseProtectedStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    fn closed_err() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "I/O operation on closed stream")
    }
}

impl<S: AsyncRead> AsyncRead for CloseProtectedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if *this.closed {
            return Poll::Ready(Err(Self::closed_err()));
        }
        this.inner.poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for CloseProtectedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        if *this.closed {
            return Poll::Ready(Err(Self::closed_err()));
        }
        this.inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if *this.closed {
            return Poll::Ready(Err(Self::closed_err()));
        }
        this.inner.poll_flush(cx)
    }

    /// Intercepts shutdown: marks the stream closed locally without
    /// forwarding to the inner stream, which the caller still owns.
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        *this.closed = true;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncSeek> AsyncSeek for CloseProtectedStream<S> {
    fn start_seek(self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        let this = self.project();
        if *this.closed {
            return Err(Self::closed_err());
        }
        this.inner.start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.project();
        if *this.closed {
            return Poll::Ready(Err(Self::closed_err()));
        }
        this.inner.poll_complete(cx)
    }
}

/// Rewind a seekable stream to position 0, or return a `NotSeekable`-style
/// I/O error: callers use this instead of hand-rolling `seek` everywhere
/// downloads/uploads need to restart cleanly on retry.
pub async fn rewind<S: AsyncSeek + Unpin>(stream: &mut S) -> io::Result<()> {
    stream.rewind().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn chunked_pipe_copies_whole_input() {
        let mut input = Cursor::new(b"hello world".to_vec());
        let mut output = Cursor::new(Vec::new());
        let n = chunked_pipe(&mut input, &mut output, None, 4).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(output.into_inner(), b"hello world");
    }

    #[tokio::test]
    async fn chunked_pipe_respects_amount_cap() {
        let mut input = Cursor::new(b"hello world".to_vec());
        let mut output = Cursor::new(Vec::new());
        let n = chunked_pipe(&mut input, &mut output, Some(5), 1024)
            .await
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(output.into_inner(), b"hello");
    }

    #[tokio::test]
    async fn close_protected_stream_swallows_shutdown() {
        use tokio::io::AsyncWriteExt;

        let mut wrapped = CloseProtectedStream::new(Cursor::new(Vec::new()));
        wrapped.write_all(b"abc").await.unwrap();
        wrapped.shutdown().await.unwrap();
        assert!(wrapped.closed());

        // The underlying stream was not actually closed/truncated by the shim.
        assert_eq!(wrapped.inner.get_ref(), b"abc");

        // But further operations through the shim now fail.
        let err = wrapped.write_all(b"more").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}
