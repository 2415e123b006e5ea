#![allow(unsafe_code)]

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use hyper::rt::{Read, ReadBufCursor, Write};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A tokio stream, exposed to hyper's connection machinery.
#[derive(Debug)]
#[pin_project::pin_project]
pub struct HyperIo<S> {
    #[pin]
    stream: S,
}

impl<S> HyperIo<S> {
    /// Wrap a tokio stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Borrow the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> Read for HyperIo<S>
where
    S: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut cursor: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        // SAFETY: tokio's `ReadBuf` only initializes the bytes it reports as
        // filled, and the cursor is advanced by exactly that many bytes.
        let filled = unsafe {
            let mut buf = ReadBuf::uninit(cursor.as_mut());
            match self.project().stream.poll_read(cx, &mut buf) {
                Poll::Ready(Ok(())) => buf.filled().len(),
                Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
                Poll::Pending => return Poll::Pending,
            }
        };

        unsafe { cursor.advance(filled) };
        Poll::Ready(Ok(()))
    }
}

impl<S> Write for HyperIo<S>
where
    S: AsyncWrite,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write_vectored(cx, bufs)
    }
}
