//! Reader adapter that aborts when the build step is cancelled.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Wraps a reader so reads fail once `token` is cancelled.
///
/// The cancellation future is polled on every read, so a read that is
/// pending on the network is woken and aborted as soon as the token fires.
pub(crate) struct CancellableReader<R> {
    inner: R,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<R> CancellableReader<R> {
    pub(crate) fn new(inner: R, token: CancellationToken) -> Self {
        let cancelled = Box::pin(token.clone().cancelled_owned());
        Self {
            inner,
            token,
            cancelled,
        }
    }
}

fn cancelled_error() -> io::Error {
    io::Error::other("build step cancelled while streaming object")
}

impl<R: AsyncRead + Unpin> AsyncRead for CancellableReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.token.is_cancelled() || this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(cancelled_error()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}
