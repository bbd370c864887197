use core::fmt;
use core::pin::Pin;
use futures::future::Future;
use futures::stream::{FusedStream, Stream};
use futures::task::{Context, Poll};
use pin_project_lite::pin_project;

pin_project! {
    /// Stream for the [`take_until_signaled`](super::Ldm7StreamExt::take_until_signaled) method.
    #[must_use = "streams do nothing unless polled"]
    pub struct TakeUntilSignaled<St: Stream, F: Future> {
        #[pin]
        stream: St,
        #[pin]
        signal_future: F,
        signaled: bool,
    }
}

impl<St, F> fmt::Debug for TakeUntilSignaled<St, F>
where
    St: Stream + fmt::Debug,
    F: Future + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TakeUntilSignaled")
            .field("stream", &self.stream)
            .field("signal_future", &self.signal_future)
            .field("signaled", &self.signaled)
            .finish()
    }
}

impl<St, F> TakeUntilSignaled<St, F>
where
    St: Stream,
    F: Future,
{
    pub fn new(stream: St, signal_future: F) -> TakeUntilSignaled<St, F> {
        TakeUntilSignaled {
            stream,
            signal_future,
            signaled: false,
        }
    }
}

impl<St, F> Stream for TakeUntilSignaled<St, F>
where
    St: Stream,
    F: Future,
{
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<St::Item>> {
        let this = self.project();

        if this.signal_future.poll(cx).is_ready() {
            *this.signaled = true;
            return Poll::Ready(None);
        }

        this.stream.poll_next(cx)
    }
}

impl<St, F> FusedStream for TakeUntilSignaled<St, F>
where
    St: FusedStream,
    F: Future,
{
    fn is_terminated(&self) -> bool {
        self.signaled || self.stream.is_terminated()
    }
}
