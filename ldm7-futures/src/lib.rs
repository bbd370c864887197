pub mod drain;
pub mod take_until_signaled;

pub mod prelude {
    pub use crate::Ldm7StreamExt;
}

use futures::Stream;

pub trait Ldm7StreamExt: Stream + Sized {
    /// Take from this stream until the given future completes; used to give
    /// every long-running task a single cancellation future to race against.
    fn take_until_signaled<F>(self, f: F) -> take_until_signaled::TakeUntilSignaled<Self, F>
    where
        F: std::future::Future,
    {
        take_until_signaled::TakeUntilSignaled::new(self, f)
    }

    /// Feed all values into a black hole and return a Future that completes
    /// once the stream ends; used by dispatcher loops that only care about
    /// side effects.
    fn drain(self) -> drain::Drain<Self> {
        drain::Drain::new(self)
    }
}

impl<T: Sized + Stream> Ldm7StreamExt for T {}
