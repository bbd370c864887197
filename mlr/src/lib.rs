//! The multicast LDM receiver (C5): thin owner of the FMTP receiver
//! transport, bound to one session's notifier. See [`Mlr`].

mod mlr;
mod sink;
mod transport;

pub use mlr::Mlr;
pub use sink::{BopAction, NotifierSink, ReceiverSink};
pub use transport::{HaltSignal, McastEndpoint, McastTransport, TransportError};
