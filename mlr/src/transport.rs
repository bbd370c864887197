use crate::sink::ReceiverSink;
use std::net::{IpAddr, SocketAddr};

/// `(multicast group, TCP recovery server, local bind interface)`: the three
/// endpoints the FMTP receiver is parameterized by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McastEndpoint {
    pub group: SocketAddr,
    pub tcp_server: SocketAddr,
    pub local_iface: IpAddr,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("multicast transport unavailable: {0}")]
    Unavailable(String),
    #[error("multicast transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Signals a running [`McastTransport::run`] to stop at its next
/// opportunity. Idempotent: halting twice, or halting before `run` starts,
/// is not an error.
#[derive(Default)]
pub struct HaltSignal {
    flag: std::sync::atomic::AtomicBool,
}

impl HaltSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn halt(&self) {
        self.flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.flag.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// The FMTP receiver transport: out of scope for this crate to implement
/// (it is the external multicast/unicast-recovery library the receiver
/// binds to), but this is the contract [`crate::Mlr`] drives it through.
///
/// `run` blocks the calling thread, decoding frames and driving `sink`
/// until either `halt` reports [`HaltSignal::is_halted`] or the transport
/// itself fails. It must check `halt` between frames, not just at entry.
pub trait McastTransport: Send + Sync + 'static {
    fn run(&self, sink: &dyn ReceiverSink, halt: &HaltSignal) -> Result<(), TransportError>;
}
