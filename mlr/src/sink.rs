use ldm7_types::ProdIndex;
use notifier::{BopOutcome, Notifier, NotifierError, SessionHandle};
use product_queue::ProductQueue;
use std::sync::Arc;

/// The callback surface a [`crate::transport::McastTransport`] drives as it
/// decodes frames off the wire. This is the seam between the transport
/// (owned by this crate) and the notifier (C4, owned by the `notifier`
/// crate): it exists so `mlr` never has to depend on a concrete
/// `ProductQueue`/`SessionHandle` pair, only on this trait.
pub trait ReceiverSink: Send + Sync {
    fn bop(&self, i: ProdIndex, prod_size: u32, metadata: &[u8]) -> Result<BopAction, NotifierError>;
    fn write(&self, i: ProdIndex, bytes: &[u8]);
    fn eop(&self, i: ProdIndex, actual_size: usize) -> Result<(), NotifierError>;
    fn missed(&self, i: ProdIndex);
}

pub enum BopAction {
    Ignore,
    Reserved,
}

/// Adapts a concrete [`Notifier`] to [`ReceiverSink`].
pub struct NotifierSink<Q: ProductQueue, S: SessionHandle + ?Sized + 'static> {
    notifier: Arc<Notifier<Q, S>>,
}

impl<Q: ProductQueue, S: SessionHandle + ?Sized + 'static> NotifierSink<Q, S> {
    pub fn new(notifier: Arc<Notifier<Q, S>>) -> Self {
        Self { notifier }
    }
}

impl<Q: ProductQueue, S: SessionHandle + ?Sized + 'static> ReceiverSink for NotifierSink<Q, S> {
    fn bop(&self, i: ProdIndex, prod_size: u32, metadata: &[u8]) -> Result<BopAction, NotifierError> {
        match self.notifier.bop(i, prod_size, metadata)? {
            BopOutcome::Ignore => Ok(BopAction::Ignore),
            BopOutcome::Reserved { .. } => Ok(BopAction::Reserved),
        }
    }

    fn write(&self, i: ProdIndex, bytes: &[u8]) {
        self.notifier.with_buffer(i, |buf| {
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
        });
    }

    fn eop(&self, i: ProdIndex, actual_size: usize) -> Result<(), NotifierError> {
        self.notifier.eop(i, actual_size)
    }

    fn missed(&self, i: ProdIndex) {
        self.notifier.missed(i)
    }
}
