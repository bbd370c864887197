use crate::{
    sink::ReceiverSink,
    transport::{HaltSignal, McastTransport, TransportError},
};
use std::sync::Arc;

/// The multicast LDM receiver (C5): a thin owner of one FMTP receiver
/// instance bound to a session's notifier. `run` blocks the calling task
/// (spawned as the session's McastRecv task, §4.6.2) until `halt` is
/// called or the transport fails; `halt` is safe to call from any thread,
/// any number of times, before or during `run`.
pub struct Mlr<T: McastTransport> {
    transport: T,
    sink: Arc<dyn ReceiverSink>,
    halt: Arc<HaltSignal>,
}

impl<T: McastTransport> Mlr<T> {
    pub fn new(transport: T, sink: Arc<dyn ReceiverSink>) -> Self {
        Self {
            transport,
            sink,
            halt: Arc::new(HaltSignal::new()),
        }
    }

    /// A cloneable handle that can halt this receiver without owning it.
    pub fn halt_handle(&self) -> Arc<HaltSignal> {
        self.halt.clone()
    }

    pub fn run(&self) -> Result<(), TransportError> {
        let result = self.transport.run(self.sink.as_ref(), &self.halt);
        if let Err(ref e) = result {
            tracing::warn!("multicast receiver stopped: {e}");
        }
        result
    }

    pub fn halt(&self) {
        tracing::debug!("halting multicast receiver");
        self.halt.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NotifierSink;
    use ldm7_types::{FeedSpec, ProdIndex, ProdInfo, Signature};
    use notifier::{encode_prod_info, Notifier, SessionHandle};
    use product_queue::{InMemoryProductQueue, ProductQueue};
    use std::sync::Mutex;

    #[derive(Default)]
    struct NullSession;
    impl SessionHandle for NullSession {
        fn last_received(&self, _info: &ProdInfo) {}
        fn missed_product(&self, _i: ProdIndex) {}
    }

    /// Replays a fixed list of products, checking the halt signal between
    /// each one; used to exercise [`Mlr::run`]/[`Mlr::halt`] without a real
    /// FMTP transport.
    struct ScriptedTransport {
        products: Mutex<Vec<ProdInfo>>,
    }

    impl McastTransport for ScriptedTransport {
        fn run(&self, sink: &dyn ReceiverSink, halt: &HaltSignal) -> Result<(), TransportError> {
            let products = self.products.lock().unwrap().clone();
            for (idx, info) in products.into_iter().enumerate() {
                if halt.is_halted() {
                    return Ok(());
                }
                let i = ProdIndex(idx as u32);
                let mut frame = encode_prod_info(&info);
                frame.extend_from_slice(b"data");
                let frame_len = frame.len() as u32;
                match sink.bop(i, frame_len, info.signature.as_bytes()) {
                    Ok(crate::sink::BopAction::Reserved) => {}
                    _ => continue,
                }
                sink.write(i, &frame);
                sink.eop(i, frame.len()).unwrap();
            }
            Ok(())
        }
    }

    fn info(sig: u8) -> ProdInfo {
        ProdInfo {
            signature: Signature::from([sig; 16]),
            ident: "KEXP".into(),
            origin: "uplink1".into(),
            create_time_secs: 1,
            sz: 4,
            feed: FeedSpec::from_bits(1),
        }
    }

    #[test]
    fn run_drives_the_transport_to_completion_and_commits_products() {
        let queue = InMemoryProductQueue::new();
        let session = Arc::new(NullSession);
        let notifier = Arc::new(Notifier::new(queue.clone(), Arc::downgrade(&session)));
        let sink: Arc<dyn ReceiverSink> = Arc::new(NotifierSink::new(notifier));
        let transport = ScriptedTransport {
            products: Mutex::new(vec![info(1), info(2)]),
        };
        let mlr = Mlr::new(transport, sink);

        mlr.run().unwrap();

        assert!(queue.contains(Signature::from([1u8; 16])));
        assert!(queue.contains(Signature::from([2u8; 16])));
    }

    #[test]
    fn halt_is_idempotent_and_stops_the_transport_before_completion() {
        let queue = InMemoryProductQueue::new();
        let session = Arc::new(NullSession);
        let notifier = Arc::new(Notifier::new(queue.clone(), Arc::downgrade(&session)));
        let sink: Arc<dyn ReceiverSink> = Arc::new(NotifierSink::new(notifier));
        let transport = ScriptedTransport {
            products: Mutex::new(vec![info(3), info(4)]),
        };
        let mlr = Mlr::new(transport, sink);

        mlr.halt();
        mlr.halt();
        mlr.run().unwrap();

        assert!(!queue.contains(Signature::from([3u8; 16])));
        assert!(!queue.contains(Signature::from([4u8; 16])));
    }
}
