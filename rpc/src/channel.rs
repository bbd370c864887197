use crate::message::{Frame, SubscribeReply};
use ldm7_types::{BacklogSpec, FeedSpec, ProdIndex, Product};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("control connection was closed")]
    Closed,
}

type Sender = Arc<dyn Fn(OutboundFrame) -> Result<(), RpcError> + Send + Sync>;

/// What actually crosses to the socket-writer task: the frame, plus a
/// reply channel when [`Frame::expects_reply`] is true.
pub enum OutboundFrame {
    Call { frame: Frame, reply: oneshot::Sender<SubscribeReply> },
    Cast { frame: Frame },
}

/// A handle to the LDM-7 control connection. Every procedure is modeled
/// explicitly here as either a blocking call (`subscribe`) or a fire-and-
/// forget cast — the bidirectional message channel with per-procedure
/// "expects-reply" metadata described as the replacement for the source's
/// intentional-RPC-timeout trick. Cloning is cheap; many tasks on one
/// session share one `RpcChannel`.
#[derive(Clone)]
pub struct RpcChannel {
    tx: Sender,
}

impl RpcChannel {
    pub fn new(f: impl Fn(OutboundFrame) -> Result<(), RpcError> + Send + Sync + 'static) -> Self {
        Self { tx: Arc::new(f) }
    }

    pub async fn subscribe(&self, feed: FeedSpec) -> Result<SubscribeReply, RpcError> {
        let (reply, rx) = oneshot::channel();
        (self.tx)(OutboundFrame::Call { frame: Frame::Subscribe { feed }, reply })?;
        rx.await.map_err(|_| RpcError::Closed)
    }

    pub fn request_product(&self, i: ProdIndex) -> Result<(), RpcError> {
        self.cast(Frame::RequestProduct { i })
    }

    pub fn request_backlog(&self, spec: BacklogSpec) -> Result<(), RpcError> {
        self.cast(Frame::RequestBacklog { spec })
    }

    pub fn test_connection(&self) -> Result<(), RpcError> {
        self.cast(Frame::TestConnection)
    }

    pub fn deliver_missed_product(&self, i: ProdIndex, product: Product) -> Result<(), RpcError> {
        self.cast(Frame::DeliverMissedProduct { i, product })
    }

    pub fn no_such_product(&self, i: ProdIndex) -> Result<(), RpcError> {
        self.cast(Frame::NoSuchProduct { i })
    }

    pub fn deliver_backlog_product(&self, product: Product) -> Result<(), RpcError> {
        self.cast(Frame::DeliverBacklogProduct { product })
    }

    pub fn end_backlog(&self) -> Result<(), RpcError> {
        self.cast(Frame::EndBacklog)
    }

    fn cast(&self, frame: Frame) -> Result<(), RpcError> {
        debug_assert!(!frame.expects_reply());
        (self.tx)(OutboundFrame::Cast { frame })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldm7_types::Ldm7Status;
    use parking_lot::Mutex;

    fn channel_over(sink: Arc<Mutex<Vec<Frame>>>) -> RpcChannel {
        RpcChannel::new(move |outbound| {
            match outbound {
                OutboundFrame::Call { frame, reply } => {
                    sink.lock().push(frame);
                    let _ = reply.send(SubscribeReply::failure(Ldm7Status::Ok));
                }
                OutboundFrame::Cast { frame } => sink.lock().push(frame),
            }
            Ok(())
        })
    }

    #[tokio::test]
    async fn subscribe_awaits_its_reply() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let channel = channel_over(sink.clone());

        let reply = channel.subscribe(FeedSpec::from_bits(1)).await.unwrap();

        assert!(reply.status.is_ok());
        assert_eq!(sink.lock().as_slice(), &[Frame::Subscribe { feed: FeedSpec::from_bits(1) }]);
    }

    #[test]
    fn casts_return_immediately_without_a_reply_channel() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let channel = channel_over(sink.clone());

        channel.request_product(ProdIndex(1)).unwrap();
        channel.test_connection().unwrap();
        channel.end_backlog().unwrap();

        assert_eq!(
            sink.lock().as_slice(),
            &[Frame::RequestProduct { i: ProdIndex(1) }, Frame::TestConnection, Frame::EndBacklog]
        );
    }

    #[test]
    fn a_closed_sink_surfaces_as_rpc_error() {
        let channel = RpcChannel::new(|_| Err(RpcError::Closed));
        assert!(channel.test_connection().is_err());
    }
}
