use crate::message::Frame;
use ldm7_types::{BacklogSpec, FeedSpec, ProdIndex, Product, SubscriptionReply};
use tokio::sync::mpsc;

/// What a dispatcher does with each decoded frame, expressed as an
/// explicit trait with an owned `&self` receiver rather than a thread-local
/// "current session" lookup — the redesign the source's per-thread
/// `Down7*`/`Up7*` context key called for. One implementor runs on the
/// upstream side (serving `subscribe`/`request_product`/`request_backlog`);
/// a different one runs on the downstream side (serving the four
/// upstream-initiated callbacks).
pub trait UpstreamHandler: Send + Sync {
    fn subscribe(&self, feed: FeedSpec) -> SubscriptionReply;
    fn request_product(&self, i: ProdIndex);
    fn request_backlog(&self, spec: BacklogSpec);
    fn test_connection(&self) {}
}

pub trait DownstreamHandler: Send + Sync {
    fn deliver_missed_product(&self, i: ProdIndex, product: Product);
    fn no_such_product(&self, i: ProdIndex);
    fn deliver_backlog_product(&self, product: Product);
    fn end_backlog(&self);
    fn test_connection(&self) {}
}

/// Drains decoded frames from the socket-reader task and routes each to
/// `handler`, replying to `subscribe` calls over `reply_tx`. Runs until the
/// channel closes (the socket-reader exits on a zero-byte read or error).
pub async fn run_upstream_dispatcher<H: UpstreamHandler>(
    handler: &H,
    mut frames: mpsc::Receiver<Frame>,
    reply_tx: &mpsc::Sender<Frame>,
) {
    while let Some(frame) = frames.recv().await {
        match frame {
            Frame::Subscribe { feed } => {
                let reply = handler.subscribe(feed);
                if reply_tx.send(Frame::SubscribeReply { reply }).await.is_err() {
                    break;
                }
            }
            Frame::RequestProduct { i } => handler.request_product(i),
            Frame::RequestBacklog { spec } => handler.request_backlog(spec),
            Frame::TestConnection => handler.test_connection(),
            other => tracing::warn!("upstream dispatcher got an unexpected frame: {other:?}"),
        }
    }
}

pub async fn run_downstream_dispatcher<H: DownstreamHandler>(handler: &H, mut frames: mpsc::Receiver<Frame>) {
    while let Some(frame) = frames.recv().await {
        match frame {
            Frame::DeliverMissedProduct { i, product } => handler.deliver_missed_product(i, product),
            Frame::NoSuchProduct { i } => handler.no_such_product(i),
            Frame::DeliverBacklogProduct { product } => handler.deliver_backlog_product(product),
            Frame::EndBacklog => handler.end_backlog(),
            Frame::TestConnection => handler.test_connection(),
            other => tracing::warn!("downstream dispatcher got an unexpected frame: {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldm7_types::Signature;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingUpstream {
        requested: Mutex<Vec<ProdIndex>>,
    }

    impl UpstreamHandler for RecordingUpstream {
        fn subscribe(&self, feed: FeedSpec) -> SubscriptionReply {
            if feed.is_none() {
                SubscriptionReply::failure(ldm7_types::Ldm7Status::Unauth)
            } else {
                SubscriptionReply::failure(ldm7_types::Ldm7Status::Ok)
            }
        }

        fn request_product(&self, i: ProdIndex) {
            self.requested.lock().push(i);
        }

        fn request_backlog(&self, _spec: BacklogSpec) {}
    }

    #[tokio::test]
    async fn subscribe_gets_a_reply_and_casts_do_not() {
        let handler = Arc::new(RecordingUpstream::default());
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let dispatcher_handler = handler.clone();
        let dispatcher = tokio::spawn(async move {
            run_upstream_dispatcher(dispatcher_handler.as_ref(), in_rx, &out_tx).await;
        });

        in_tx.send(Frame::Subscribe { feed: FeedSpec::from_bits(1) }).await.unwrap();
        in_tx.send(Frame::RequestProduct { i: ProdIndex(5) }).await.unwrap();
        drop(in_tx);
        dispatcher.await.unwrap();

        let reply = out_rx.recv().await.unwrap();
        assert!(matches!(reply, Frame::SubscribeReply { reply } if reply.status == ldm7_types::Ldm7Status::Ok));
        assert_eq!(handler.requested.lock().as_slice(), &[ProdIndex(5)]);
    }

    #[derive(Default)]
    struct RecordingDownstream {
        delivered: Mutex<Vec<ProdIndex>>,
        ended: Mutex<bool>,
    }

    impl DownstreamHandler for RecordingDownstream {
        fn deliver_missed_product(&self, i: ProdIndex, _product: Product) {
            self.delivered.lock().push(i);
        }
        fn no_such_product(&self, _i: ProdIndex) {}
        fn deliver_backlog_product(&self, _product: Product) {}
        fn end_backlog(&self) {
            *self.ended.lock() = true;
        }
    }

    #[tokio::test]
    async fn downstream_dispatcher_routes_callbacks() {
        let handler = Arc::new(RecordingDownstream::default());
        let (tx, rx) = mpsc::channel(8);

        let dispatcher_handler = handler.clone();
        let dispatcher = tokio::spawn(async move {
            run_downstream_dispatcher(dispatcher_handler.as_ref(), rx).await;
        });

        let product = Product {
            info: ldm7_types::ProdInfo {
                signature: Signature::from([1u8; 16]),
                ident: "KEXP".into(),
                origin: "uplink1".into(),
                create_time_secs: 1,
                sz: 4,
                feed: FeedSpec::from_bits(1),
            },
            data: b"data".to_vec(),
        };
        tx.send(Frame::DeliverMissedProduct { i: ProdIndex(2), product }).await.unwrap();
        tx.send(Frame::EndBacklog).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        assert_eq!(handler.delivered.lock().as_slice(), &[ProdIndex(2)]);
        assert!(*handler.ended.lock());
    }
}
