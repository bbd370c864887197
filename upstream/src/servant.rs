use crate::{
    address_pool::{AddressPool, ReservedAddress},
    authorizer::SenderAuthorizer,
    context::IndexMapHandle,
    supervisor::SenderSupervision,
};
use ldm7_types::{BacklogSpec, FeedSpec, Ldm7Status, ProdIndex, SubscriptionReply};
use parking_lot::Mutex;
use product_queue::ProductQueue;
use rpc::{RpcChannel, UpstreamHandler};
use std::{net::SocketAddr, sync::Arc, time::SystemTime};

/// The upstream session servant (C7): lifetime == one downstream
/// connection (§4.7). Implements [`UpstreamHandler`] so `rpc`'s dispatcher
/// can route `subscribe`/`request_product`/`request_backlog` straight into
/// it without a thread-local "current session" lookup (§9).
pub struct Servant<Q: ProductQueue> {
    permitted: FeedSpec,
    queue: Q,
    index_maps: IndexMapHandle,
    supervisor: Arc<dyn SenderSupervision>,
    address_pool: Arc<dyn AddressPool>,
    authorizer: Arc<dyn SenderAuthorizer>,
    rpc: RpcChannel,
    granted: Mutex<Option<Granted>>,
}

struct Granted {
    feed: FeedSpec,
    address: ReservedAddress,
}

impl<Q: ProductQueue> Servant<Q> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        permitted: FeedSpec,
        queue: Q,
        index_maps: IndexMapHandle,
        supervisor: Arc<dyn SenderSupervision>,
        address_pool: Arc<dyn AddressPool>,
        authorizer: Arc<dyn SenderAuthorizer>,
        rpc: RpcChannel,
    ) -> Self {
        Self {
            permitted,
            queue,
            index_maps,
            supervisor,
            address_pool,
            authorizer,
            rpc,
            granted: Mutex::new(None),
        }
    }

    fn subscribe_inner(&self, requested: FeedSpec) -> Result<SubscriptionReply, Ldm7Status> {
        // §4.7.1 step 1: local ALLOW rules restrict the request to the
        // permitted subset; an empty intersection is unauthorized.
        let granted_feed = requested.restrict(self.permitted);
        if granted_feed.is_none() {
            return Err(Ldm7Status::Unauth);
        }

        // step 2: ensure the multicast sender for this feed is running.
        let (mcast_info, pid) = self.supervisor.ensure_running(granted_feed).map_err(|e| {
            tracing::warn!(error = %e, %granted_feed, "failed to ensure multicast sender is running");
            Ldm7Status::System
        })?;

        // step 3: reserve a client address from the feed's pool.
        let address = self.address_pool.reserve(granted_feed).map_err(|e| {
            tracing::warn!(error = %e, "address pool exhausted");
            Ldm7Status::System
        })?;

        // step 4: authorize that address with the sender out-of-band.
        if let Err(e) = self.authorizer.authorize(pid, address.addr) {
            tracing::warn!(error = %e, "sender refused to authorize client address");
            self.address_pool.release(address.addr);
            return Err(Ldm7Status::System);
        }

        // step 5: open (or join) the feed's index map for writing.
        if let Err(e) = self.index_maps.open_for_writing(granted_feed) {
            tracing::warn!(error = %e, %granted_feed, "failed to open index map");
            self.address_pool.release(address.addr);
            return Err(Ldm7Status::System);
        }

        *self.granted.lock() = Some(Granted { feed: granted_feed, address });

        Ok(SubscriptionReply {
            status: Ldm7Status::Ok,
            mcast_info: Some(mcast_info),
            client_addr: Some(SocketAddr::new(address.addr, 0)),
            prefix_len: Some(address.prefix_len),
            switch_port: address.switch_port,
            vlan_id: address.vlan_id,
        })
    }
}

impl<Q: ProductQueue> UpstreamHandler for Servant<Q> {
    fn subscribe(&self, feed: FeedSpec) -> SubscriptionReply {
        match self.subscribe_inner(feed) {
            Ok(reply) => reply,
            Err(status) => SubscriptionReply::failure(status),
        }
    }

    /// §4.7.2: the gap-fill service. Fire-and-forget in both the found and
    /// not-found case — neither reply blocks the caller (§6).
    fn request_product(&self, i: ProdIndex) {
        let feed = match self.granted.lock().as_ref().map(|g| g.feed) {
            Some(feed) => feed,
            None => {
                tracing::warn!(%i, "request_product before a successful subscribe");
                let _ = self.rpc.no_such_product(i);
                return;
            }
        };
        let map = match self.index_maps.open_for_writing(feed) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, %feed, "index map unavailable for gap-fill");
                let _ = self.rpc.no_such_product(i);
                return;
            }
        };
        let delivered = map
            .get(i)
            .and_then(|sig| self.queue.get_by_signature(sig))
            .map(|product| self.rpc.deliver_missed_product(i, product));

        match delivered {
            Some(Ok(())) => {}
            Some(Err(e)) => tracing::warn!(error = %e, %i, "failed to deliver missed product"),
            None => {
                if let Err(e) = self.rpc.no_such_product(i) {
                    tracing::warn!(error = %e, %i, "failed to reply no_such_product");
                }
            }
        }
    }

    /// §4.7.3: walk the queue from `spec.after` (or `now - spec.time_offset`
    /// if absent/not found) up to, but excluding, `spec.before`, then emit
    /// `end_backlog`.
    fn request_backlog(&self, spec: BacklogSpec) {
        let feed = match self.granted.lock().as_ref().map(|g| g.feed) {
            Some(feed) => feed,
            None => {
                tracing::warn!("request_backlog before a successful subscribe");
                let _ = self.rpc.end_backlog();
                return;
            }
        };
        let products = self.queue.backlog(feed, spec.after, spec.before, SystemTime::now(), spec.time_offset);
        for product in products {
            if let Err(e) = self.rpc.deliver_backlog_product(product) {
                tracing::warn!(error = %e, "backlog delivery aborted, connection likely gone");
                return;
            }
        }
        if let Err(e) = self.rpc.end_backlog() {
            tracing::warn!(error = %e, "failed to send end_backlog");
        }
    }
}

impl<Q: ProductQueue> Drop for Servant<Q> {
    /// §4.7.1 "Failures: release any reservation" generalizes to every
    /// teardown path, not just a failed subscribe: whenever this
    /// connection's servant goes away, its granted address goes back to
    /// the pool.
    fn drop(&mut self) {
        if let Some(granted) = self.granted.lock().take() {
            self.address_pool.release(granted.address.addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryAddressPool, InMemorySenderAuthorizer, SenderSupervisor, SenderSupervision, SpawnError, SpawnedSender};
    use ldm7_types::{FeedSpec, McastInfo, ProdInfo, Product, Signature};
    use product_queue::InMemoryProductQueue;
    use std::{
        net::{IpAddr, Ipv4Addr},
        time::Duration,
    };
    use tokio::sync::mpsc;

    struct AlwaysOneSpawner;
    impl crate::SenderSpawner for AlwaysOneSpawner {
        fn spawn(&self, feed: FeedSpec) -> Result<SpawnedSender, SpawnError> {
            Ok(SpawnedSender {
                pid: 1,
                mcast_info: McastInfo {
                    feed,
                    server: std::net::SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 388),
                    group: std::net::SocketAddr::new(IpAddr::V4(Ipv4Addr::new(224, 0, 0, 1)), 9000),
                },
            })
        }
        fn is_alive(&self, _pid: u32) -> bool {
            true
        }
        fn terminate(&self, _pid: u32) {}
    }

    fn test_rpc() -> (RpcChannel, mpsc::UnboundedReceiver<rpc::Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rpc = RpcChannel::new(move |outbound| {
            let frame = match outbound {
                rpc::OutboundFrame::Call { frame, .. } => frame,
                rpc::OutboundFrame::Cast { frame } => frame,
            };
            tx.send(frame).map_err(|_| rpc::RpcError::Closed)
        });
        (rpc, rx)
    }

    fn test_servant(permitted: FeedSpec, queue: InMemoryProductQueue, rpc: RpcChannel) -> (Servant<InMemoryProductQueue>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let supervisor: Arc<dyn SenderSupervision> = Arc::new(SenderSupervisor::new(AlwaysOneSpawner));
        let pool: Arc<dyn AddressPool> = Arc::new(InMemoryAddressPool::new([IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))], 24));
        let authorizer: Arc<dyn SenderAuthorizer> = Arc::new(InMemorySenderAuthorizer::new());
        let context = crate::UpstreamContext::new(permitted, queue, dir.path().to_path_buf(), 16, supervisor, pool, authorizer);
        (context.new_servant(rpc), dir)
    }

    #[test]
    fn subscribe_to_an_unpermitted_feed_is_unauthorized() {
        let (rpc, _rx) = test_rpc();
        let (servant, _dir) = test_servant(FeedSpec::from_bits(0b01), InMemoryProductQueue::new(), rpc);
        let reply = servant.subscribe(FeedSpec::from_bits(0b10));
        assert_eq!(reply.status, Ldm7Status::Unauth);
        assert!(reply.mcast_info.is_none());
    }

    #[test]
    fn subscribe_to_a_permitted_feed_grants_mcast_info_and_a_client_address() {
        let (rpc, _rx) = test_rpc();
        let (servant, _dir) = test_servant(FeedSpec::from_bits(0b11), InMemoryProductQueue::new(), rpc);
        let reply = servant.subscribe(FeedSpec::from_bits(0b01));
        assert_eq!(reply.status, Ldm7Status::Ok);
        assert!(reply.mcast_info.is_some());
        assert_eq!(reply.client_addr.unwrap().ip(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }

    fn prod_info(sig: u8, feed: u32, t: u64) -> ProdInfo {
        ProdInfo {
            signature: Signature::from([sig; 16]),
            ident: "KEXP".into(),
            origin: "uplink1".into(),
            create_time_secs: t,
            sz: 4,
            feed: FeedSpec::from_bits(feed),
        }
    }

    #[test]
    fn request_product_delivers_when_the_index_map_and_queue_both_have_it() {
        let (rpc, mut rx) = test_rpc();
        let queue = InMemoryProductQueue::new();
        let mut r = queue.reserve(Signature::from([9u8; 16]), 4).unwrap();
        r.buffer_mut().copy_from_slice(b"data");
        r.commit(prod_info(9, 1, 1)).unwrap();

        let (servant, dir) = test_servant(FeedSpec::from_bits(1), queue, rpc);
        assert!(servant.subscribe(FeedSpec::from_bits(1)).status.is_ok());

        let mut map = index_map::IndexMap::open_for_writing(dir.path(), FeedSpec::from_bits(1), 16).unwrap();
        map.put(ProdIndex(7), Signature::from([9u8; 16])).unwrap();
        drop(map);

        servant.request_product(ProdIndex(7));

        let frame = rx.try_recv().unwrap();
        assert!(matches!(frame, rpc::Frame::DeliverMissedProduct { i: ProdIndex(7), .. }));
    }

    #[test]
    fn request_product_reports_no_such_product_when_the_index_is_unknown() {
        let (rpc, mut rx) = test_rpc();
        let (servant, _dir) = test_servant(FeedSpec::from_bits(1), InMemoryProductQueue::new(), rpc);
        assert!(servant.subscribe(FeedSpec::from_bits(1)).status.is_ok());

        servant.request_product(ProdIndex(99));

        let frame = rx.try_recv().unwrap();
        assert!(matches!(frame, rpc::Frame::NoSuchProduct { i: ProdIndex(99) }));
    }

    #[test]
    fn request_backlog_streams_products_then_ends() {
        let (rpc, mut rx) = test_rpc();
        let queue = InMemoryProductQueue::new();
        for (i, sig) in [1u8, 2, 3].into_iter().enumerate() {
            let mut r = queue.reserve(Signature::from([sig; 16]), 1).unwrap();
            r.buffer_mut()[0] = sig;
            r.commit(prod_info(sig, 1, i as u64 + 1)).unwrap();
        }
        let (servant, _dir) = test_servant(FeedSpec::from_bits(1), queue, rpc);
        assert!(servant.subscribe(FeedSpec::from_bits(1)).status.is_ok());

        servant.request_backlog(BacklogSpec {
            after: Some(Signature::from([1u8; 16])),
            before: Signature::from([3u8; 16]),
            time_offset: Duration::ZERO,
        });

        let first = rx.try_recv().unwrap();
        assert!(matches!(first, rpc::Frame::DeliverBacklogProduct { product } if product.info.signature == Signature::from([2u8; 16])));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second, rpc::Frame::EndBacklog));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropping_a_servant_releases_its_address_reservation() {
        let (rpc, _rx) = test_rpc();
        let dir = tempfile::tempdir().unwrap();
        let supervisor: Arc<dyn SenderSupervision> = Arc::new(SenderSupervisor::new(AlwaysOneSpawner));
        let pool = Arc::new(InMemoryAddressPool::new([IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))], 24));
        let authorizer: Arc<dyn SenderAuthorizer> = Arc::new(InMemorySenderAuthorizer::new());
        let context = crate::UpstreamContext::new(
            FeedSpec::from_bits(1),
            InMemoryProductQueue::new(),
            dir.path().to_path_buf(),
            16,
            supervisor,
            pool.clone() as Arc<dyn AddressPool>,
            authorizer,
        );
        let servant = context.new_servant(rpc);
        assert!(servant.subscribe(FeedSpec::from_bits(1)).status.is_ok());
        assert!(matches!(pool.reserve(FeedSpec::from_bits(1)), Err(_)));

        drop(servant);
        assert!(pool.reserve(FeedSpec::from_bits(1)).is_ok());
    }
}
