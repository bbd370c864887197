use crate::state::{SessionState, SessionStateCell};
use futures::StreamExt;
use index_map::IndexMap;
use ldm7_futures::prelude::*;
use ldm7_types::{BacklogSpec, FeedSpec, Ldm7Status, ProdIndex, ProdInfo, Product};
use mlr::{HaltSignal, McastEndpoint, McastTransport, Mlr, NotifierSink, ReceiverSink, TransportError};
use notifier::{Notifier, SessionHandle};
use parking_lot::{Mutex, RwLock};
use product_queue::{ProductQueue, QueueError};
use rpc::{DownstreamHandler, Frame, RpcChannel};
use session_memory::SessionMemory;
use std::{
    path::PathBuf,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::{mpsc, Notify};

type ConnectFn = Arc<dyn Fn() -> Result<(RpcChannel, mpsc::Receiver<Frame>), Ldm7Status> + Send + Sync>;
type BuildTransportFn<T> = Arc<dyn Fn(McastEndpoint) -> Result<T, TransportError> + Send + Sync>;

enum SessionOutcome {
    Shutdown,
}

/// Adapts a [`mpsc::Receiver`] to [`futures::Stream`] so the UcastRecv loop
/// can be raced against a cancellation signal with
/// [`Ldm7StreamExt::take_until_signaled`].
struct FrameStream(mpsc::Receiver<Frame>);

impl futures::Stream for FrameStream {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.get_mut().0.poll_recv(cx)
    }
}

/// The downstream session controller (C6): the §4.6.2 session loop, owning
/// one feed's product queue, session memory, and notifier across however
/// many TCP connections it takes to keep a subscription alive.
///
/// Built with [`Arc::new_cyclic`] so it can hand its own notifier a `Weak`
/// back-pointer — the MLR/notifier side never gets to keep the controller
/// alive, matching the ownership direction laid out for the receiver side.
pub struct Controller<Q: ProductQueue, T: McastTransport> {
    feed: FeedSpec,
    queue: Q,
    memory: Arc<SessionMemory>,
    index_map_dir: PathBuf,
    backlog_time_offset: Duration,
    connect: ConnectFn,
    build_transport: BuildTransportFn<T>,
    notifier: Arc<Notifier<Q, Controller<Q, T>>>,
    state: SessionStateCell,
    stop_notify: Notify,
    mlr_halt: Mutex<Option<Arc<HaltSignal>>>,
    current_rpc: RwLock<Option<RpcChannel>>,
    first_mcast_seen: AtomicBool,
    fatal_error: Mutex<Option<Ldm7Status>>,
}

impl<Q: ProductQueue, T: McastTransport> Controller<Q, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: FeedSpec,
        queue: Q,
        memory: Arc<SessionMemory>,
        index_map_dir: PathBuf,
        backlog_time_offset: Duration,
        connect: impl Fn() -> Result<(RpcChannel, mpsc::Receiver<Frame>), Ldm7Status> + Send + Sync + 'static,
        build_transport: impl Fn(McastEndpoint) -> Result<T, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            feed,
            queue: queue.clone(),
            memory,
            index_map_dir,
            backlog_time_offset,
            connect: Arc::new(connect),
            build_transport: Arc::new(build_transport),
            notifier: Arc::new(Notifier::new(queue, weak.clone())),
            state: SessionStateCell::new(),
            stop_notify: Notify::new(),
            mlr_halt: Mutex::new(None),
            current_rpc: RwLock::new(None),
            first_mcast_seen: AtomicBool::new(false),
            fatal_error: Mutex::new(None),
        })
    }

    /// Runs sessions back to back until `stop()` is called or a session
    /// ends with a non-soft status (§4.6.5). Returns `Err(Inval)` without
    /// running anything if `start()` was already called once (P8).
    pub async fn start(self: &Arc<Self>) -> Result<(), Ldm7Status> {
        if !self.state.try_start() {
            return Err(Ldm7Status::Inval);
        }

        loop {
            if self.state.is_stopping() {
                break;
            }
            match self.run_one_session().await {
                Ok(SessionOutcome::Shutdown) => break,
                Err(status) => {
                    tracing::warn!(%status, "session ended");
                    if !status.is_soft() {
                        break;
                    }
                    if status != Ldm7Status::Timedout && self.nap_or_stop(Duration::from_secs(60)).await {
                        break;
                    }
                }
            }
        }

        let _ = self.memory.close();
        self.state.finish();
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Requests shutdown. Safe to call from any thread, any number of
    /// times, before or during or after `start()` (P8).
    pub fn stop(&self) {
        self.state.request_stop();
        self.memory.shutdown_missed();
        if let Some(halt) = self.mlr_halt.lock().as_ref() {
            halt.halt();
        }
        self.stop_notify.notify_waiters();
    }

    async fn nap_or_stop(&self, dur: Duration) -> bool {
        let notified = self.stop_notify.notified();
        if self.state.is_stopping() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(dur) => self.state.is_stopping(),
            _ = notified => true,
        }
    }

    async fn run_one_session(self: &Arc<Self>) -> Result<SessionOutcome, Ldm7Status> {
        self.first_mcast_seen.store(false, Ordering::SeqCst);
        self.fatal_error.lock().take();

        let (rpc, frames_rx) = (self.connect)()?;
        *self.current_rpc.write() = Some(rpc.clone());

        let reply = rpc.subscribe(self.feed).await.map_err(|_| Ldm7Status::Rpc)?;
        if !reply.status.is_ok() {
            return Err(reply.status);
        }
        let endpoint = endpoint_from(&reply)?;

        // Opened for the lifetime of the session even though nothing here
        // reads from it directly: recovery runs entirely over the RPC
        // channel, but keeping a read-only mapping open means this
        // session's view of the index map is crash-consistent with the
        // upstream's for as long as the connection lives.
        let _index_map = IndexMap::open_for_reading(&self.index_map_dir, self.feed).map_err(|e| {
            tracing::warn!(error = %e, "failed to open index map for reading");
            Ldm7Status::System
        })?;

        let transport = (self.build_transport)(endpoint).map_err(|e| {
            tracing::warn!(error = %e, "multicast transport unavailable");
            Ldm7Status::Mcast
        })?;
        let sink: Arc<dyn ReceiverSink> = Arc::new(NotifierSink::new(self.notifier.clone()));
        let mlr = Mlr::new(transport, sink);
        *self.mlr_halt.lock() = Some(mlr.halt_handle());

        let mut request_task = tokio::spawn(run_request_task(self.memory.clone(), rpc.clone()));
        let mut mcast_task = tokio::task::spawn_blocking(move || mlr.run());
        let ucast_controller = self.clone();
        let mut ucast_task = tokio::spawn(async move { ucast_controller.run_ucast_recv(frames_rx).await });

        tokio::select! {
            _ = &mut request_task => {}
            _ = &mut mcast_task => {}
            _ = &mut ucast_task => {}
        }
        // The blocking transport thread only stops when told to: whichever
        // task ended this session, make sure it actually does.
        if let Some(halt) = self.mlr_halt.lock().as_ref() {
            halt.halt();
        }
        request_task.abort();
        mcast_task.abort();
        ucast_task.abort();
        // §5: discard any reservation BOP made but that never reached an
        // EOP or MISSED before this session ended. The notifier outlives
        // this session, so a leftover reservation would otherwise keep its
        // signature looking "reserved" forever and mask a legitimate
        // re-receive as a duplicate next session.
        self.notifier.discard_pending();

        if let Some(status) = self.fatal_error.lock().take() {
            return Err(status);
        }
        if self.state.is_stopping() {
            return Ok(SessionOutcome::Shutdown);
        }
        // None of the three tasks reported a specific failure: the most
        // likely cause is the peer closing the connection. Soft, so the
        // session naps and tries again.
        Err(Ldm7Status::Rpc)
    }

    /// Races the frame stream against `stop_notify`, which fires both on an
    /// explicit `stop()` and on a fatal error recorded by `fail()` — either
    /// way, this session's tasks are done.
    async fn run_ucast_recv(self: Arc<Self>, frames: mpsc::Receiver<Frame>) {
        let mut stream = FrameStream(frames).take_until_signaled(self.stop_notify.notified());
        while let Some(frame) = stream.next().await {
            match frame {
                Frame::DeliverMissedProduct { i, product } => self.deliver_missed_product(i, product),
                Frame::NoSuchProduct { i } => self.no_such_product(i),
                Frame::DeliverBacklogProduct { product } => self.deliver_backlog_product(product),
                Frame::EndBacklog => self.end_backlog(),
                Frame::TestConnection => {}
                other => tracing::warn!(?other, "UcastRecv dropped an unexpected frame"),
            }
        }
    }

    /// Inserts a product delivered whole over RPC (unicast recovery or
    /// backlog). `Duplicate`/`TooBig` are absorbed (§4.4, §7); anything
    /// else is fatal to the session.
    fn insert_product(&self, product: Product) -> Option<Ldm7Status> {
        match self.queue.reserve(product.info.signature, product.info.sz) {
            Ok(mut reservation) => {
                let n = product.data.len().min(reservation.buffer_len());
                reservation.buffer_mut()[..n].copy_from_slice(&product.data[..n]);
                match reservation.commit(product.info) {
                    Ok(()) | Err(QueueError::Duplicate) | Err(QueueError::TooBig) => None,
                    Err(e) => Some(map_queue_error(e)),
                }
            }
            Err(QueueError::Duplicate) | Err(QueueError::TooBig) => None,
            Err(e) => Some(map_queue_error(e)),
        }
    }

    fn fail(&self, status: Ldm7Status) {
        let mut err = self.fatal_error.lock();
        if err.is_none() {
            *err = Some(status);
        }
        drop(err);
        self.stop_notify.notify_waiters();
    }
}

fn map_queue_error(e: QueueError) -> Ldm7Status {
    match e {
        QueueError::Duplicate => Ldm7Status::Dup,
        QueueError::TooBig => Ldm7Status::Inval,
        QueueError::Closed => Ldm7Status::Shutdown,
        QueueError::Other(_) => Ldm7Status::System,
    }
}

fn endpoint_from(reply: &ldm7_types::SubscriptionReply) -> Result<McastEndpoint, Ldm7Status> {
    let info = reply.mcast_info.ok_or(Ldm7Status::Inval)?;
    let local_iface = reply.client_addr.map(|a| a.ip()).unwrap_or_else(|| info.server.ip());
    Ok(McastEndpoint {
        group: info.group,
        tcp_server: info.server,
        local_iface,
    })
}

/// The Request task (§4.6.2): every `ProdIndex` entering `missed_q` is
/// requested exactly once per session (P4), never re-requested while still
/// outstanding.
async fn run_request_task(memory: Arc<SessionMemory>, rpc: RpcChannel) {
    loop {
        let i = match memory.peek_missed_wait().await {
            Some(i) => i,
            None => break,
        };
        memory.add_requested(i);
        memory.remove_missed_nowait();
        let _ = rpc.request_product(i);
    }
}

impl<Q: ProductQueue, T: McastTransport> SessionHandle for Controller<Q, T> {
    fn last_received(&self, info: &ProdInfo) {
        let prev = self.memory.get_last_mcast_sig();
        self.memory.set_last_mcast_sig(info.signature);

        if !self.first_mcast_seen.swap(true, Ordering::SeqCst) {
            let spec = BacklogSpec {
                after: prev,
                before: info.signature,
                time_offset: self.backlog_time_offset,
            };
            if let Some(rpc) = self.current_rpc.read().clone() {
                let _ = rpc.request_backlog(spec);
            }
        }
    }

    fn missed_product(&self, i: ProdIndex) {
        self.memory.add_missed(i);
    }
}

impl<Q: ProductQueue, T: McastTransport> DownstreamHandler for Controller<Q, T> {
    fn deliver_missed_product(&self, i: ProdIndex, product: Product) {
        // P5: a unicast reply is only accepted if it answers the oldest
        // outstanding request. Anything else means the two sides have
        // diverged, and the only safe move is to tear the session down.
        if self.memory.peek_requested_nowait() != Some(i) {
            tracing::warn!(
                delivered = %i,
                requested = ?self.memory.peek_requested_nowait(),
                "unicast reply out of order, resetting session"
            );
            self.fail(Ldm7Status::Rpc);
            return;
        }
        self.memory.remove_requested_nowait();
        if let Some(status) = self.insert_product(product) {
            self.fail(status);
        }
    }

    fn no_such_product(&self, i: ProdIndex) {
        if self.memory.peek_requested_nowait() == Some(i) {
            self.memory.remove_requested_nowait();
        }
        tracing::debug!(%i, "upstream reports no such product");
    }

    fn deliver_backlog_product(&self, product: Product) {
        if let Some(status) = self.insert_product(product) {
            self.fail(status);
        }
    }

    fn end_backlog(&self) {
        tracing::debug!("backlog delivery complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldm7_types::{McastInfo, Signature, SubscriptionReply};
    use product_queue::InMemoryProductQueue;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    struct NeverTransport;
    impl McastTransport for NeverTransport {
        fn run(&self, _sink: &dyn ReceiverSink, _halt: &HaltSignal) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn never_connect() -> Result<(RpcChannel, mpsc::Receiver<Frame>), Ldm7Status> {
        Err(Ldm7Status::Refused)
    }

    fn never_transport(_: McastEndpoint) -> Result<NeverTransport, TransportError> {
        Ok(NeverTransport)
    }

    fn test_controller() -> (Arc<Controller<InMemoryProductQueue, NeverTransport>>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let feed = FeedSpec::from_bits(1);
        let memory = Arc::new(SessionMemory::open(dir.path(), "host:1", feed).unwrap());
        let controller = Controller::new(
            feed,
            InMemoryProductQueue::new(),
            memory,
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
            never_connect,
            never_transport,
        );
        (controller, dir)
    }

    fn prod_info(sig: [u8; 16]) -> ProdInfo {
        ProdInfo {
            signature: Signature::from(sig),
            ident: "KEXP".into(),
            origin: "uplink1".into(),
            create_time_secs: 1,
            sz: 4,
            feed: FeedSpec::from_bits(1),
        }
    }

    #[test]
    fn deliver_missed_product_out_of_order_resets_the_session() {
        let (controller, _dir) = test_controller();
        controller.memory.add_requested(ProdIndex(5));

        let product = Product { info: prod_info([9u8; 16]), data: b"data".to_vec() };
        controller.deliver_missed_product(ProdIndex(6), product);

        assert_eq!(*controller.fatal_error.lock(), Some(Ldm7Status::Rpc));
        // the mismatched request is left untouched for a future session
        assert_eq!(controller.memory.peek_requested_nowait(), Some(ProdIndex(5)));
    }

    #[test]
    fn deliver_missed_product_matching_the_head_commits_and_clears_it() {
        let (controller, _dir) = test_controller();
        controller.memory.add_requested(ProdIndex(5));

        let product = Product { info: prod_info([1u8; 16]), data: b"data".to_vec() };
        controller.deliver_missed_product(ProdIndex(5), product);

        assert!(controller.fatal_error.lock().is_none());
        assert_eq!(controller.memory.peek_requested_nowait(), None);
        assert!(controller.queue.contains(Signature::from([1u8; 16])));
    }

    #[test]
    fn no_such_product_clears_a_matching_request_without_failing() {
        let (controller, _dir) = test_controller();
        controller.memory.add_requested(ProdIndex(3));

        controller.no_such_product(ProdIndex(3));

        assert!(controller.fatal_error.lock().is_none());
        assert_eq!(controller.memory.peek_requested_nowait(), None);
    }

    #[test]
    fn first_multicast_eop_triggers_a_backlog_request_only_once() {
        let (controller, _dir) = test_controller();
        let (rpc, mut outbound) = test_rpc();
        *controller.current_rpc.write() = Some(rpc);

        controller.last_received(&prod_info([1u8; 16]));
        controller.last_received(&prod_info([2u8; 16]));

        assert!(matches!(outbound.try_recv(), Ok(Frame::RequestBacklog { .. })));
        assert!(outbound.try_recv().is_err());
        assert_eq!(controller.memory.get_last_mcast_sig(), Some(Signature::from([2u8; 16])));
    }

    fn test_rpc() -> (RpcChannel, mpsc::UnboundedReceiver<Frame>) {
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

    #[tokio::test]
    async fn start_after_stop_is_rejected() {
        let (controller, _dir) = test_controller();
        let handle = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start().await }
        });
        controller.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(controller.state(), crate::state::SessionState::Stopped);
        assert_eq!(controller.start().await, Err(Ldm7Status::Inval));
    }

    fn mcast_info() -> McastInfo {
        McastInfo {
            feed: FeedSpec::from_bits(1),
            server: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 388),
            group: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(224, 0, 0, 1)), 9000),
        }
    }

    fn subscribed_ok() -> SubscriptionReply {
        SubscriptionReply {
            status: Ldm7Status::Ok,
            mcast_info: Some(mcast_info()),
            client_addr: None,
            prefix_len: None,
            switch_port: None,
            vlan_id: None,
        }
    }

    #[test]
    fn endpoint_from_uses_the_granted_client_address_when_present() {
        let mut reply = subscribed_ok();
        reply.client_addr = Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 0));

        let endpoint = endpoint_from(&reply).unwrap();

        assert_eq!(endpoint.local_iface, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(endpoint.group, mcast_info().group);
    }

    #[test]
    fn endpoint_from_rejects_a_reply_without_mcast_info() {
        let reply = SubscriptionReply::failure(Ldm7Status::Ok);
        assert_eq!(endpoint_from(&reply), Err(Ldm7Status::Inval));
    }
}
