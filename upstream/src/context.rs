use crate::{
    address_pool::AddressPool,
    authorizer::SenderAuthorizer,
    servant::Servant,
    supervisor::SenderSupervision,
};
use index_map::{IndexMap, IndexMapError};
use ldm7_types::FeedSpec;
use parking_lot::Mutex;
use product_queue::ProductQueue;
use rpc::RpcChannel;
use std::{collections::HashMap, path::PathBuf, sync::Arc};

/// A feed's index map, opened once and shared by every [`Servant`] that
/// ends up serving that feed concurrently (§3 Ownership: "the product-
/// index map is process-wide per feed").
#[derive(Clone)]
pub(crate) struct SharedIndexMap(Arc<Mutex<IndexMap>>);

impl SharedIndexMap {
    pub(crate) fn get(&self, i: ldm7_types::ProdIndex) -> Option<ldm7_types::Signature> {
        self.0.lock().get(i)
    }
}

pub(crate) struct IndexMapRegistry {
    dir: PathBuf,
    capacity: u32,
    open: Mutex<HashMap<FeedSpec, SharedIndexMap>>,
}

impl IndexMapRegistry {
    pub(crate) fn open_for_writing(&self, feed: FeedSpec) -> Result<SharedIndexMap, IndexMapError> {
        let mut open = self.open.lock();
        if let Some(m) = open.get(&feed) {
            return Ok(m.clone());
        }
        let map = IndexMap::open_for_writing(&self.dir, feed, self.capacity)?;
        let shared = SharedIndexMap(Arc::new(Mutex::new(map)));
        open.insert(feed, shared.clone());
        Ok(shared)
    }
}

/// The process-wide state every upstream [`Servant`] shares (§4.7: one
/// servant is forked per downstream connection, but the sender supervisor,
/// index maps, and address pool underneath it are per-process/per-feed).
/// `new_servant` is the "fork" — cheap, since everything it shares is
/// already behind an `Arc`.
pub struct UpstreamContext<Q: ProductQueue> {
    permitted: FeedSpec,
    queue: Q,
    index_maps: Arc<IndexMapRegistry>,
    supervisor: Arc<dyn SenderSupervision>,
    address_pool: Arc<dyn AddressPool>,
    authorizer: Arc<dyn SenderAuthorizer>,
}

impl<Q: ProductQueue> UpstreamContext<Q> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        permitted: FeedSpec,
        queue: Q,
        index_map_dir: PathBuf,
        index_map_capacity: u32,
        supervisor: Arc<dyn SenderSupervision>,
        address_pool: Arc<dyn AddressPool>,
        authorizer: Arc<dyn SenderAuthorizer>,
    ) -> Self {
        Self {
            permitted,
            queue,
            index_maps: Arc::new(IndexMapRegistry {
                dir: index_map_dir,
                capacity: index_map_capacity,
                open: Mutex::new(HashMap::new()),
            }),
            supervisor,
            address_pool,
            authorizer,
        }
    }

    /// Builds a new servant for one incoming TCP connection, bound to
    /// `rpc` for its asynchronous callbacks to that downstream (§4.7.1
    /// step 7).
    pub fn new_servant(&self, rpc: RpcChannel) -> Servant<Q> {
        Servant::new(
            self.permitted,
            self.queue.clone(),
            self.index_maps.clone(),
            self.supervisor.clone(),
            self.address_pool.clone(),
            self.authorizer.clone(),
            rpc,
        )
    }
}

pub(crate) type IndexMapHandle = Arc<IndexMapRegistry>;
