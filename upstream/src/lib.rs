//! The upstream session servant (C7) and the multicast-sender supervisor
//! (C8): one [`Servant`] is forked per downstream subscription (§4.7),
//! sharing a process-wide [`UpstreamContext`] that coordinates the
//! per-feed multicast sender, index map, and client-address pool across
//! however many servants end up serving the same feed concurrently.

mod address_pool;
mod authorizer;
mod context;
mod servant;
mod supervisor;

pub use address_pool::{AddressPool, InMemoryAddressPool, PoolExhausted, ReservedAddress};
pub use authorizer::{AuthorizationRefused, InMemorySenderAuthorizer, SenderAuthorizer};
pub use context::UpstreamContext;
pub use servant::Servant;
pub use supervisor::{SenderSpawner, SenderSupervisor, SenderSupervision, SpawnError, SpawnedSender};
