use ldm7_types::FeedSpec;
use parking_lot::Mutex;
use std::{collections::HashSet, net::IpAddr};

/// What a successful [`AddressPool::reserve`] hands back: everything a
/// `SubscriptionReply` needs to describe the client's granted address
/// (§3 Subscription reply; §4.7.1 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedAddress {
    pub addr: IpAddr,
    pub prefix_len: u8,
    pub switch_port: Option<u16>,
    pub vlan_id: Option<u16>,
}

#[derive(Debug, thiserror::Error)]
#[error("no address available in the pool for feed {0}")]
pub struct PoolExhausted(pub FeedSpec);

/// The "single interface" this spec exposes for client-address management
/// (§1 Non-goals: CIDR allocation and switch-port authorization beyond
/// this are out of scope). A deployment's real pool lives behind whatever
/// CIDR/VLAN bookkeeping it needs; this crate only needs reserve/release.
pub trait AddressPool: Send + Sync {
    fn reserve(&self, feed: FeedSpec) -> Result<ReservedAddress, PoolExhausted>;
    fn release(&self, addr: IpAddr);
}

/// Reference pool over a fixed, in-memory address list. Used by tests and
/// by deployments small enough not to need a real CIDR allocator.
pub struct InMemoryAddressPool {
    prefix_len: u8,
    free: Mutex<Vec<IpAddr>>,
    in_use: Mutex<HashSet<IpAddr>>,
}

impl InMemoryAddressPool {
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>, prefix_len: u8) -> Self {
        Self {
            prefix_len,
            free: Mutex::new(addrs.into_iter().collect()),
            in_use: Mutex::new(HashSet::new()),
        }
    }
}

impl AddressPool for InMemoryAddressPool {
    fn reserve(&self, feed: FeedSpec) -> Result<ReservedAddress, PoolExhausted> {
        let mut free = self.free.lock();
        let addr = free.pop().ok_or(PoolExhausted(feed))?;
        self.in_use.lock().insert(addr);
        Ok(ReservedAddress {
            addr,
            prefix_len: self.prefix_len,
            switch_port: None,
            vlan_id: None,
        })
    }

    fn release(&self, addr: IpAddr) {
        if self.in_use.lock().remove(&addr) {
            self.free.lock().push(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn reserve_then_release_makes_the_address_available_again() {
        let pool = InMemoryAddressPool::new([addr(1)], 24);
        let feed = FeedSpec::from_bits(1);

        let reserved = pool.reserve(feed).unwrap();
        assert_eq!(reserved.addr, addr(1));
        assert!(matches!(pool.reserve(feed), Err(PoolExhausted(_))));

        pool.release(reserved.addr);
        assert_eq!(pool.reserve(feed).unwrap().addr, addr(1));
    }

    #[test]
    fn releasing_an_address_never_reserved_is_a_no_op() {
        let pool = InMemoryAddressPool::new([addr(1)], 24);
        pool.release(addr(9));
        assert_eq!(pool.reserve(FeedSpec::from_bits(1)).unwrap().addr, addr(1));
    }
}
