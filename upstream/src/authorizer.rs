use parking_lot::Mutex;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
#[error("multicast sender refused to authorize {addr}")]
pub struct AuthorizationRefused {
    pub addr: IpAddr,
}

/// The out-of-band control surface to the multicast sender (§4.7.1 step
/// 4): "a small TCP authorizer service co-located with the sender." The
/// sender's own wire format for this is external; this trait is the only
/// contract the servant needs.
pub trait SenderAuthorizer: Send + Sync {
    fn authorize(&self, sender_pid: u32, addr: IpAddr) -> Result<(), AuthorizationRefused>;
}

/// Records every authorization call and always succeeds; a stand-in for
/// the real authorizer service in tests.
#[derive(Default)]
pub struct InMemorySenderAuthorizer {
    authorized: Mutex<Vec<(u32, IpAddr)>>,
}

impl InMemorySenderAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authorized(&self) -> Vec<(u32, IpAddr)> {
        self.authorized.lock().clone()
    }
}

impl SenderAuthorizer for InMemorySenderAuthorizer {
    fn authorize(&self, sender_pid: u32, addr: IpAddr) -> Result<(), AuthorizationRefused> {
        self.authorized.lock().push((sender_pid, addr));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn records_every_authorization() {
        let authorizer = InMemorySenderAuthorizer::new();
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        authorizer.authorize(42, addr).unwrap();
        assert_eq!(authorizer.authorized(), vec![(42, addr)]);
    }
}
