use crate::{FeedSpec, Ldm7Status, Signature};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// LDM product metadata, as decoded from the XDR header that precedes a
/// product's payload bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProdInfo {
    pub signature: Signature,
    pub ident: String,
    pub origin: String,
    pub create_time_secs: u64,
    pub sz: u32,
    pub feed: FeedSpec,
}

/// An atomic, immutable unit of data: metadata plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub info: ProdInfo,
    pub data: Vec<u8>,
}

/// `{feed, server, group}`: the TCP control endpoint and UDP multicast
/// endpoint a downstream must use for one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct McastInfo {
    pub feed: FeedSpec,
    pub server: SocketAddr,
    pub group: SocketAddr,
}

/// Reply to `subscribe`, carrying everything the downstream needs to join
/// the multicast group and bind a matching local address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionReply {
    pub status: Ldm7Status,
    pub mcast_info: Option<McastInfo>,
    pub client_addr: Option<SocketAddr>,
    pub prefix_len: Option<u8>,
    pub switch_port: Option<u16>,
    pub vlan_id: Option<u16>,
}

impl SubscriptionReply {
    pub fn failure(status: Ldm7Status) -> Self {
        Self {
            status,
            mcast_info: None,
            client_addr: None,
            prefix_len: None,
            switch_port: None,
            vlan_id: None,
        }
    }
}
