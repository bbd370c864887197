use ldm7_types::{BacklogSpec, FeedSpec, ProdIndex, Product, SubscriptionReply};

/// One LDM-7 control-protocol procedure (§6), in either direction over the
/// single TCP connection a session owns. `subscribe` is the only procedure
/// that carries a reply; every other variant is fire-and-forget — the
/// sender dispatches it and moves on, exactly the "expects-reply" metadata
/// the source's intentional-RPC-timeout hack was standing in for.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Subscribe { feed: FeedSpec },
    /// The wire-level reply to [`Frame::Subscribe`], sent back upstream →
    /// downstream. Not itself sendable through [`crate::RpcChannel`]'s cast
    /// methods — the socket-writer task emits it directly in response to a
    /// dispatched `Subscribe`.
    SubscribeReply { reply: SubscriptionReply },
    RequestProduct { i: ProdIndex },
    RequestBacklog { spec: BacklogSpec },
    TestConnection,
    DeliverMissedProduct { i: ProdIndex, product: Product },
    NoSuchProduct { i: ProdIndex },
    DeliverBacklogProduct { product: Product },
    EndBacklog,
}

impl Frame {
    /// Whether a caller sending this frame should block for a reply.
    /// Only `subscribe` does; see [`Frame::Subscribe`].
    pub fn expects_reply(&self) -> bool {
        matches!(self, Frame::Subscribe { .. })
    }
}

/// The reply to [`Frame::Subscribe`]; every other procedure has no reply
/// payload (dispatch success is the only signal the caller needs).
pub type SubscribeReply = SubscriptionReply;
