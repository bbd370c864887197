use ldm7_types::{ProdIndex, ProdInfo};

/// What the notifier needs from the owning session controller.
///
/// Modeled as a borrowed handle rather than an owning reference: the
/// reference implementation (the mixed-reference design note in §9 about a
/// cyclic MLR/session pointer) keeps a back-pointer from the receiver to
/// the session so BOP/EOP can update its state. Here the notifier holds a
/// [`std::sync::Weak`] to this trait instead of an `Arc`, so the session
/// controller — which owns the notifier's lifetime via the MLR — can never
/// be kept alive by the notifier it spawned.
pub trait SessionHandle: Send + Sync {
    /// Called from EOP on the multicast path only (never from a unicast
    /// recovery): updates `last_mcast_sig` and, the first time it fires in
    /// a session, kicks off the backlog bootstrap (§4.6.3).
    fn last_received(&self, info: &ProdInfo);

    /// Called from MISSED: appends `i` to the session's `missed_q`.
    fn missed_product(&self, i: ProdIndex);
}
