use ldm7_types::{FeedSpec, ProdInfo, Product, Signature};
use std::time::{Duration, SystemTime};

/// Errors the product queue can report back through a reservation.
///
/// `Duplicate` and `TooBig` are absorbed by the notifier (§4.4, §7); every
/// other variant is fatal to the owning session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("duplicate product")]
    Duplicate,
    #[error("declared size exceeds reservation")]
    TooBig,
    #[error("product queue is closed")]
    Closed,
    #[error("product queue error: {0}")]
    Other(String),
}

/// Opaque token identifying a pending reservation; only meaningful to the
/// [`ProductQueue`] that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationToken(pub(crate) u64);

/// The contract the FMTP notifier (C4) writes product bytes through.
///
/// This is the one piece of the real append-only, signature-indexed,
/// cursor-based storage engine that is in scope here: the reservation
/// protocol callers must honor. The storage engine itself — durability,
/// on-disk layout, cursor iteration performance — is an external
/// collaborator; see [`crate::memory::InMemoryProductQueue`] for a
/// reference implementation used in tests.
pub trait ProductQueue: Clone + Send + Sync + 'static {
    /// Reserve `size` bytes for a product that will carry `signature`.
    /// `Err(QueueError::Duplicate)` means a product with this signature is
    /// already present; the caller must treat that as "ignore this
    /// product", not as a fatal error.
    fn reserve(&self, signature: Signature, size: u32) -> Result<Reservation<Self>, QueueError>;

    fn get_by_signature(&self, signature: Signature) -> Option<Product>;

    fn contains(&self, signature: Signature) -> bool;

    /// Products matching `feed`, in insertion order, strictly between
    /// `after` (or `now - since_offset` if `after` is `None` or not found)
    /// and `before`, exclusive on both ends.
    fn backlog(
        &self,
        feed: FeedSpec,
        after: Option<Signature>,
        before: Signature,
        now: SystemTime,
        since_offset: Duration,
    ) -> Vec<Product>;

    #[doc(hidden)]
    fn commit(&self, token: ReservationToken, info: ProdInfo, data: Vec<u8>) -> Result<(), QueueError>;
    #[doc(hidden)]
    fn discard(&self, token: ReservationToken);
}

/// A reserved, uncommitted region of the product queue. The FMTP library
/// writes product bytes directly into [`buffer_mut`](Self::buffer_mut);
/// the notifier must then either [`commit`](Self::commit) or
/// [`discard`](Self::discard) it. Dropping without committing discards it,
/// so a reservation can never be silently leaked.
pub struct Reservation<Q: ProductQueue> {
    queue: Q,
    token: ReservationToken,
    signature: Signature,
    buffer: Vec<u8>,
    resolved: bool,
}

impl<Q: ProductQueue> Reservation<Q> {
    pub fn new(queue: Q, token: ReservationToken, signature: Signature, size: u32) -> Self {
        Self {
            queue,
            token,
            signature,
            buffer: vec![0u8; size as usize],
            resolved: false,
        }
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Commit this reservation as the final product. `info.sz` must not
    /// exceed the number of bytes actually written (I10): the notifier
    /// checks this before calling commit.
    pub fn commit(mut self, info: ProdInfo) -> Result<(), QueueError> {
        self.resolved = true;
        let data = std::mem::take(&mut self.buffer);
        self.queue.commit(self.token, info, data)
    }

    pub fn discard(mut self) {
        self.resolved = true;
        self.queue.discard(self.token);
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Commits only the first `actual_len` bytes of the reservation; used
    /// when FMTP's final write is shorter than the size declared at BOP.
    pub fn commit_truncated(mut self, info: ProdInfo, actual_len: usize) -> Result<(), QueueError> {
        self.resolved = true;
        let mut data = std::mem::take(&mut self.buffer);
        data.truncate(actual_len);
        self.queue.commit(self.token, info, data)
    }
}

impl<Q: ProductQueue> Drop for Reservation<Q> {
    fn drop(&mut self) {
        if !self.resolved {
            self.queue.discard(self.token);
        }
    }
}
