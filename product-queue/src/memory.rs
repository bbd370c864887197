use crate::queue::{ProductQueue, QueueError, Reservation, ReservationToken};
use ldm7_types::{FeedSpec, ProdInfo, Product, Signature};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, SystemTime},
};

/// A reference [`ProductQueue`] backed by an in-process `Vec`. Stands in
/// for the real append-only, signature-indexed storage engine, which this
/// spec treats as an external collaborator (§1) — this implementation
/// exists so the notifier, servant, and session controller can be
/// exercised end to end without it.
#[derive(Clone)]
pub struct InMemoryProductQueue {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    next_token: u64,
    reserved: HashSet<Signature>,
    pending: HashMap<u64, Signature>,
    by_signature: HashMap<Signature, usize>,
    products: Vec<Product>,
}

impl Default for InMemoryProductQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProductQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_token: 0,
                reserved: HashSet::new(),
                pending: HashMap::new(),
                by_signature: HashMap::new(),
                products: Vec::new(),
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProductQueue for InMemoryProductQueue {
    fn reserve(&self, signature: Signature, size: u32) -> Result<Reservation<Self>, QueueError> {
        let mut inner = self.inner.lock();
        if inner.reserved.contains(&signature) || inner.by_signature.contains_key(&signature) {
            return Err(QueueError::Duplicate);
        }
        let token = inner.next_token;
        inner.next_token += 1;
        inner.reserved.insert(signature);
        inner.pending.insert(token, signature);
        drop(inner);
        Ok(Reservation::new(self.clone(), ReservationToken(token), signature, size))
    }

    fn commit(&self, token: ReservationToken, info: ProdInfo, data: Vec<u8>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let signature = inner
            .pending
            .remove(&token.0)
            .ok_or_else(|| QueueError::Other("commit of unknown reservation".into()))?;
        inner.reserved.remove(&signature);
        if info.sz as usize > data.len() {
            return Err(QueueError::TooBig);
        }
        if inner.by_signature.contains_key(&signature) {
            // Raced with another committed copy; treat as a no-op duplicate.
            return Err(QueueError::Duplicate);
        }
        let idx = inner.products.len();
        inner.products.push(Product { info, data });
        inner.by_signature.insert(signature, idx);
        Ok(())
    }

    fn discard(&self, token: ReservationToken) {
        let mut inner = self.inner.lock();
        if let Some(signature) = inner.pending.remove(&token.0) {
            inner.reserved.remove(&signature);
        }
    }

    fn get_by_signature(&self, signature: Signature) -> Option<Product> {
        let inner = self.inner.lock();
        inner.by_signature.get(&signature).map(|&idx| inner.products[idx].clone())
    }

    fn contains(&self, signature: Signature) -> bool {
        self.inner.lock().by_signature.contains_key(&signature)
    }

    fn backlog(
        &self,
        feed: FeedSpec,
        after: Option<Signature>,
        before: Signature,
        now: SystemTime,
        since_offset: Duration,
    ) -> Vec<Product> {
        let inner = self.inner.lock();
        let start = after
            .and_then(|sig| inner.by_signature.get(&sig).copied().map(|idx| idx + 1))
            .unwrap_or_else(|| {
                let threshold = now.checked_sub(since_offset).unwrap_or(SystemTime::UNIX_EPOCH);
                let threshold_secs = threshold
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                inner
                    .products
                    .iter()
                    .position(|p| p.info.create_time_secs >= threshold_secs)
                    .unwrap_or(inner.products.len())
            });
        inner.products[start..]
            .iter()
            .take_while(|p| p.info.signature != before)
            .filter(|p| p.info.feed.intersects(feed))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(sig: u8, feed: u32, t: u64) -> ProdInfo {
        ProdInfo {
            signature: Signature::from([sig; 16]),
            ident: format!("prod-{sig}"),
            origin: "test".into(),
            create_time_secs: t,
            sz: 4,
            feed: FeedSpec::from_bits(feed),
        }
    }

    #[test]
    fn reserve_then_commit_roundtrips() {
        let q = InMemoryProductQueue::new();
        let sig = Signature::from([1u8; 16]);
        let mut r = q.reserve(sig, 4).unwrap();
        r.buffer_mut().copy_from_slice(b"data");
        r.commit(info(1, 1, 0)).unwrap();
        assert_eq!(q.get_by_signature(sig).unwrap().data, b"data");
    }

    #[test]
    fn second_reserve_of_same_signature_is_duplicate() {
        let q = InMemoryProductQueue::new();
        let sig = Signature::from([2u8; 16]);
        let _r1 = q.reserve(sig, 4).unwrap();
        assert!(matches!(q.reserve(sig, 4), Err(QueueError::Duplicate)));
    }

    #[test]
    fn commit_after_duplicate_already_present_is_rejected() {
        let q = InMemoryProductQueue::new();
        let sig = Signature::from([3u8; 16]);
        let mut r1 = q.reserve(sig, 4).unwrap();
        r1.buffer_mut().copy_from_slice(b"one!");
        r1.commit(info(3, 1, 0)).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn dropping_a_reservation_discards_it() {
        let q = InMemoryProductQueue::new();
        let sig = Signature::from([4u8; 16]);
        {
            let _r = q.reserve(sig, 4).unwrap();
        }
        // reservation dropped without commit: signature must be free again
        assert!(q.reserve(sig, 4).is_ok());
    }

    #[test]
    fn backlog_walks_between_after_and_before_exclusive() {
        let q = InMemoryProductQueue::new();
        for i in 1..=5u8 {
            let sig = Signature::from([i; 16]);
            let mut r = q.reserve(sig, 1).unwrap();
            r.buffer_mut()[0] = i;
            r.commit(info(i, 1, i as u64)).unwrap();
        }
        let after = Signature::from([2u8; 16]);
        let before = Signature::from([5u8; 16]);
        let got = q.backlog(FeedSpec::from_bits(1), Some(after), before, SystemTime::now(), Duration::ZERO);
        let sigs: Vec<_> = got.iter().map(|p| p.info.signature).collect();
        assert_eq!(sigs, vec![Signature::from([3u8; 16]), Signature::from([4u8; 16])]);
    }
}
