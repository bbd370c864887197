use crate::{
    codec::decode_prod_info,
    session::SessionHandle,
};
use ldm7_types::{ProdIndex, Signature};
use parking_lot::Mutex;
use product_queue::{ProductQueue, QueueError, Reservation};
use std::{collections::HashMap, sync::Weak};

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("metadata shorter than a signature ({0} < 16 bytes)")]
    MetadataTooShort(usize),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("decoded product info failed to parse: {0}")]
    Codec(#[from] crate::codec::CodecError),
    #[error("decoded size {declared} exceeds received size {actual}")]
    DeclaredSizeExceedsActual { declared: u32, actual: usize },
    #[error("no pending reservation for product index {0}")]
    NoSuchReservation(ProdIndex),
    #[error("actual size {actual} exceeds the {reserved}-byte reservation")]
    ActualSizeExceedsReservation { actual: usize, reserved: usize },
}

/// What a BOP call tells the transport to do with this product.
pub enum BopOutcome {
    /// A duplicate of a signature already in the queue: FMTP should be
    /// told to ignore the product (buffer pointer `NULL` in the C API;
    /// here, simply: don't write into anything).
    Ignore,
    /// Space was reserved; the caller may now write up to `size` bytes
    /// through [`Notifier::with_buffer`] keyed by `i`.
    Reserved { size: u32 },
}

struct Pending<Q: ProductQueue> {
    reservation: Reservation<Q>,
}

/// The per-product notifier (C4): the callback surface the FMTP transport
/// invokes for Beginning-of-Product, End-of-Product, and Missed-Product
/// events. Reachable concurrently from both the multicast and unicast FMTP
/// threads (I9), so the pending-reservation map is behind a single lock.
pub struct Notifier<Q: ProductQueue, S: SessionHandle + ?Sized + 'static> {
    queue: Q,
    session: Weak<S>,
    pending: Mutex<HashMap<ProdIndex, Pending<Q>>>,
}

impl<Q: ProductQueue, S: SessionHandle + ?Sized + 'static> Notifier<Q, S> {
    pub fn new(queue: Q, session: Weak<S>) -> Self {
        Self {
            queue,
            session,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// BOP: `metadata`'s first 16 bytes are the product signature.
    pub fn bop(&self, i: ProdIndex, prod_size: u32, metadata: &[u8]) -> Result<BopOutcome, NotifierError> {
        if metadata.len() < Signature::LEN {
            return Err(NotifierError::MetadataTooShort(metadata.len()));
        }
        let signature = Signature::from_bytes(metadata).expect("length checked above");

        match self.queue.reserve(signature, prod_size) {
            Ok(reservation) => {
                self.pending.lock().insert(i, Pending { reservation });
                Ok(BopOutcome::Reserved { size: prod_size })
            }
            Err(QueueError::Duplicate) => Ok(BopOutcome::Ignore),
            Err(e) => Err(e.into()),
        }
    }

    /// Gives the caller mutable access to the buffer reserved by `bop` for
    /// `i`, e.g. so a transport (or, in tests, a simulated one) can write
    /// received bytes into it without an intermediate copy.
    pub fn with_buffer<R>(&self, i: ProdIndex, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut pending = self.pending.lock();
        pending.get_mut(&i).map(|p| f(p.reservation.buffer_mut()))
    }

    /// EOP: decodes the `ProdInfo` header from the front of the buffer
    /// FMTP wrote `actual_size` bytes into, commits the reservation, and
    /// notifies the session. The committed content comes only from that
    /// buffer (I10) — this never re-reads the wire.
    pub fn eop(&self, i: ProdIndex, actual_size: usize) -> Result<(), NotifierError> {
        let Pending { reservation } = self
            .pending
            .lock()
            .remove(&i)
            .ok_or(NotifierError::NoSuchReservation(i))?;

        if actual_size > reservation.buffer_len() {
            let reserved = reservation.buffer_len();
            reservation.discard();
            return Err(NotifierError::ActualSizeExceedsReservation { actual: actual_size, reserved });
        }

        let (info, header_len) = match decode_prod_info(&reservation.buffer()[..actual_size]) {
            Ok(v) => v,
            Err(e) => {
                reservation.discard();
                return Err(e.into());
            }
        };

        if info.sz as usize > actual_size {
            reservation.discard();
            return Err(NotifierError::DeclaredSizeExceedsActual {
                declared: info.sz,
                actual: actual_size,
            });
        }

        // Store only the raw product bytes, stripping the header we just
        // decoded from the front.
        let info_for_session = info.clone();
        commit_tail(reservation, info, header_len, actual_size)?;

        if let Some(session) = self.session.upgrade() {
            session.last_received(&info_for_session);
        }
        Ok(())
    }

    /// MISSED: discards any in-flight reservation for `i` and records the
    /// loss with the session.
    pub fn missed(&self, i: ProdIndex) {
        if let Some(Pending { reservation }) = self.pending.lock().remove(&i) {
            reservation.discard();
        }
        if let Some(session) = self.session.upgrade() {
            session.missed_product(i);
        }
    }

    /// Discards every reservation still pending (a BOP with no EOP or
    /// MISSED yet). Per §5, "any reserved but uncommitted product-queue
    /// region is discarded in the stop hook of the MLR" — the notifier
    /// outlives any one session's MLR, so without this call a halted
    /// session's in-flight signatures stay marked reserved in the queue
    /// and a re-received copy is mistaken for a duplicate in the next
    /// session.
    pub fn discard_pending(&self) {
        for (_, Pending { reservation }) in self.pending.lock().drain() {
            reservation.discard();
        }
    }
}

fn commit_tail<Q: ProductQueue>(
    mut reservation: Reservation<Q>,
    info: ldm7_types::ProdInfo,
    header_len: usize,
    actual_size: usize,
) -> Result<(), NotifierError> {
    // Shift the raw bytes down over the header in place, then commit only
    // the trailing `actual_size - header_len` bytes.
    {
        let buf = reservation.buffer_mut();
        buf.copy_within(header_len..actual_size, 0);
    }
    reservation
        .commit_truncated(info, actual_size - header_len)
        .map_err(NotifierError::from)
}
