use std::fmt;

/// Sender-assigned, monotonically increasing (mod 2^32) product sequence
/// number. Unique for the lifetime of one multicast-sender process.
///
/// The index space wraps around, so ordering is circular: `a.precedes(b)` is
/// the "less than" relation you get by walking forward from `a` no more than
/// half the index space before reaching `b`. Within a single bounded session
/// a plain numeric comparison is equivalent, but recovery code that spans a
/// wraparound must use `precedes`/`distance` rather than `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct ProdIndex(pub u32);

impl ProdIndex {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Signed forward distance from `self` to `other`, mod 2^32.
    pub fn distance(self, other: Self) -> i64 {
        other.0.wrapping_sub(self.0) as i32 as i64
    }

    /// True if `other` lies strictly ahead of `self` on the circular index
    /// space (within half the space, per the wraparound convention above).
    pub fn precedes(self, other: Self) -> bool {
        self.distance(other) > 0
    }
}

impl From<u32> for ProdIndex {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<ProdIndex> for u32 {
    fn from(v: ProdIndex) -> Self {
        v.0
    }
}

impl fmt::Display for ProdIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
