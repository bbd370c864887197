use std::{fmt, ops::BitOr, str::FromStr};

/// A subscription filter: a bitmask over up to 32 distinct feed bits.
///
/// Used both as a subscription request and as the partition key under which
/// sessions, index maps and address pools are kept separate, so two
/// `FeedSpec`s are "the same feed" iff their masks are equal, not merely
/// overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FeedSpec(u32);

impl FeedSpec {
    pub const NONE: FeedSpec = FeedSpec(0);
    pub const ANY: FeedSpec = FeedSpec(u32::MAX);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn intersects(self, other: FeedSpec) -> bool {
        self.0 & other.0 != 0
    }

    /// The subset of `self` permitted by `allowed`; `FeedSpec::NONE` if
    /// nothing in `self` is covered by `allowed`.
    pub fn restrict(self, allowed: FeedSpec) -> FeedSpec {
        FeedSpec(self.0 & allowed.0)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Stable key string suitable for use in a filename, e.g.
    /// `{server-spec}_{feed-spec}.yaml`.
    pub fn as_key(self) -> String {
        format!("{:08x}", self.0)
    }
}

impl BitOr for FeedSpec {
    type Output = FeedSpec;

    fn bitor(self, rhs: FeedSpec) -> FeedSpec {
        FeedSpec(self.0 | rhs.0)
    }
}

impl fmt::Display for FeedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl FromStr for FeedSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bits = if let Some(hex) = s.strip_prefix("0x") {
            u32::from_str_radix(hex, 16)?
        } else {
            s.parse()?
        };
        Ok(Self(bits))
    }
}
