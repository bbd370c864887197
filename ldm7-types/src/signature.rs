use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Content signature of a data product: the MD5 of its canonical encoding.
///
/// Total order is irrelevant; the only operations that matter are equality
/// and hashing, since the signature is the product queue's dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; 16]);

impl Signature {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidSignature> {
        if bytes.len() < Self::LEN {
            return Err(InvalidSignature { len: bytes.len() });
        }
        let mut buf = [0u8; Self::LEN];
        buf.copy_from_slice(&bytes[..Self::LEN]);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("signature requires at least {} bytes, got {len}", Signature::LEN)]
pub struct InvalidSignature {
    len: usize,
}

impl From<[u8; 16]> for Signature {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Signature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_bytes(&bytes).map_err(anyhow::Error::from)
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
