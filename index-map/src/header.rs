/// On-disk layout: a fixed header followed by `capacity` fixed-size slots.
/// Both are plain little-endian integers read/written by hand rather than
/// through a derive, since the layout is the durable, cross-version
/// contract (§6 "On-disk files") and must not shift if field order in a
/// derived struct ever changes.
pub(crate) const MAGIC: u32 = 0x374D444C; // "LDM7" read little-endian
pub(crate) const VERSION: u16 = 1;
pub(crate) const HEADER_LEN: usize = 24;
pub(crate) const SLOT_LEN: usize = 24;

pub(crate) struct Header {
    pub capacity: u32,
    pub count: u32,
    pub last_index: u32,
    pub has_last: bool,
}

impl Header {
    pub fn fresh(capacity: u32) -> Self {
        Self {
            capacity,
            count: 0,
            last_index: 0,
            has_last: false,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_LEN);
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&0u16.to_le_bytes());
        buf[8..12].copy_from_slice(&self.capacity.to_le_bytes());
        buf[12..16].copy_from_slice(&self.count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.last_index.to_le_bytes());
        buf[20..24].copy_from_slice(&(self.has_last as u32).to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::Truncated);
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let capacity = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let count = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let last_index = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let has_last = u32::from_le_bytes(buf[20..24].try_into().unwrap()) != 0;
        Ok(Self {
            capacity,
            count,
            last_index,
            has_last,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum DecodeError {
    #[error("file too short to contain a header")]
    Truncated,
    #[error("bad magic number")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),
}

pub(crate) fn slot_offset(slot_index: u32) -> usize {
    HEADER_LEN + slot_index as usize * SLOT_LEN
}

pub(crate) fn encode_slot(buf: &mut [u8], prod_index: u32, occupied: bool, signature: &[u8; 16]) {
    debug_assert!(buf.len() >= SLOT_LEN);
    buf[0..4].copy_from_slice(&prod_index.to_le_bytes());
    buf[4..8].copy_from_slice(&(occupied as u32).to_le_bytes());
    buf[8..24].copy_from_slice(signature);
}

pub(crate) fn decode_slot(buf: &[u8]) -> (u32, bool, [u8; 16]) {
    let prod_index = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let occupied = u32::from_le_bytes(buf[4..8].try_into().unwrap()) != 0;
    let mut signature = [0u8; 16];
    signature.copy_from_slice(&buf[8..24]);
    (prod_index, occupied, signature)
}
