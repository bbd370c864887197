use ldm7_types::{FeedSpec, ProdInfo, Signature};

/// Decodes the `ProdInfo` header FMTP's payload carries ahead of the raw
/// product bytes (§6: "the payload is an XDR-encoded `ProdInfo` followed by
/// raw product bytes"). The real wire format is XDR, owned by the
/// transport library out of scope here; this is the fixed binary stand-in
/// used by the in-process FMTP simulation this crate ships for tests.
///
/// Returns the decoded info and the number of header bytes consumed; the
/// caller treats everything after that as the product's raw bytes.
pub fn decode_prod_info(buf: &[u8]) -> Result<(ProdInfo, usize), CodecError> {
    const FIXED_LEN: usize = 4 + 4 + 8 + 16 + 2;
    if buf.len() < FIXED_LEN {
        return Err(CodecError::Truncated);
    }
    let sz = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let feed = FeedSpec::from_bits(u32::from_le_bytes(buf[4..8].try_into().unwrap()));
    let create_time_secs = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    let mut signature = [0u8; 16];
    signature.copy_from_slice(&buf[16..32]);
    let ident_len = u16::from_le_bytes(buf[32..34].try_into().unwrap()) as usize;

    let mut offset = FIXED_LEN;
    if buf.len() < offset + ident_len + 2 {
        return Err(CodecError::Truncated);
    }
    let ident = String::from_utf8_lossy(&buf[offset..offset + ident_len]).into_owned();
    offset += ident_len;

    let origin_len = u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap()) as usize;
    offset += 2;
    if buf.len() < offset + origin_len {
        return Err(CodecError::Truncated);
    }
    let origin = String::from_utf8_lossy(&buf[offset..offset + origin_len]).into_owned();
    offset += origin_len;

    Ok((
        ProdInfo {
            signature: Signature::from(signature),
            ident,
            origin,
            create_time_secs,
            sz,
            feed,
        },
        offset,
    ))
}

pub fn encode_prod_info(info: &ProdInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(34 + info.ident.len() + 2 + info.origin.len());
    buf.extend_from_slice(&info.sz.to_le_bytes());
    buf.extend_from_slice(&info.feed.bits().to_le_bytes());
    buf.extend_from_slice(&info.create_time_secs.to_le_bytes());
    buf.extend_from_slice(info.signature.as_bytes());
    buf.extend_from_slice(&(info.ident.len() as u16).to_le_bytes());
    buf.extend_from_slice(info.ident.as_bytes());
    buf.extend_from_slice(&(info.origin.len() as u16).to_le_bytes());
    buf.extend_from_slice(info.origin.as_bytes());
    buf
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("buffer too short to hold a ProdInfo header")]
    Truncated,
}
