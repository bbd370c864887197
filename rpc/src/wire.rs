use crate::message::Frame;
use ldm7_types::{BacklogSpec, FeedSpec, Ldm7Status, McastInfo, ProdIndex, ProdInfo, Product, Signature, SubscriptionReply};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Length-prefixed binary encoding of [`Frame`] for the TCP control
/// connection (§6: "implementers may substitute an equivalent length-prefixed
/// binary encoding but must preserve field order and widths"). Not XDR —
/// XDR belongs to the reference transport library, out of scope here.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame truncated: needed at least {needed} bytes, had {had}")]
    Truncated { needed: usize, had: usize },
    #[error("unknown frame tag {0}")]
    UnknownTag(u8),
    #[error("frame contained invalid utf-8")]
    InvalidUtf8,
}

const TAG_SUBSCRIBE: u8 = 0;
const TAG_REQUEST_PRODUCT: u8 = 1;
const TAG_REQUEST_BACKLOG: u8 = 2;
const TAG_TEST_CONNECTION: u8 = 3;
const TAG_DELIVER_MISSED_PRODUCT: u8 = 4;
const TAG_NO_SUCH_PRODUCT: u8 = 5;
const TAG_DELIVER_BACKLOG_PRODUCT: u8 = 6;
const TAG_END_BACKLOG: u8 = 7;
const TAG_SUBSCRIBE_REPLY: u8 = 8;

pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::new();
    match frame {
        Frame::Subscribe { feed } => {
            buf.push(TAG_SUBSCRIBE);
            buf.extend_from_slice(&feed.bits().to_le_bytes());
        }
        Frame::RequestProduct { i } => {
            buf.push(TAG_REQUEST_PRODUCT);
            buf.extend_from_slice(&i.0.to_le_bytes());
        }
        Frame::RequestBacklog { spec } => {
            buf.push(TAG_REQUEST_BACKLOG);
            encode_backlog_spec(&mut buf, spec);
        }
        Frame::TestConnection => buf.push(TAG_TEST_CONNECTION),
        Frame::DeliverMissedProduct { i, product } => {
            buf.push(TAG_DELIVER_MISSED_PRODUCT);
            buf.extend_from_slice(&i.0.to_le_bytes());
            encode_product(&mut buf, product);
        }
        Frame::NoSuchProduct { i } => {
            buf.push(TAG_NO_SUCH_PRODUCT);
            buf.extend_from_slice(&i.0.to_le_bytes());
        }
        Frame::DeliverBacklogProduct { product } => {
            buf.push(TAG_DELIVER_BACKLOG_PRODUCT);
            encode_product(&mut buf, product);
        }
        Frame::EndBacklog => buf.push(TAG_END_BACKLOG),
        Frame::SubscribeReply { reply } => {
            buf.push(TAG_SUBSCRIBE_REPLY);
            encode_subscription_reply(&mut buf, reply);
        }
    }
    buf
}

pub fn decode(buf: &[u8]) -> Result<Frame, WireError> {
    let (tag, rest) = take_u8(buf)?;
    match tag {
        TAG_SUBSCRIBE => {
            let (bits, _) = take_u32(rest)?;
            Ok(Frame::Subscribe { feed: FeedSpec::from_bits(bits) })
        }
        TAG_REQUEST_PRODUCT => {
            let (v, _) = take_u32(rest)?;
            Ok(Frame::RequestProduct { i: ProdIndex(v) })
        }
        TAG_REQUEST_BACKLOG => Ok(Frame::RequestBacklog { spec: decode_backlog_spec(rest)?.0 }),
        TAG_TEST_CONNECTION => Ok(Frame::TestConnection),
        TAG_DELIVER_MISSED_PRODUCT => {
            let (v, rest) = take_u32(rest)?;
            let (product, _) = decode_product(rest)?;
            Ok(Frame::DeliverMissedProduct { i: ProdIndex(v), product })
        }
        TAG_NO_SUCH_PRODUCT => {
            let (v, _) = take_u32(rest)?;
            Ok(Frame::NoSuchProduct { i: ProdIndex(v) })
        }
        TAG_DELIVER_BACKLOG_PRODUCT => {
            let (product, _) = decode_product(rest)?;
            Ok(Frame::DeliverBacklogProduct { product })
        }
        TAG_END_BACKLOG => Ok(Frame::EndBacklog),
        TAG_SUBSCRIBE_REPLY => Ok(Frame::SubscribeReply { reply: decode_subscription_reply(rest)?.0 }),
        other => Err(WireError::UnknownTag(other)),
    }
}

fn status_to_byte(status: Ldm7Status) -> u8 {
    match status {
        Ldm7Status::Ok => 0,
        Ldm7Status::Inval => 1,
        Ldm7Status::Mcast => 2,
        Ldm7Status::Rpc => 3,
        Ldm7Status::System => 4,
        Ldm7Status::Timedout => 5,
        Ldm7Status::Refused => 6,
        Ldm7Status::Unauth => 7,
        Ldm7Status::Noent => 8,
        Ldm7Status::Dup => 9,
        Ldm7Status::Shutdown => 10,
        Ldm7Status::Exists => 11,
        Ldm7Status::Ipv6 => 12,
        Ldm7Status::Logic => 13,
    }
}

fn byte_to_status(b: u8) -> Result<Ldm7Status, WireError> {
    Ok(match b {
        0 => Ldm7Status::Ok,
        1 => Ldm7Status::Inval,
        2 => Ldm7Status::Mcast,
        3 => Ldm7Status::Rpc,
        4 => Ldm7Status::System,
        5 => Ldm7Status::Timedout,
        6 => Ldm7Status::Refused,
        7 => Ldm7Status::Unauth,
        8 => Ldm7Status::Noent,
        9 => Ldm7Status::Dup,
        10 => Ldm7Status::Shutdown,
        11 => Ldm7Status::Exists,
        12 => Ldm7Status::Ipv6,
        13 => Ldm7Status::Logic,
        other => return Err(WireError::UnknownTag(other)),
    })
}

fn encode_socket_addr(buf: &mut Vec<u8>, addr: SocketAddr) {
    match addr {
        SocketAddr::V4(v4) => {
            buf.push(4);
            buf.extend_from_slice(&v4.ip().octets());
            buf.extend_from_slice(&v4.port().to_le_bytes());
        }
        SocketAddr::V6(v6) => {
            buf.push(6);
            buf.extend_from_slice(&v6.ip().octets());
            buf.extend_from_slice(&v6.port().to_le_bytes());
        }
    }
}

fn decode_socket_addr(buf: &[u8]) -> Result<(SocketAddr, &[u8]), WireError> {
    let (kind, rest) = take_u8(buf)?;
    match kind {
        4 => {
            if rest.len() < 6 {
                return Err(WireError::Truncated { needed: 6, had: rest.len() });
            }
            let (octets, rest) = rest.split_at(4);
            let (port, rest) = take_u16(rest)?;
            let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
            Ok((SocketAddr::new(IpAddr::V4(ip), port), rest))
        }
        6 => {
            if rest.len() < 18 {
                return Err(WireError::Truncated { needed: 18, had: rest.len() });
            }
            let (octets, rest) = rest.split_at(16);
            let (port, rest) = take_u16(rest)?;
            let mut segments = [0u8; 16];
            segments.copy_from_slice(octets);
            Ok((SocketAddr::new(IpAddr::V6(segments.into()), port), rest))
        }
        other => Err(WireError::UnknownTag(other)),
    }
}

fn encode_mcast_info(buf: &mut Vec<u8>, info: &McastInfo) {
    buf.extend_from_slice(&info.feed.bits().to_le_bytes());
    encode_socket_addr(buf, info.server);
    encode_socket_addr(buf, info.group);
}

fn decode_mcast_info(buf: &[u8]) -> Result<(McastInfo, &[u8]), WireError> {
    let (feed_bits, rest) = take_u32(buf)?;
    let (server, rest) = decode_socket_addr(rest)?;
    let (group, rest) = decode_socket_addr(rest)?;
    Ok((McastInfo { feed: FeedSpec::from_bits(feed_bits), server, group }, rest))
}

fn encode_subscription_reply(buf: &mut Vec<u8>, reply: &SubscriptionReply) {
    buf.push(status_to_byte(reply.status));
    match &reply.mcast_info {
        Some(info) => {
            buf.push(1);
            encode_mcast_info(buf, info);
        }
        None => buf.push(0),
    }
    match reply.client_addr {
        Some(addr) => {
            buf.push(1);
            encode_socket_addr(buf, addr);
        }
        None => buf.push(0),
    }
    encode_optional_u16(buf, reply.prefix_len.map(u16::from));
    encode_optional_u16(buf, reply.switch_port);
    encode_optional_u16(buf, reply.vlan_id);
}

fn decode_subscription_reply(buf: &[u8]) -> Result<(SubscriptionReply, &[u8]), WireError> {
    let (status_byte, rest) = take_u8(buf)?;
    let status = byte_to_status(status_byte)?;

    let (has_mcast, rest) = take_u8(rest)?;
    let (mcast_info, rest) = if has_mcast != 0 {
        let (info, rest) = decode_mcast_info(rest)?;
        (Some(info), rest)
    } else {
        (None, rest)
    };

    let (has_client_addr, rest) = take_u8(rest)?;
    let (client_addr, rest) = if has_client_addr != 0 {
        let (addr, rest) = decode_socket_addr(rest)?;
        (Some(addr), rest)
    } else {
        (None, rest)
    };

    let (prefix_len, rest) = decode_optional_u16(rest)?;
    let (switch_port, rest) = decode_optional_u16(rest)?;
    let (vlan_id, rest) = decode_optional_u16(rest)?;

    Ok((
        SubscriptionReply {
            status,
            mcast_info,
            client_addr,
            prefix_len: prefix_len.map(|v| v as u8),
            switch_port,
            vlan_id,
        },
        rest,
    ))
}

fn encode_optional_u16(buf: &mut Vec<u8>, v: Option<u16>) {
    match v {
        Some(v) => {
            buf.push(1);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        None => buf.push(0),
    }
}

fn decode_optional_u16(buf: &[u8]) -> Result<(Option<u16>, &[u8]), WireError> {
    let (has_value, rest) = take_u8(buf)?;
    if has_value != 0 {
        let (v, rest) = take_u16(rest)?;
        Ok((Some(v), rest))
    } else {
        Ok((None, rest))
    }
}

fn encode_backlog_spec(buf: &mut Vec<u8>, spec: &BacklogSpec) {
    match spec.after {
        Some(sig) => {
            buf.push(1);
            buf.extend_from_slice(sig.as_bytes());
        }
        None => buf.push(0),
    }
    buf.extend_from_slice(spec.before.as_bytes());
    buf.extend_from_slice(&spec.time_offset.as_secs().to_le_bytes());
}

fn decode_backlog_spec(buf: &[u8]) -> Result<(BacklogSpec, &[u8]), WireError> {
    let (has_after, rest) = take_u8(buf)?;
    let (after, rest) = if has_after != 0 {
        let (sig, rest) = take_signature(rest)?;
        (Some(sig), rest)
    } else {
        (None, rest)
    };
    let (before, rest) = take_signature(rest)?;
    let (secs, rest) = take_u64(rest)?;
    Ok((
        BacklogSpec { after, before, time_offset: Duration::from_secs(secs) },
        rest,
    ))
}

fn encode_product(buf: &mut Vec<u8>, product: &Product) {
    encode_prod_info(buf, &product.info);
    buf.extend_from_slice(&(product.data.len() as u32).to_le_bytes());
    buf.extend_from_slice(&product.data);
}

fn decode_product(buf: &[u8]) -> Result<(Product, &[u8]), WireError> {
    let (info, rest) = decode_prod_info(buf)?;
    let (len, rest) = take_u32(rest)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(WireError::Truncated { needed: len, had: rest.len() });
    }
    let (data, rest) = rest.split_at(len);
    Ok((Product { info, data: data.to_vec() }, rest))
}

fn encode_prod_info(buf: &mut Vec<u8>, info: &ProdInfo) {
    buf.extend_from_slice(info.signature.as_bytes());
    buf.extend_from_slice(&info.sz.to_le_bytes());
    buf.extend_from_slice(&info.feed.bits().to_le_bytes());
    buf.extend_from_slice(&info.create_time_secs.to_le_bytes());
    encode_string(buf, &info.ident);
    encode_string(buf, &info.origin);
}

fn decode_prod_info(buf: &[u8]) -> Result<(ProdInfo, &[u8]), WireError> {
    let (signature, rest) = take_signature(buf)?;
    let (sz, rest) = take_u32(rest)?;
    let (feed_bits, rest) = take_u32(rest)?;
    let (create_time_secs, rest) = take_u64(rest)?;
    let (ident, rest) = decode_string(rest)?;
    let (origin, rest) = decode_string(rest)?;
    Ok((
        ProdInfo {
            signature,
            ident,
            origin,
            create_time_secs,
            sz,
            feed: FeedSpec::from_bits(feed_bits),
        },
        rest,
    ))
}

fn encode_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn decode_string(buf: &[u8]) -> Result<(String, &[u8]), WireError> {
    let (len, rest) = take_u16(buf)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(WireError::Truncated { needed: len, had: rest.len() });
    }
    let (bytes, rest) = rest.split_at(len);
    let s = std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)?.to_owned();
    Ok((s, rest))
}

fn take_u8(buf: &[u8]) -> Result<(u8, &[u8]), WireError> {
    if buf.is_empty() {
        return Err(WireError::Truncated { needed: 1, had: 0 });
    }
    Ok((buf[0], &buf[1..]))
}

fn take_u16(buf: &[u8]) -> Result<(u16, &[u8]), WireError> {
    if buf.len() < 2 {
        return Err(WireError::Truncated { needed: 2, had: buf.len() });
    }
    let (head, rest) = buf.split_at(2);
    Ok((u16::from_le_bytes(head.try_into().unwrap()), rest))
}

fn take_u32(buf: &[u8]) -> Result<(u32, &[u8]), WireError> {
    if buf.len() < 4 {
        return Err(WireError::Truncated { needed: 4, had: buf.len() });
    }
    let (head, rest) = buf.split_at(4);
    Ok((u32::from_le_bytes(head.try_into().unwrap()), rest))
}

fn take_u64(buf: &[u8]) -> Result<(u64, &[u8]), WireError> {
    if buf.len() < 8 {
        return Err(WireError::Truncated { needed: 8, had: buf.len() });
    }
    let (head, rest) = buf.split_at(8);
    Ok((u64::from_le_bytes(head.try_into().unwrap()), rest))
}

fn take_signature(buf: &[u8]) -> Result<(Signature, &[u8]), WireError> {
    if buf.len() < Signature::LEN {
        return Err(WireError::Truncated { needed: Signature::LEN, had: buf.len() });
    }
    let (head, rest) = buf.split_at(Signature::LEN);
    Ok((Signature::from_bytes(head).expect("length checked above"), rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_product(sig: u8) -> Product {
        Product {
            info: ProdInfo {
                signature: Signature::from([sig; 16]),
                ident: "KEXP".into(),
                origin: "uplink1".into(),
                create_time_secs: 42,
                sz: 4,
                feed: FeedSpec::from_bits(1),
            },
            data: b"data".to_vec(),
        }
    }

    #[test]
    fn subscribe_round_trips() {
        let frame = Frame::Subscribe { feed: FeedSpec::from_bits(7) };
        assert_eq!(decode(&encode(&frame)).unwrap(), frame);
    }

    #[test]
    fn deliver_missed_product_round_trips() {
        let frame = Frame::DeliverMissedProduct { i: ProdIndex(9), product: sample_product(1) };
        assert_eq!(decode(&encode(&frame)).unwrap(), frame);
    }

    #[test]
    fn request_backlog_round_trips_with_and_without_after() {
        let with_after = Frame::RequestBacklog {
            spec: BacklogSpec {
                after: Some(Signature::from([2u8; 16])),
                before: Signature::from([3u8; 16]),
                time_offset: Duration::from_secs(120),
            },
        };
        assert_eq!(decode(&encode(&with_after)).unwrap(), with_after);

        let without_after = Frame::RequestBacklog {
            spec: BacklogSpec { after: None, before: Signature::from([3u8; 16]), time_offset: Duration::from_secs(60) },
        };
        assert_eq!(decode(&encode(&without_after)).unwrap(), without_after);
    }

    #[test]
    fn subscribe_reply_round_trips_with_and_without_mcast_info() {
        use std::net::{Ipv4Addr, SocketAddr};

        let ok = Frame::SubscribeReply {
            reply: SubscriptionReply {
                status: Ldm7Status::Ok,
                mcast_info: Some(McastInfo {
                    feed: FeedSpec::from_bits(1),
                    server: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 388),
                    group: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(224, 0, 0, 1)), 9000),
                }),
                client_addr: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 0)),
                prefix_len: Some(24),
                switch_port: Some(12),
                vlan_id: None,
            },
        };
        assert_eq!(decode(&encode(&ok)).unwrap(), ok);

        let denied = Frame::SubscribeReply { reply: SubscriptionReply::failure(Ldm7Status::Unauth) };
        assert_eq!(decode(&encode(&denied)).unwrap(), denied);
    }

    #[test]
    fn truncated_frame_is_an_error_not_a_panic() {
        let frame = Frame::RequestProduct { i: ProdIndex(1) };
        let encoded = encode(&frame);
        assert!(decode(&encoded[..encoded.len() - 1]).is_err());
    }
}
