use crate::{message::Frame, wire};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_FRAME_LEN: u32 = 64 << 20;

#[derive(Debug, thiserror::Error)]
pub enum FrameIoError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    TooLarge(u32),
    #[error(transparent)]
    Wire(#[from] wire::WireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads one length-prefixed [`Frame`] off `r`. `Ok(None)` means the peer
/// closed the connection cleanly at a frame boundary (§5: "on a zero-byte
/// read it exits normally").
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Frame>, FrameIoError> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(FrameIoError::TooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).await?;
    Ok(Some(wire::decode(&body)?))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> Result<(), FrameIoError> {
    let body = wire::encode(frame);
    w.write_all(&(body.len() as u32).to_le_bytes()).await?;
    w.write_all(&body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldm7_types::{FeedSpec, ProdIndex};
    use std::io::Cursor;

    #[tokio::test]
    async fn writes_then_reads_back_the_same_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::RequestProduct { i: ProdIndex(7) }).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let got = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(got, Frame::RequestProduct { i: ProdIndex(7) });
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn two_frames_back_to_back_read_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Subscribe { feed: FeedSpec::from_bits(3) }).await.unwrap();
        write_frame(&mut buf, &Frame::TestConnection).await.unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap().unwrap(), Frame::Subscribe { feed: FeedSpec::from_bits(3) });
        assert_eq!(read_frame(&mut cursor).await.unwrap().unwrap(), Frame::TestConnection);
    }
}
