use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: marker (2) + length (2) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Start-of-frame marker.
pub const MARKER: [u8; 2] = [0x94, 0xC3];

/// Largest payload the radio firmware accepts in one frame.
pub const MAX_PAYLOAD: usize = 512;

/// Filler byte used to wake a sleeping radio's serial console.
pub const WAKEUP_BYTE: u8 = 0xC3;

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬──────────┬────────────────┐
/// │ 0x94     │ 0xC3     │ Length   │ Payload        │
/// │          │          │ (2B BE)  │ (Length bytes) │
/// └──────────┴──────────┴──────────┴────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MARKER);
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a payload into a freshly allocated frame.
pub fn frame_bytes(payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(payload, &mut buf)?;
    Ok(buf.freeze())
}

/// A run of `len` wakeup bytes.
///
/// The burst is never a valid frame: it contains no `0x94`, so the device
/// discards it once its console is awake.
pub fn wakeup_burst(len: usize) -> Bytes {
    Bytes::from(vec![WAKEUP_BYTE; len])
}

/// Declared payload length of the header at the front of `buf`, if any.
pub(crate) fn declared_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_SIZE || buf[..2] != MARKER {
        return None;
    }
    Some(u16::from_be_bytes([buf[2], buf[3]]) as usize)
}

/// Offset of the first marker in `buf`.
pub(crate) fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(MARKER.len()).position(|pair| pair == MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_small_payload() {
        let mut buf = BytesMut::new();
        encode_frame(&[0xAA, 0xBB, 0xCC, 0xDD], &mut buf).unwrap();
        assert_eq!(
            buf.as_ref(),
            &[0x94, 0xC3, 0x00, 0x04, 0xAA, 0xBB, 0xCC, 0xDD]
        );
    }

    #[test]
    fn length_is_big_endian() {
        let payload = vec![0u8; 300];
        let frame = frame_bytes(&payload).unwrap();
        assert_eq!(&frame[..4], &[0x94, 0xC3, 0x01, 0x2C]);
        assert_eq!(frame.len(), HEADER_SIZE + 300);
    }

    #[test]
    fn max_payload_is_accepted() {
        let payload = vec![0x11; MAX_PAYLOAD];
        assert!(frame_bytes(&payload).is_ok());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0x11; MAX_PAYLOAD + 1];
        let mut buf = BytesMut::new();
        let err = encode_frame(&payload, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge { size: 513, max: 512 }
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn wakeup_burst_contains_no_marker() {
        let burst = wakeup_burst(64);
        assert_eq!(burst.len(), 64);
        assert!(burst.iter().all(|b| *b == WAKEUP_BYTE));
        assert_eq!(find_marker(&burst), None);
    }

    #[test]
    fn find_marker_skips_lone_start_byte() {
        assert_eq!(find_marker(&[0x94, 0x00, 0x94, 0xC3]), Some(2));
        assert_eq!(find_marker(&[0x41, 0x94]), None);
    }

    #[test]
    fn declared_len_requires_full_header() {
        assert_eq!(declared_len(&[0x94, 0xC3, 0x02]), None);
        assert_eq!(declared_len(&[0x94, 0xC3, 0x02, 0x10]), Some(528));
        assert_eq!(declared_len(&[0x00, 0xC3, 0x00, 0x01]), None);
    }
}
