//! Serial frame codec.
//!
//! ```text
//! 0x55 0xAA <len:1> <cmd:1> <payload: len bytes> <checksum:1>
//! ```
//!
//! The checksum is the 8-bit wrapping sum of every byte before it, markers
//! included. Decoding never consumes a partial frame, so callers can feed it
//! whatever the transport has buffered so far and call it again later.

use thiserror::Error;

use super::constants::{
    DELIMITER, FRAME_OVERHEAD, HEADER_LEN, MAX_PAYLOAD_LEN, MIN_DECODE_LEN, PREAMBLE,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too long: {len} bytes (max {max})", max = MAX_PAYLOAD_LEN)]
    PayloadTooLong { len: usize },

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum {
        /// Bytes to skip to get past the damaged frame.
        consumed: usize,
        expected: u8,
        actual: u8,
    },
}

/// One decoded frame, borrowing its payload from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub command: u8,
    pub payload: &'a [u8],
}

/// Outcome of a decode attempt that did not hit a damaged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded<'a> {
    /// Bytes the caller must drop from the front of its buffer.
    pub consumed: usize,
    /// `None` means either more data is needed (`consumed == 0`) or the
    /// scanner skipped garbage (`consumed > 0`).
    pub frame: Option<Frame<'a>>,
}

impl Decoded<'_> {
    pub fn need_more(&self) -> bool {
        self.consumed == 0 && self.frame.is_none()
    }
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Full frame length for a payload of `payload_len` bytes.
pub const fn frame_len(payload_len: usize) -> usize {
    FRAME_OVERHEAD + payload_len
}

/// Encode one frame.
pub fn encode(command: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut frame = Vec::with_capacity(frame_len(payload.len()));
    encode_into(&mut frame, command, payload)?;
    Ok(frame)
}

/// Append one encoded frame to `out`.
pub fn encode_into(out: &mut Vec<u8>, command: u8, payload: &[u8]) -> Result<(), FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLong { len: payload.len() });
    }
    let start = out.len();
    out.push(PREAMBLE);
    out.push(DELIMITER);
    out.push(payload.len() as u8);
    out.push(command);
    out.extend_from_slice(payload);
    let sum = checksum(&out[start..]);
    out.push(sum);
    Ok(())
}

/// Try to decode one frame from the front of `buf`.
pub fn decode(buf: &[u8]) -> Result<Decoded<'_>, FrameError> {
    if buf.len() < MIN_DECODE_LEN {
        return Ok(Decoded {
            consumed: 0,
            frame: None,
        });
    }

    if buf[0] != PREAMBLE || buf[1] != DELIMITER {
        // Keep a preamble sitting in the second slot as the next candidate.
        let consumed = if buf[1] == PREAMBLE { 1 } else { 2 };
        return Ok(Decoded {
            consumed,
            frame: None,
        });
    }

    let payload_len = buf[2] as usize;
    let total = frame_len(payload_len);
    if buf.len() < total {
        return Ok(Decoded {
            consumed: 0,
            frame: None,
        });
    }

    let expected = checksum(&buf[..total - 1]);
    let actual = buf[total - 1];
    if expected != actual {
        return Err(FrameError::Checksum {
            consumed: total,
            expected,
            actual,
        });
    }

    Ok(Decoded {
        consumed: total,
        frame: Some(Frame {
            command: buf[HEADER_LEN],
            payload: &buf[HEADER_LEN + 1..total - 1],
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = encode(0x54, &[0x01]).unwrap();
        // 0x55 + 0xAA + 0x01 + 0x54 + 0x01 wraps to 0x55.
        assert_eq!(frame, vec![0x55, 0xAA, 0x01, 0x54, 0x01, 0x55]);
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode(0x50, &[]).unwrap();
        assert_eq!(frame.len(), 5);
        assert_eq!(frame[2], 0);
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.consumed, 5);
        assert_eq!(decoded.frame.unwrap().payload, &[] as &[u8]);
    }

    #[test]
    fn test_encode_rejects_long_payload() {
        let payload = vec![0u8; 256];
        assert_eq!(
            encode(0x50, &payload),
            Err(FrameError::PayloadTooLong { len: 256 })
        );
        assert!(encode(0x50, &payload[..255]).is_ok());
    }

    #[test]
    fn test_decode_short_buffer() {
        let decoded = decode(&[0x55, 0xAA, 0x01]).unwrap();
        assert!(decoded.need_more());
    }

    #[test]
    fn test_decode_bad_markers_skips_two() {
        let decoded = decode(&[0x00, 0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(decoded.consumed, 2);
        assert!(decoded.frame.is_none());
    }

    #[test]
    fn test_decode_resync_after_one_garbage_byte() {
        let mut buf = vec![0x13];
        buf.extend(encode(0xD4, &[0x01]).unwrap());

        let first = decode(&buf).unwrap();
        assert_eq!(first.consumed, 1);
        assert!(first.frame.is_none());

        let second = decode(&buf[first.consumed..]).unwrap();
        let frame = second.frame.unwrap();
        assert_eq!(frame.command, 0xD4);
        assert_eq!(frame.payload, &[0x01]);
    }

    #[test]
    fn test_decode_waits_for_full_frame_at_every_split() {
        let frame = encode(0xD0, &[1, 2, 3, 4, 5, 6]).unwrap();
        for cut in 0..frame.len() {
            let mut buf = frame[..cut].to_vec();
            let first = decode(&buf).unwrap();
            assert!(first.need_more(), "cut at {cut}");

            buf.extend_from_slice(&frame[cut..]);
            let second = decode(&buf).unwrap();
            assert_eq!(second.consumed, frame.len(), "cut at {cut}");
            let got = second.frame.unwrap();
            assert_eq!(got.command, 0xD0);
            assert_eq!(got.payload, &[1, 2, 3, 4, 5, 6]);
        }
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut frame = encode(0xD7, &[0x03]).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x5A;
        frame.extend(encode(0xD8, &[0x04]).unwrap());

        match decode(&frame) {
            Err(FrameError::Checksum { consumed, .. }) => {
                assert_eq!(consumed, 6);
                let next = decode(&frame[consumed..]).unwrap();
                assert_eq!(next.frame.unwrap().command, 0xD8);
            }
            other => panic!("expected checksum error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let mut buf = encode(0xD5, &[0x00]).unwrap();
        buf.extend(encode(0xD6, &[0x01]).unwrap());

        let first = decode(&buf).unwrap();
        assert_eq!(first.frame.unwrap().command, 0xD5);
        let second = decode(&buf[first.consumed..]).unwrap();
        assert_eq!(second.frame.unwrap().command, 0xD6);
        assert_eq!(first.consumed + second.consumed, buf.len());
    }
}
