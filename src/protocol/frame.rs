// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Byte-stuffed record envelope: `0x42 | <escaped body> | 0x43`.
//!
//! Inside the body, each of `{0x42, 0x43, 0x44}` is escaped as `0x44` followed
//! by `{0x62, 0x63, 0x64}` respectively. The decoder is incremental: it is fed
//! arbitrary byte chunks as they arrive off the socket and extracts complete
//! frames as soon as their end byte is seen, tolerating partial frames split
//! across reads.

use crate::error::TransportError;

const START: u8 = 0x42;
const END: u8 = 0x43;
const ESCAPE: u8 = 0x44;

/// Encode a payload into a framed, byte-stuffed record.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(START);
    for &b in payload {
        match b {
            START => {
                out.push(ESCAPE);
                out.push(0x62);
            }
            END => {
                out.push(ESCAPE);
                out.push(0x63);
            }
            ESCAPE => {
                out.push(ESCAPE);
                out.push(0x64);
            }
            other => out.push(other),
        }
    }
    out.push(END);
    out
}

/// Incremental frame decoder holding a per-connection accumulation buffer.
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameDecoder {
    pub fn new(max_len: usize) -> Self {
        Self { buf: Vec::new(), max_len }
    }

    /// Append newly-read bytes. Errors if the buffer would exceed `max_len`
    /// before a complete frame is available.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.buf.len() + data.len() > self.max_len {
            return Err(TransportError::FrameOverflow);
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Pull one complete frame out of the buffer, if present.
    ///
    /// Returns `Ok(None)` when the buffer holds only a partial frame.
    /// Bytes preceding a frame's start byte that aren't whitespace between
    /// frames (i.e. any byte present before `START` is seen) are a protocol
    /// error, since the wire format has no concept of inter-frame filler.
    pub fn try_extract(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf[0] != START {
            return Err(TransportError::FrameMalformed);
        }

        // Scan for an unescaped END byte, tracking escape state.
        let mut i = 1;
        let mut escaped = false;
        let mut end_at = None;
        while i < self.buf.len() {
            let b = self.buf[i];
            if escaped {
                escaped = false;
            } else if b == ESCAPE {
                escaped = true;
            } else if b == END {
                end_at = Some(i);
                break;
            }
            i += 1;
        }

        let Some(end_at) = end_at else {
            return Ok(None);
        };

        let body = &self.buf[1..end_at];
        let payload = unescape(body)?;
        self.buf.drain(..=end_at);
        Ok(Some(payload))
    }
}

fn unescape(body: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let b = body[i];
        if b == ESCAPE {
            let next = *body.get(i + 1).ok_or(TransportError::FrameMalformed)?;
            let unescaped = match next {
                0x62 => START,
                0x63 => END,
                0x64 => ESCAPE,
                _ => return Err(TransportError::FrameMalformed),
            };
            out.push(unescaped);
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_plain_payload() {
        let payload = b"hello world";
        let framed = encode(payload);
        let mut dec = FrameDecoder::new(1024);
        dec.feed(&framed).unwrap();
        assert_eq!(dec.try_extract().unwrap().unwrap(), payload);
    }

    #[test]
    fn round_trips_payload_containing_delimiters() {
        let payload = [0x41, START, 0x00, END, ESCAPE, 0xff];
        let framed = encode(&payload);
        let mut dec = FrameDecoder::new(1024);
        dec.feed(&framed).unwrap();
        assert_eq!(dec.try_extract().unwrap().unwrap(), payload);
    }

    #[test]
    fn tolerates_partial_frames_split_across_reads() {
        let payload = b"split across multiple reads";
        let framed = encode(payload);
        let mut dec = FrameDecoder::new(1024);
        for chunk in framed.chunks(3) {
            dec.feed(chunk).unwrap();
        }
        assert_eq!(dec.try_extract().unwrap().unwrap(), payload);
    }

    #[test]
    fn decodes_concatenated_frames_one_at_a_time() {
        let mut framed = encode(b"first");
        framed.extend(encode(b"second"));
        let mut dec = FrameDecoder::new(1024);
        dec.feed(&framed).unwrap();
        assert_eq!(dec.try_extract().unwrap().unwrap(), b"first");
        assert_eq!(dec.try_extract().unwrap().unwrap(), b"second");
        assert_eq!(dec.try_extract().unwrap(), None);
    }

    #[test]
    fn leading_garbage_is_a_protocol_error() {
        let mut dec = FrameDecoder::new(1024);
        dec.feed(&[0x00, 0x01]).unwrap();
        assert_eq!(dec.try_extract(), Err(TransportError::FrameMalformed));
    }

    #[test]
    fn overflow_past_max_len_is_fatal() {
        let mut dec = FrameDecoder::new(4);
        assert_eq!(dec.feed(&[0u8; 8]), Err(TransportError::FrameOverflow));
    }

    proptest::proptest! {
        /// Framing is a bijection over arbitrary
        /// byte strings, regardless of how the encoded frame is split across
        /// reads.
        #[test]
        fn decode_encode_round_trips_for_any_payload(payload: Vec<u8>, chunk_size in 1usize..=7) {
            let framed = encode(&payload);
            let mut dec = FrameDecoder::new(framed.len().max(1));
            for chunk in framed.chunks(chunk_size) {
                dec.feed(chunk).unwrap();
            }
            let extracted = dec.try_extract().unwrap();
            prop_assert_eq!(extracted, Some(payload));
        }

        #[test]
        fn concatenated_frames_decode_in_order(first: Vec<u8>, second: Vec<u8>) {
            let mut framed = encode(&first);
            framed.extend(encode(&second));
            let mut dec = FrameDecoder::new(framed.len().max(1));
            dec.feed(&framed).unwrap();
            prop_assert_eq!(dec.try_extract().unwrap(), Some(first));
            prop_assert_eq!(dec.try_extract().unwrap(), Some(second));
        }
    }
}
