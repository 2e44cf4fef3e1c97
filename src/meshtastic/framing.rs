//! Stream API framing for Meshtastic TCP and serial links.
//!
//! Both transports carry protobufs wrapped as:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <payload>`
//!
//! Between frames the radio may emit plain-text debug output, so the decoder
//! realigns on the magic bytes and drops anything that does not look like a header.
use bytes::{Buf, BytesMut};

use crate::errors::TransportError;

const START1: u8 = 0x94;
const START2: u8 = 0xC3;
const HEADER_LEN: usize = 4;
/// Largest payload the firmware will send or accept.
pub const MAX_PAYLOAD: usize = 512;

/// Incremental decoder; feed it arbitrary chunks and pull whole payloads out.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes currently buffered (including any partial frame).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete payload, or None when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Realign to header if needed
            match self.buf.iter().position(|&b| b == START1) {
                Some(0) => {}
                Some(pos) => self.buf.advance(pos),
                None => {
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != START2 {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
            if declared == 0 || declared > MAX_PAYLOAD {
                // Corrupt header; skip the magic byte and look for the next one
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }
            self.buf.advance(HEADER_LEN);
            return Some(self.buf.split_to(declared).to_vec());
        }
    }
}

/// Wrap an encoded protobuf in a stream header.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(TransportError::Unsupported(format!(
            "frame of {} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD
        )));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(START1);
    out.push(START2);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    Ok(out)
}
