use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Payloads below this length use the 7-bit form.
const SHORT_PAYLOAD: usize = 126;
/// Payloads up to this length use the 16-bit extended form.
const MEDIUM_PAYLOAD: usize = 65_535;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved opcode; skipped by the connection.
    Other(u8),
}

impl OpCode {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            other => OpCode::Other(other),
        }
    }

    fn bits(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Other(other) => other & 0x0F,
        }
    }
}

/// A single decoded frame. Fragmentation is not reassembled here; DevTools
/// endpoints send unfragmented text messages.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum FrameError {
    #[error("incoming frame declares {declared} bytes, cap is {cap}")]
    PayloadTooLarge { declared: u64, cap: usize },
    #[error("outgoing payload of {len} bytes exceeds the {cap} byte cap")]
    SendTooLarge { len: usize, cap: usize },
    #[error("failed to allocate {len} bytes for a frame payload")]
    Alloc { len: usize },
}

/// XORs `payload` with the repeating 4-byte mask, in place. Involutory, so
/// the same call both masks and unmasks.
pub(crate) fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Encodes one FIN frame into `out`. Client frames pass a fresh random
/// `mask`; the unmasked form exists for the server side of loopback tests.
pub(crate) fn encode(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>, out: &mut BytesMut) {
    out.reserve(payload.len() + 14);
    out.put_u8(FIN_BIT | opcode.bits());

    let mask_flag = if mask.is_some() { MASK_BIT } else { 0 };
    let len = payload.len();
    if len < SHORT_PAYLOAD {
        out.put_u8(mask_flag | len as u8);
    } else if len <= MEDIUM_PAYLOAD {
        out.put_u8(mask_flag | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_flag | 127);
        out.put_u64(len as u64);
    }

    match mask {
        Some(mask) => {
            out.put_slice(&mask);
            let start = out.len();
            out.put_slice(payload);
            apply_mask(&mut out[start..], mask);
        }
        None => out.put_slice(payload),
    }
}

/// Encodes a masked client text frame, refusing payloads above `cap`.
pub(crate) fn encode_text(payload: &str, cap: usize, out: &mut BytesMut) -> Result<(), FrameError> {
    if payload.len() > cap {
        return Err(FrameError::SendTooLarge {
            len: payload.len(),
            cap,
        });
    }
    encode(OpCode::Text, payload.as_bytes(), Some(rand::random()), out);
    Ok(())
}

/// Pops one complete frame off `buf`, or `None` if more bytes are needed.
///
/// A declared payload length above `cap` is an error; the caller drops the
/// connection without consuming the partial payload.
pub(crate) fn decode(buf: &mut BytesMut, cap: usize) -> Result<Option<Frame>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let b0 = buf[0];
    let b1 = buf[1];
    let fin = b0 & FIN_BIT != 0;
    let opcode = OpCode::from_bits(b0 & 0x0F);
    let masked = b1 & MASK_BIT != 0;

    let mut header = 2usize;
    let declared: u64 = match b1 & 0x7F {
        126 => {
            if buf.len() < header + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
            header += 2;
            len
        }
        127 => {
            if buf.len() < header + 8 {
                return Ok(None);
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[2..10]);
            header += 8;
            u64::from_be_bytes(bytes)
        }
        len => len as u64,
    };

    if declared > cap as u64 {
        return Err(FrameError::PayloadTooLarge { declared, cap });
    }
    let len = declared as usize;

    let mask = if masked {
        if buf.len() < header + 4 {
            return Ok(None);
        }
        let mask = [
            buf[header],
            buf[header + 1],
            buf[header + 2],
            buf[header + 3],
        ];
        header += 4;
        Some(mask)
    } else {
        None
    };

    if buf.len() < header + len {
        return Ok(None);
    }

    // Payload size is attacker-controlled up to the cap; reserve fallibly
    // so a refused allocation surfaces instead of aborting.
    let mut payload = Vec::new();
    if payload.try_reserve_exact(len).is_err() {
        return Err(FrameError::Alloc { len });
    }
    buf.advance(header);
    payload.extend_from_slice(&buf[..len]);
    buf.advance(len);
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Some(Frame {
        fin,
        opcode,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(mut raw: BytesMut) -> Frame {
        decode(&mut raw, usize::MAX).unwrap().unwrap()
    }

    #[test]
    fn hello_client_frame_layout() {
        let mut out = BytesMut::new();
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        encode(OpCode::Text, b"Hello", Some(mask), &mut out);

        assert_eq!(out[0], 0x81);
        assert_eq!(out[1], 0x85);
        assert_eq!(&out[2..6], &mask);
        assert_eq!(out.len(), 2 + 4 + 5);

        let frame = decode_all(out);
        assert_eq!(frame.opcode, OpCode::Text);
        assert!(frame.fin);
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn mask_roundtrip_arbitrary_payloads() {
        for len in [0usize, 1, 3, 4, 125, 126, 127, 1024, 65_535, 65_536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut out = BytesMut::new();
            encode(OpCode::Text, &payload, Some(rand::random()), &mut out);
            let frame = decode_all(out);
            assert_eq!(frame.payload, payload, "len {len}");
        }
    }

    #[test]
    fn length_forms() {
        let mut short = BytesMut::new();
        encode(OpCode::Text, &[0u8; 125], None, &mut short);
        assert_eq!(short[1], 125);

        let mut medium = BytesMut::new();
        encode(OpCode::Text, &[0u8; 126], None, &mut medium);
        assert_eq!(medium[1], 126);
        assert_eq!(u16::from_be_bytes([medium[2], medium[3]]), 126);

        let mut long = BytesMut::new();
        encode(OpCode::Text, &[0u8; 65_536], None, &mut long);
        assert_eq!(long[1], 127);
        assert_eq!(
            u64::from_be_bytes(long[2..10].try_into().unwrap()),
            65_536
        );
    }

    #[test]
    fn incomplete_input_is_not_consumed() {
        let mut out = BytesMut::new();
        encode(OpCode::Text, b"Hello", Some([1, 2, 3, 4]), &mut out);
        let full = out.clone();

        let mut partial = BytesMut::from(&out[..7]);
        assert_eq!(decode(&mut partial, usize::MAX).unwrap(), None);
        assert_eq!(partial.len(), 7);

        let mut whole = full;
        assert!(decode(&mut whole, usize::MAX).unwrap().is_some());
        assert!(whole.is_empty());
    }

    #[test]
    fn oversized_declared_payload_is_refused() {
        let mut out = BytesMut::new();
        encode(OpCode::Text, &[0u8; 4096], None, &mut out);
        let err = decode(&mut out, 1024).unwrap_err();
        assert_eq!(
            err,
            FrameError::PayloadTooLarge {
                declared: 4096,
                cap: 1024
            }
        );
    }

    #[test]
    fn send_cap_is_enforced() {
        let mut out = BytesMut::new();
        let payload = "x".repeat(32);
        let err = encode_text(&payload, 16, &mut out).unwrap_err();
        assert!(matches!(err, FrameError::SendTooLarge { len: 32, cap: 16 }));
        assert!(out.is_empty());
    }

    #[test]
    fn control_and_unknown_opcodes() {
        let mut out = BytesMut::new();
        encode(OpCode::Ping, b"hb", None, &mut out);
        encode(OpCode::Pong, b"hb", None, &mut out);
        encode(OpCode::Close, &[], None, &mut out);
        encode(OpCode::Other(0x3), b"?", None, &mut out);

        assert_eq!(decode_all(out.split_to(4)).opcode, OpCode::Ping);
        assert_eq!(decode_all(out.split_to(4)).opcode, OpCode::Pong);
        assert_eq!(decode_all(out.split_to(2)).opcode, OpCode::Close);
        assert_eq!(decode_all(out).opcode, OpCode::Other(0x3));
    }
}
