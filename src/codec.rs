use core::convert::Infallible;

use bytes::Bytes;
use framez::{decode::Decoder, encode::Encoder};

use crate::{
    Frame, OpCode,
    error::{DecodeError, EncodeError},
};

const MIN_HEADER_SIZE: usize = 2;
const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Largest possible frame header: 2 bytes, an 8 byte length and a mask key.
pub(crate) const MAX_HEADER_SIZE: usize = 14;

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Header,
    /// Discarding the payload of a rejected frame.
    Skip { remaining: u64 },
}

/// An item decoded from the read buffer.
#[derive(Debug)]
pub enum Decoded<'buf> {
    Frame {
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: &'buf [u8],
    },
    /// A rejected frame header. Its payload is discarded by the following decodes.
    Rejected(DecodeError),
    /// Discarded payload bytes of a rejected frame.
    Skipped,
}

/// An owned [`Decoded`].
#[derive(Debug)]
pub(crate) enum Inbound {
    Frame(Frame),
    Rejected(DecodeError),
    Skipped,
}

impl Inbound {
    /// Copies the payload out of the read buffer.
    pub(crate) fn owned(decoded: Decoded<'_>) -> Self {
        match decoded {
            Decoded::Frame {
                fin,
                opcode,
                mask,
                payload,
            } => Inbound::Frame(Frame::new(fin, opcode, mask, Bytes::copy_from_slice(payload))),
            Decoded::Rejected(err) => Inbound::Rejected(err),
            Decoded::Skipped => Inbound::Skipped,
        }
    }
}

/// Length of the header in front of a `payload_len` bytes payload.
const fn header_len(payload_len: usize, masked: bool) -> usize {
    let extra = if payload_len < 126 {
        0
    } else if payload_len < 65536 {
        2
    } else {
        8
    };

    MIN_HEADER_SIZE + extra + masked as usize * 4
}

/// Number of bytes `frame` occupies on the wire.
pub(crate) fn encoded_len(frame: &Frame) -> usize {
    let len = frame.payload().len();

    header_len(len, frame.mask().is_some()) + len
}

/// RFC 6455 frame codec.
///
/// Decoded frames keep their mask key and masked payload; unmasking is left to the dispatcher.
/// A frame whose header is invalid is decoded as [`Decoded::Rejected`] and its payload is skipped,
/// so decoding resumes with the next frame.
/// Encoded frames are masked with the key they carry.
#[derive(Debug)]
pub struct FramesCodec {
    max_payload_len: u64,
    decode_state: DecodeState,
}

impl FramesCodec {
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            max_payload_len: max_payload_len as u64,
            decode_state: DecodeState::Header,
        }
    }

    fn validate(
        &self,
        byte0: u8,
        opcode: Result<OpCode, DecodeError>,
        payload_len: u64,
    ) -> Result<OpCode, DecodeError> {
        if byte0 & 0b0111_0000 != 0 {
            return Err(DecodeError::ReservedBitsNotZero);
        }

        let opcode = opcode?;
        let fin = byte0 & 0b1000_0000 != 0;

        if opcode.is_control() {
            if !fin {
                return Err(DecodeError::ControlFrameFragmented);
            }

            if payload_len > MAX_CONTROL_PAYLOAD {
                return Err(DecodeError::ControlFrameTooLarge);
            }
        }

        if payload_len > self.max_payload_len {
            return Err(DecodeError::PayloadTooLarge { len: payload_len });
        }

        Ok(opcode)
    }
}

impl framez::decode::DecodeError for FramesCodec {
    type Error = Infallible;
}

impl<'buf> Decoder<'buf> for FramesCodec {
    type Item = Decoded<'buf>;

    fn decode(&mut self, src: &'buf mut [u8]) -> Result<Option<(Self::Item, usize)>, Self::Error> {
        if let DecodeState::Skip { remaining } = self.decode_state {
            if src.is_empty() {
                return Ok(None);
            }

            let n = remaining.min(src.len() as u64);

            self.decode_state = match remaining - n {
                0 => DecodeState::Header,
                remaining => DecodeState::Skip { remaining },
            };

            return Ok(Some((Decoded::Skipped, n as usize)));
        }

        if src.len() < MIN_HEADER_SIZE {
            return Ok(None);
        }

        let masked = src[1] & 0b1000_0000 != 0;
        let length_code = src[1] & 0x7F;
        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };

        let header_len = MIN_HEADER_SIZE + extra + masked as usize * 4;

        if src.len() < header_len {
            return Ok(None);
        }

        let payload_len = match extra {
            0 => length_code as u64,
            2 => u16::from_be_bytes([src[2], src[3]]) as u64,
            _ => u64::from_be_bytes([
                src[2], src[3], src[4], src[5], src[6], src[7], src[8], src[9],
            ]),
        };

        let byte0 = src[0];

        let opcode = match self.validate(byte0, OpCode::try_from(byte0 & 0b0000_1111), payload_len)
        {
            Ok(opcode) => opcode,
            Err(err) => {
                if payload_len > 0 {
                    self.decode_state = DecodeState::Skip {
                        remaining: payload_len,
                    };
                }

                return Ok(Some((Decoded::Rejected(err), header_len)));
            }
        };

        // Bounded by max_payload_len, which came from a usize.
        let payload_len = payload_len as usize;
        let frame_len = header_len + payload_len;

        if src.len() < frame_len {
            return Ok(None);
        }

        let mask = masked.then(|| {
            [
                src[2 + extra],
                src[3 + extra],
                src[4 + extra],
                src[5 + extra],
            ]
        });

        let frame = Decoded::Frame {
            fin: byte0 & 0b1000_0000 != 0,
            opcode,
            mask,
            payload: &src[header_len..frame_len],
        };

        Ok(Some((frame, frame_len)))
    }
}

impl Encoder<Frame> for FramesCodec {
    type Error = EncodeError;

    fn encode(&mut self, item: Frame, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let len = item.payload().len();
        let frame_len = encoded_len(&item);

        if dst.len() < frame_len {
            return Err(EncodeError::BufferTooSmall);
        }

        let mask_bit = if item.mask().is_some() { 0x80 } else { 0 };

        dst[0] = (item.is_final() as u8) << 7 | item.opcode().into_u8();

        let mut pos = if len < 126 {
            dst[1] = mask_bit | len as u8;
            2
        } else if len < 65536 {
            dst[1] = mask_bit | 126;
            dst[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            dst[1] = mask_bit | 127;
            dst[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = item.mask() {
            dst[pos..pos + 4].copy_from_slice(&mask);
            pos += 4;
        }

        let payload = &mut dst[pos..frame_len];
        payload.copy_from_slice(item.payload());

        if let Some(mask) = item.mask() {
            crate::mask::apply(payload, mask);
        }

        Ok(frame_len)
    }
}
