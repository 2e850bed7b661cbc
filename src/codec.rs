//! Outgoing frame encoding.
//!
//! Every message leaves as a single final data frame whose first byte is `0x81`. Payloads up
//! to 65535 bytes are supported; the 64-bit extended length form is never emitted.

use rand::{Rng, SeedableRng};

use crate::errors::CodecError;

/// First header byte of every frame: FIN set, data opcode.
pub const DATA_FRAME_HEADER: u8 = 0x81;
/// Largest payload that fits in the 7-bit length field.
pub const MAX_SHORT_PAYLOAD: usize = 125;
/// Largest payload that fits in the 16-bit extended length field.
pub const MAX_PAYLOAD: usize = 0xFFFF;

const MASKBIT_MASK: u8 = 0x80;
const EXTENDED_LENGTH_16: u8 = 126;

/// Whether outgoing frames carry a masking key.
///
/// The relay this client pairs with expects unmasked frames, so [`Masking::Unmasked`] is the
/// default. Use [`Masking::Masked`] against servers that enforce client masking.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Masking {
    /// Mask bit set, random 4-byte key, payload XOR-ed with the key.
    Masked,
    /// No mask bit and no key; the payload is written unmodified.
    #[default]
    Unmasked,
}

/// One outgoing message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub(crate) payload: Vec<u8>,
}

impl Frame {
    /// Wrap a payload into a frame.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The payload bytes carried by this frame.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Encoder turning [`Frame`]s into wire bytes.
#[derive(Debug)]
pub struct FrameEncoder {
    masking: Masking,
    rng: Option<rand::rngs::StdRng>,
}

impl FrameEncoder {
    /// Create an encoder with the given masking mode.
    ///
    /// # Errors
    /// Returns [`CodecError::Entropy`] if masking is requested and the OS random source cannot
    /// seed the key generator.
    pub fn new(masking: Masking) -> Result<Self, CodecError> {
        let rng = match masking {
            Masking::Masked => Some(
                rand::rngs::StdRng::try_from_os_rng()
                    .map_err(|e| CodecError::Entropy(e.to_string()))?,
            ),
            Masking::Unmasked => None,
        };
        Ok(Self { masking, rng })
    }

    /// An encoder producing unmasked frames.
    #[must_use]
    pub fn unmasked() -> Self {
        Self {
            masking: Masking::Unmasked,
            rng: None,
        }
    }

    #[must_use]
    pub fn masking(&self) -> Masking {
        self.masking
    }

    fn encode_into(
        &mut self,
        payload: &[u8],
        dst: &mut tokio_util::bytes::BytesMut,
    ) -> Result<(), CodecError> {
        let len = payload.len();
        let wire_len = u16::try_from(len).map_err(|_| CodecError::UnsupportedPayloadSize(len))?;

        let mask_key: Option<[u8; 4]> = self.rng.as_mut().map(|rng| rng.random());
        let mask_bit = if mask_key.is_some() { MASKBIT_MASK } else { 0 };

        dst.reserve(len + 8);
        dst.extend_from_slice(&[DATA_FRAME_HEADER]);
        match u8::try_from(wire_len) {
            Ok(short) if len <= MAX_SHORT_PAYLOAD => dst.extend_from_slice(&[mask_bit | short]),
            _ => {
                dst.extend_from_slice(&[mask_bit | EXTENDED_LENGTH_16]);
                dst.extend_from_slice(&wire_len.to_be_bytes());
            }
        }

        match mask_key {
            Some(key) => {
                dst.extend_from_slice(&key);
                dst.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
            }
            None => dst.extend_from_slice(payload),
        }
        Ok(())
    }
}

impl tokio_util::codec::Encoder<Frame> for FrameEncoder {
    type Error = CodecError;

    fn encode(
        &mut self,
        item: Frame,
        dst: &mut tokio_util::bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        self.encode_into(&item.payload, dst)
    }
}

/// Encode `payload` as a single unmasked frame.
///
/// # Errors
/// Returns [`CodecError::UnsupportedPayloadSize`] for payloads longer than 65535 bytes.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut dst = tokio_util::bytes::BytesMut::with_capacity(payload.len() + 4);
    FrameEncoder::unmasked().encode_into(payload, &mut dst)?;
    Ok(dst.to_vec())
}
