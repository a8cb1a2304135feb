//! Decoding of completed armored payloads into structured messages.
//!
//! Full per-message-type decoding is left to implementations of [AisCodec]. The bundled
//! [EnvelopeCodec] only extracts the header common to every AIS message.
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CodecError;

/// A decoded AIS message as named fields.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Receive time of the first fragment of the message.
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DecodedMessage {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// MMSI, if the codec produced one.
    pub fn mmsi(&self) -> Option<u64> {
        self.get("mmsi").and_then(Value::as_u64)
    }

    pub fn msg_type(&self) -> Option<u64> {
        self.get("msg_type").and_then(Value::as_u64)
    }
}

/// Turns a reassembled armored payload into a [DecodedMessage].
///
/// Implementations return only the message fields; the caller stamps the receive time.
pub trait AisCodec: Send {
    /// # Errors
    /// [CodecError] if the payload cannot be decoded.
    fn decode(&self, payload: &str, fill_bits: u8) -> Result<Map<String, Value>, CodecError>;
}

/// Value of a single armor character, or `None` if it is outside the AIS armor alphabet.
#[must_use]
pub fn dearmor_char(c: char) -> Option<u8> {
    match c {
        '0'..='W' => Some(c as u8 - 48),
        '`'..='w' => Some(c as u8 - 56),
        _ => None,
    }
}

/// Unpack an armored payload into bits, most significant first, with fill bits removed.
///
/// # Errors
/// If a character is not in the armor alphabet or `fill_bits` is greater than 5.
pub fn dearmor(payload: &str, fill_bits: u8) -> Result<Vec<bool>, CodecError> {
    if fill_bits > 5 {
        return Err(CodecError::FillBits(fill_bits));
    }
    let mut bits = Vec::with_capacity(payload.len() * 6);
    for c in payload.chars() {
        let v = dearmor_char(c).ok_or(CodecError::InvalidCharacter(c))?;
        bits.extend((0..6).rev().map(|shift| (v >> shift) & 1 == 1));
    }
    bits.truncate(bits.len().saturating_sub(usize::from(fill_bits)));
    Ok(bits)
}

fn uint(bits: &[bool]) -> u64 {
    bits.iter().fold(0, |acc, b| (acc << 1) | u64::from(*b))
}

/// Decodes the common message header: type, repeat indicator, and MMSI.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Bits needed for type, repeat indicator, and MMSI.
    pub const HEADER_BITS: usize = 38;
}

impl AisCodec for EnvelopeCodec {
    fn decode(&self, payload: &str, fill_bits: u8) -> Result<Map<String, Value>, CodecError> {
        let bits = dearmor(payload, fill_bits)?;
        if bits.len() < Self::HEADER_BITS {
            return Err(CodecError::NotEnoughBits {
                actual: bits.len(),
                minimum: Self::HEADER_BITS,
            });
        }

        let mut fields = Map::new();
        fields.insert("msg_type".into(), uint(&bits[0..6]).into());
        fields.insert("repeat".into(), uint(&bits[6..8]).into());
        fields.insert("mmsi".into(), uint(&bits[8..38]).into());
        fields.insert("bits".into(), bits.len().into());
        fields.insert("payload".into(), payload.into());
        fields.insert("fill_bits".into(), fill_bits.into());
        Ok(fields)
    }
}
