//! Profile framing on a byte stream
//!
//! Two wire formats are supported:
//!
//! - [`WireFormat::Text`] is the legacy format: `name:age:isMale:interests`
//!   written in one call with no escaping and no length. The receiver treats
//!   the first non-empty read as the whole record. A `:` inside any field
//!   makes the record undecodable, and a record larger than one read is cut
//!   short. Both are known limitations of the format.
//! - [`WireFormat::Framed`] writes a 4-byte big-endian length followed by the
//!   bincode encoding of the profile, and reassembles across reads.
//!
//! Either way the receiver answers with [`ACK_TOKEN`] so the sender can close
//! without racing the receiver's read.

use serde::{Deserialize, Serialize};

use crate::errors::CodecError;
use crate::types::Profile;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Acknowledgement the receiver writes after decoding a record
pub const ACK_TOKEN: &[u8] = b"disconnect";

/// Field separator of the text format
pub const FIELD_SEPARATOR: char = ':';

const TEXT_FIELD_COUNT: usize = 4;
const FRAME_HEADER_LEN: usize = 4;

// ----------------------------------------------------------------------------
// Wire Format
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Colon-delimited single write, compatible with legacy peers
    #[default]
    Text,
    /// Length-prefixed bincode record
    Framed,
}

impl WireFormat {
    /// Encode a profile as one write
    pub fn encode(&self, profile: &Profile, max_frame_size: usize) -> Result<Vec<u8>, CodecError> {
        match self {
            WireFormat::Text => Ok(encode_text(profile)),
            WireFormat::Framed => encode_framed(profile, max_frame_size),
        }
    }

    /// Fresh decoder for one record
    pub fn decoder(&self, max_frame_size: usize) -> ProfileDecoder {
        ProfileDecoder::new(*self, max_frame_size)
    }
}

// ----------------------------------------------------------------------------
// Text Format
// ----------------------------------------------------------------------------

pub fn encode_text(profile: &Profile) -> Vec<u8> {
    format!(
        "{name}{sep}{age}{sep}{male}{sep}{interests}",
        name = profile.display_name(),
        age = profile.age(),
        male = profile.is_male(),
        interests = profile.interests(),
        sep = FIELD_SEPARATOR,
    )
    .into_bytes()
}

pub fn decode_text(bytes: &[u8]) -> Result<Profile, CodecError> {
    let text = String::from_utf8(bytes.to_vec())?;
    let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    if fields.len() != TEXT_FIELD_COUNT {
        return Err(CodecError::FieldCount {
            expected: TEXT_FIELD_COUNT,
            actual: fields.len(),
        });
    }

    let is_male = parse_bool(fields[2])?;
    Ok(Profile::new(fields[0], fields[1], is_male, fields[3]))
}

fn parse_bool(value: &str) -> Result<bool, CodecError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(CodecError::InvalidBool {
            value: value.to_string(),
        })
    }
}

// ----------------------------------------------------------------------------
// Framed Format
// ----------------------------------------------------------------------------

pub fn encode_framed(profile: &Profile, max_frame_size: usize) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serialize(profile)?;
    if body.len() > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            size: body.len(),
            max_size: max_frame_size,
        });
    }

    let body_len = u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge {
        size: body.len(),
        max_size: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&body_len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

// ----------------------------------------------------------------------------
// Decoder
// ----------------------------------------------------------------------------

/// Incremental decoder for exactly one record
#[derive(Debug)]
pub struct ProfileDecoder {
    format: WireFormat,
    max_frame_size: usize,
    buffer: Vec<u8>,
}

impl ProfileDecoder {
    pub fn new(format: WireFormat, max_frame_size: usize) -> Self {
        Self {
            format,
            max_frame_size,
            buffer: Vec::new(),
        }
    }

    /// Feed the bytes of one read.
    ///
    /// Returns `Ok(Some(_))` once a record is complete, `Ok(None)` while more
    /// bytes are needed. An empty chunk never completes a record.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Profile>, CodecError> {
        if chunk.is_empty() {
            return Ok(None);
        }

        match self.format {
            WireFormat::Text => decode_text(chunk).map(Some),
            WireFormat::Framed => {
                self.buffer.extend_from_slice(chunk);
                self.try_frame()
            }
        }
    }

    /// Bytes received but not yet part of a complete record
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn try_frame(&mut self) -> Result<Option<Profile>, CodecError> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
        let body_len = u32::from_be_bytes(header) as usize;
        if body_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: body_len,
                max_size: self.max_frame_size,
            });
        }

        let end = FRAME_HEADER_LEN + body_len;
        if self.buffer.len() < end {
            return Ok(None);
        }

        let profile = bincode::deserialize(&self.buffer[FRAME_HEADER_LEN..end])?;
        self.buffer.drain(..end);
        Ok(Some(profile))
    }
}

// ----------------------------------------------------------------------------
// Acknowledgement
// ----------------------------------------------------------------------------

/// Whether the bytes read so far carry the acknowledgement token
pub fn is_ack(bytes: &[u8]) -> bool {
    bytes
        .windows(ACK_TOKEN.len())
        .any(|window| window.eq_ignore_ascii_case(ACK_TOKEN))
}
