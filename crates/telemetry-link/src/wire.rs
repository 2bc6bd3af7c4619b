//! Length-prefixed JSON framing for samples on a TCP stream.
//!
//! Each frame is a big-endian `u32` byte count followed by one JSON document.
//! The count is checked against a ceiling before any allocation so a corrupt
//! prefix cannot ask the reader for gigabytes.

use std::io::{Read, Write};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Upper bound on a single encoded frame. Samples carry one compressed image
/// apiece, so anything near this size indicates a corrupt stream.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte ceiling")]
    Oversize { len: usize },
    #[error("failed to encode or decode frame body")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serialize `value` and write it as one frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), WireError> {
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(WireError::Oversize { len: body.len() });
    }
    writer.write_all(&(body.len() as u32).to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read exactly one frame and deserialize it.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, WireError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(WireError::Oversize { len });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}
