//! Framing for record log entries.
//!
//! ```text
//! file:  [magic: "CRUD"][version: 1 byte][frame]*
//! frame: [version: 1 byte][length: 4 bytes LE][json: N bytes][crc32: 4 bytes LE]
//! ```

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

const FRAME_VERSION: u8 = 1;

/// Magic bytes at the start of every record log.
pub const MAGIC: [u8; 4] = *b"CRUD";

/// Header length in bytes (magic + version).
pub const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Serializes `value` into one checksummed frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(invalid(format!(
            "frame size {} exceeds maximum {MAX_FRAME_SIZE}",
            data.len()
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(FRAME_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Reads one frame and verifies its checksum.
///
/// # Errors
/// - `UnexpectedEof` if the frame is cut short (torn write)
/// - `InvalidData` on version, size, checksum or JSON mismatch
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut prefix = [0u8; 5];
    reader.read_exact(&mut prefix)?;

    if prefix[0] != FRAME_VERSION {
        return Err(invalid(format!(
            "unsupported frame version: {} (expected {FRAME_VERSION})",
            prefix[0]
        )));
    }

    let len = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(invalid(format!("frame size {len} exceeds maximum {MAX_FRAME_SIZE}")));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc = [0u8; 4];
    reader.read_exact(&mut crc)?;
    let stored = u32::from_le_bytes(crc);
    let computed = checksum(&data);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)"
        )));
    }

    serde_json::from_slice(&data).map_err(|e| invalid(format!("deserialization failed: {e}")))
}

pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FRAME_VERSION])
}

/// Reads and validates the file header, returning its version byte.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(invalid(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {:?}",
            &header[..4]
        )));
    }
    Ok(header[4])
}
