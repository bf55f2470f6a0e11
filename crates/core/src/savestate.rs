//! Save state for the AQP card.
//!
//! Only the register file is persisted. Everything else on the card is
//! transient protocol state or memory the host re-initialises on every boot,
//! so restoring a snapshot is a power-on with the registers put back.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "AQPS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Generation       |  u8 (0 = detect, 1 = link)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SaveStateError;

/// Magic bytes identifying an AQP save state file.
const MAGIC: &[u8; 4] = b"AQPS";
/// Current save state format version.
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFileState {
    pub control: u8,
    pub status: u8,
    pub mode: u8,
    pub select: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveState {
    pub registers: RegisterFileState,
}

/// Serialize with header and deflate compression.
pub fn encode(state: &SaveState, generation_byte: u8) -> Result<Vec<u8>, SaveStateError> {
    let payload = bincode::serialize(state)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(generation_byte);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Verify magic, version and generation, then inflate the payload.
pub fn decode(data: &[u8], expected_generation: u8) -> Result<SaveState, SaveStateError> {
    if data.len() < HEADER_LEN {
        return Err(SaveStateError::TooSmall);
    }
    if &data[0..4] != MAGIC {
        return Err(SaveStateError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(SaveStateError::UnsupportedVersion { found: version, expected: FORMAT_VERSION });
    }
    let generation = data[8];
    if generation != expected_generation {
        return Err(SaveStateError::GenerationMismatch { saved: generation, current: expected_generation });
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| SaveStateError::Decompress(format!("{:?}", e)))?;
    Ok(bincode::deserialize(&decompressed)?)
}

pub fn save_to_file(state: &SaveState, generation_byte: u8, path: &Path) -> Result<(), SaveStateError> {
    let bytes = encode(state, generation_byte)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_from_file(path: &Path, expected_generation: u8) -> Result<SaveState, SaveStateError> {
    let data = std::fs::read(path)?;
    decode(&data, expected_generation)
}

/// Derive save state file path from a script path.
/// `boot.aqp` → `boot.state`
pub fn state_path(script_path: &str) -> String {
    let p = Path::new(script_path);
    let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or("aqp");
    let dir = p.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}.state", stem)).to_string_lossy().into_owned()
}
