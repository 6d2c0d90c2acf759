use std::io::Read;

use crate::error::{ModelError, Result};

/// ASCII "GGUF".
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Alignment of the tensor data section unless `general.alignment` overrides it.
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;

#[derive(Debug)]
pub struct GgufHeader {
    pub version: u32,
    pub n_tensors: u64,
    pub n_kv: u64,
}

impl GgufHeader {
    /// Reads magic, version and the tensor/KV counts.
    ///
    /// Versions 2 and 3 share the same layout (64-bit counts); version 1 used
    /// 32-bit counts and is rejected.
    pub fn parse(reader: &mut impl Read) -> Result<GgufHeader> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic(magic));
        }

        let version = read_u32(reader)?;
        if !(2..=3).contains(&version) {
            return Err(ModelError::UnsupportedVersion(version));
        }

        Ok(GgufHeader {
            version,
            n_tensors: read_u64(reader)?,
            n_kv: read_u64(reader)?,
        })
    }
}

pub(crate) fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// GGUF string: u64 length followed by UTF-8 bytes.
///
/// The length is untrusted: bytes are read incrementally and a length past
/// the end of the input is an error, never an allocation of that size.
pub(crate) fn read_gguf_string(reader: &mut impl Read) -> Result<String> {
    let len = read_u64(reader)?;
    let mut buf = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(ModelError::Malformed(format!(
            "string of {} bytes runs past the end of the file ({} left)",
            len,
            buf.len()
        )));
    }
    String::from_utf8(buf).map_err(|e| ModelError::Other(format!("invalid UTF-8 in string: {}", e)))
}
