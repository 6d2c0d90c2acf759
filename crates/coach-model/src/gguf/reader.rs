use std::collections::HashMap;
use std::io::{BufReader, Seek};
use std::path::Path;

use half::f16;
use memmap2::Mmap;

use super::dtype::GgmlType;
use super::header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT};
use super::metadata::GgufMetadata;
use super::tensor_info::{self, GgufTensorInfo};
use crate::error::{ModelError, Result};

/// A parsed GGUF file. Header, metadata and tensor table are read with
/// buffered IO; tensor data stays in a read-only memory map.
pub struct GgufFile {
    pub header: GgufHeader,
    pub metadata: GgufMetadata,
    pub tensor_infos: Vec<GgufTensorInfo>,
    by_name: HashMap<String, usize>,
    mmap: Mmap,
    data_offset: usize,
}

impl GgufFile {
    pub fn open(path: &Path) -> Result<GgufFile> {
        let file = std::fs::File::open(path)?;
        let mut reader = BufReader::new(&file);

        let header = GgufHeader::parse(&mut reader)?;
        let metadata = GgufMetadata::parse_kv(&mut reader, header.n_kv)?;
        let tensor_infos = tensor_info::parse_tensor_infos(&mut reader, header.n_tensors)?;

        let alignment = metadata
            .get_usize("general.alignment")
            .ok()
            .filter(|a| a.is_power_of_two())
            .unwrap_or(GGUF_DEFAULT_ALIGNMENT);
        let table_end = reader.stream_position()? as usize;
        let data_offset = table_end.next_multiple_of(alignment);

        // SAFETY: the artifact is a read-only model file; it is not modified
        // while the map is alive.
        let mmap = unsafe { Mmap::map(&file)? };

        let by_name = tensor_infos
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        Ok(GgufFile {
            header,
            metadata,
            tensor_infos,
            by_name,
            mmap,
            data_offset,
        })
    }

    pub fn tensor_info(&self, name: &str) -> Option<&GgufTensorInfo> {
        self.by_name.get(name).map(|&i| &self.tensor_infos[i])
    }

    fn tensor_data(&self, info: &GgufTensorInfo) -> Result<&[u8]> {
        let out_of_bounds = || ModelError::TensorOutOfBounds(info.name.clone());
        let start = usize::try_from(info.offset)
            .ok()
            .and_then(|o| o.checked_add(self.data_offset))
            .ok_or_else(out_of_bounds)?;
        let end = start.checked_add(info.data_size()?).ok_or_else(out_of_bounds)?;
        self.mmap.get(start..end).ok_or_else(out_of_bounds)
    }

    /// Loads a tensor by name and dequantizes it to f32, returning the data and
    /// its row-major shape.
    pub fn tensor_f32(&self, name: &str) -> Result<(Vec<f32>, Vec<usize>)> {
        let info = self
            .tensor_info(name)
            .ok_or_else(|| ModelError::TensorNotFound(name.to_string()))?;
        let raw = self.tensor_data(info)?;
        let numel = info.numel()?;

        let data = match info.ty {
            GgmlType::F32 => raw
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            GgmlType::F16 => raw
                .chunks_exact(2)
                .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            GgmlType::Q4_0 => dequantize_blocks(raw, numel, info.ty, dequantize_q4_0),
            GgmlType::Q8_0 => dequantize_blocks(raw, numel, info.ty, dequantize_q8_0),
            GgmlType::Q4K => dequantize_blocks(raw, numel, info.ty, dequantize_q4_k),
            GgmlType::Q6K => dequantize_blocks(raw, numel, info.ty, dequantize_q6_k),
        };

        Ok((data, info.shape()))
    }

    /// Like [`tensor_f32`](Self::tensor_f32) but checks the shape.
    pub fn tensor_f32_shaped(&self, name: &str, expected: &[usize]) -> Result<Vec<f32>> {
        let (data, shape) = self.tensor_f32(name)?;
        if shape.iter().product::<usize>() != expected.iter().product::<usize>() {
            return Err(ModelError::TensorShape {
                name: name.to_string(),
                expected: expected.to_vec(),
                got: shape,
            });
        }
        Ok(data)
    }
}

fn dequantize_blocks(raw: &[u8], numel: usize, ty: GgmlType, block_fn: fn(&[u8], &mut Vec<f32>)) -> Vec<f32> {
    let mut out = Vec::with_capacity(numel.next_multiple_of(ty.block_size()));
    for block in raw.chunks_exact(ty.block_bytes()) {
        block_fn(block, &mut out);
    }
    // Last block may carry padding.
    out.truncate(numel);
    out
}

fn read_f16(bytes: &[u8]) -> f32 {
    f16::from_le_bytes([bytes[0], bytes[1]]).to_f32()
}

/// Q4_0: f16 scale, 16 bytes of nibbles (low nibbles are elements 0..16,
/// high nibbles 16..32); value = (nibble - 8) * scale.
fn dequantize_q4_0(block: &[u8], out: &mut Vec<f32>) {
    let scale = read_f16(&block[0..2]);
    let qs = &block[2..18];
    out.extend(qs.iter().map(|&b| ((b & 0x0F) as i32 - 8) as f32 * scale));
    out.extend(qs.iter().map(|&b| ((b >> 4) as i32 - 8) as f32 * scale));
}

/// Q8_0: f16 scale, 32 signed bytes; value = q * scale.
fn dequantize_q8_0(block: &[u8], out: &mut Vec<f32>) {
    let scale = read_f16(&block[0..2]);
    out.extend(block[2..34].iter().map(|&q| (q as i8) as f32 * scale));
}

/// 6-bit scale/min pair `j` of a Q4_K block's packed 12-byte scale table.
fn scale_min_k4(j: usize, scales: &[u8]) -> (u8, u8) {
    if j < 4 {
        (scales[j] & 63, scales[j + 4] & 63)
    } else {
        (
            (scales[j + 4] & 0x0F) | ((scales[j - 4] >> 6) << 4),
            (scales[j + 4] >> 4) | ((scales[j] >> 6) << 4),
        )
    }
}

/// Q4_K super-block: f16 d, f16 dmin, 12 bytes of packed scales/mins, 128 bytes
/// of nibbles covering 256 elements in 8 sub-blocks of 32.
fn dequantize_q4_k(block: &[u8], out: &mut Vec<f32>) {
    let d = read_f16(&block[0..2]);
    let dmin = read_f16(&block[2..4]);
    let scales = &block[4..16];
    let qs = &block[16..144];

    for (chunk, q) in qs.chunks_exact(32).enumerate() {
        let (sc_lo, m_lo) = scale_min_k4(2 * chunk, scales);
        let (sc_hi, m_hi) = scale_min_k4(2 * chunk + 1, scales);
        let (d_lo, min_lo) = (d * sc_lo as f32, dmin * m_lo as f32);
        let (d_hi, min_hi) = (d * sc_hi as f32, dmin * m_hi as f32);
        out.extend(q.iter().map(|&b| d_lo * (b & 0x0F) as f32 - min_lo));
        out.extend(q.iter().map(|&b| d_hi * (b >> 4) as f32 - min_hi));
    }
}

/// Q6_K super-block: 128 bytes low nibbles, 64 bytes high 2-bit pairs,
/// 16 signed sub-block scales, f16 d. 256 elements in two halves of 128.
fn dequantize_q6_k(block: &[u8], out: &mut Vec<f32>) {
    let d = read_f16(&block[208..210]);
    let start = out.len();
    out.resize(start + 256, 0.0);
    let y = &mut out[start..];

    for half in 0..2 {
        let ql = &block[half * 64..half * 64 + 64];
        let qh = &block[128 + half * 32..128 + half * 32 + 32];
        let sc = &block[192 + half * 8..192 + half * 8 + 8];
        let y = &mut y[half * 128..half * 128 + 128];

        for l in 0..32 {
            let is = l / 16;
            let q1 = ((ql[l] & 0x0F) | ((qh[l] & 3) << 4)) as i32 - 32;
            let q2 = ((ql[l + 32] & 0x0F) | (((qh[l] >> 2) & 3) << 4)) as i32 - 32;
            let q3 = ((ql[l] >> 4) | (((qh[l] >> 4) & 3) << 4)) as i32 - 32;
            let q4 = ((ql[l + 32] >> 4) | (((qh[l] >> 6) & 3) << 4)) as i32 - 32;
            y[l] = d * (sc[is] as i8) as f32 * q1 as f32;
            y[l + 32] = d * (sc[is + 2] as i8) as f32 * q2 as f32;
            y[l + 64] = d * (sc[is + 4] as i8) as f32 * q3 as f32;
            y[l + 96] = d * (sc[is + 6] as i8) as f32 * q4 as f32;
        }
    }
}
