use std::fs;
use std::path::Path;

use half::f16;

use super::dtype::GgmlType;
use super::header::{GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC};
use crate::error::{ModelError, Result};

/// GGUF metadata type IDs for the value kinds the writer emits.
const TYPE_U32: u32 = 4;
const TYPE_F32: u32 = 6;
const TYPE_BOOL: u32 = 7;
const TYPE_STRING: u32 = 8;
const TYPE_ARRAY: u32 = 9;

struct PendingTensor {
    name: String,
    /// Row-major shape.
    shape: Vec<usize>,
    ty: GgmlType,
    data: Vec<u8>,
}

/// Builds GGUF v3 files: metadata, tensor table and aligned tensor data.
///
/// Used to produce small artifacts for tooling and tests; it writes the same
/// layout [`GgufFile::open`](super::GgufFile::open) reads.
#[derive(Default)]
pub struct GgufWriter {
    kv: Vec<u8>,
    n_kv: u64,
    tensors: Vec<PendingTensor>,
}

impl GgufWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&mut self, key: &str, type_id: u32) {
        push_string(&mut self.kv, key);
        self.kv.extend_from_slice(&type_id.to_le_bytes());
        self.n_kv += 1;
    }

    pub fn add_u32(&mut self, key: &str, value: u32) -> &mut Self {
        self.key(key, TYPE_U32);
        self.kv.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn add_f32(&mut self, key: &str, value: f32) -> &mut Self {
        self.key(key, TYPE_F32);
        self.kv.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn add_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.key(key, TYPE_BOOL);
        self.kv.push(value as u8);
        self
    }

    pub fn add_string(&mut self, key: &str, value: &str) -> &mut Self {
        self.key(key, TYPE_STRING);
        push_string(&mut self.kv, value);
        self
    }

    pub fn add_string_array<S: AsRef<str>>(&mut self, key: &str, values: &[S]) -> &mut Self {
        self.key(key, TYPE_ARRAY);
        self.kv.extend_from_slice(&TYPE_STRING.to_le_bytes());
        self.kv.extend_from_slice(&(values.len() as u64).to_le_bytes());
        for v in values {
            push_string(&mut self.kv, v.as_ref());
        }
        self
    }

    /// Adds pre-encoded tensor data; its length must match `ty` and `shape`.
    pub fn add_tensor(&mut self, name: &str, shape: &[usize], ty: GgmlType, data: Vec<u8>) -> Result<&mut Self> {
        let numel: usize = shape.iter().product();
        if numel % ty.block_size() != 0 {
            return Err(ModelError::Other(format!(
                "tensor '{}' has {} elements, not a multiple of the {} block size",
                name, numel, ty
            )));
        }
        let expected = numel / ty.block_size() * ty.block_bytes();
        if data.len() != expected {
            return Err(ModelError::Other(format!(
                "tensor '{}' needs {} bytes of {} data, got {}",
                name,
                expected,
                ty,
                data.len()
            )));
        }
        self.tensors.push(PendingTensor {
            name: name.to_string(),
            shape: shape.to_vec(),
            ty,
            data,
        });
        Ok(self)
    }

    pub fn add_f32_tensor(&mut self, name: &str, shape: &[usize], values: &[f32]) -> Result<&mut Self> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.add_tensor(name, shape, GgmlType::F32, data)
    }

    pub fn add_f16_tensor(&mut self, name: &str, shape: &[usize], values: &[f32]) -> Result<&mut Self> {
        let data = values
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect();
        self.add_tensor(name, shape, GgmlType::F16, data)
    }

    /// Quantizes `values` to Q8_0 (per-block absmax scale).
    pub fn add_q8_0_tensor(&mut self, name: &str, shape: &[usize], values: &[f32]) -> Result<&mut Self> {
        let mut data = Vec::with_capacity(values.len() / 32 * 34);
        for block in values.chunks(32) {
            let amax = block.iter().fold(0.0f32, |m, v| m.max(v.abs()));
            let d = amax / 127.0;
            let inv = if d == 0.0 { 0.0 } else { 1.0 / d };
            data.extend_from_slice(&f16::from_f32(d).to_le_bytes());
            data.extend(block.iter().map(|&v| (v * inv).round() as i8 as u8));
        }
        self.add_tensor(name, shape, GgmlType::Q8_0, data)
    }

    /// Serializes the whole file.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&GGUF_MAGIC);
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.n_kv.to_le_bytes());
        out.extend_from_slice(&self.kv);

        let mut offset = 0usize;
        let mut offsets = Vec::with_capacity(self.tensors.len());
        for t in &self.tensors {
            push_string(&mut out, &t.name);
            out.extend_from_slice(&(t.shape.len() as u32).to_le_bytes());
            // GGUF lists dimensions fastest-varying first.
            for &d in t.shape.iter().rev() {
                out.extend_from_slice(&(d as u64).to_le_bytes());
            }
            out.extend_from_slice(&t.ty.to_gguf_type().to_le_bytes());
            out.extend_from_slice(&(offset as u64).to_le_bytes());
            offsets.push(offset);
            offset = (offset + t.data.len()).next_multiple_of(GGUF_DEFAULT_ALIGNMENT);
        }

        out.resize(out.len().next_multiple_of(GGUF_DEFAULT_ALIGNMENT), 0);
        let base = out.len();
        for (t, off) in self.tensors.iter().zip(offsets) {
            out.resize(base + off, 0);
            out.extend_from_slice(&t.data);
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}
