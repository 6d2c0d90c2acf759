use std::io::Read;

use super::dtype::GgmlType;
use super::header::{read_gguf_string, read_u32, read_u64};
use crate::error::{ModelError, Result};

/// One entry of the tensor info table.
#[derive(Debug, Clone)]
pub struct GgufTensorInfo {
    /// e.g. "blk.0.attn_q.weight"
    pub name: String,
    /// Dimensions, fastest-varying first (GGUF order).
    pub dims: Vec<u64>,
    pub ty: GgmlType,
    /// Offset from the start of the tensor data section.
    pub offset: u64,
}

/// ggml tensors have at most four dimensions.
const MAX_DIMS: u32 = 4;

impl GgufTensorInfo {
    pub fn numel(&self) -> Result<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |n, &d| usize::try_from(d).ok().and_then(|d| n.checked_mul(d)))
            .ok_or_else(|| self.malformed("element count overflows"))
    }

    pub fn data_size(&self) -> Result<usize> {
        self.numel()?
            .div_ceil(self.ty.block_size())
            .checked_mul(self.ty.block_bytes())
            .ok_or_else(|| self.malformed("byte size overflows"))
    }

    fn malformed(&self, what: &str) -> ModelError {
        ModelError::Malformed(format!("tensor '{}' {}: dims {:?}", self.name, what, self.dims))
    }

    /// Dimensions in row-major order (rows first), as the model code indexes them.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().rev().map(|&d| d as usize).collect()
    }
}

/// Entry layout: name, u32 n_dims, n_dims x u64, u32 type ID, u64 offset.
pub fn parse_tensor_infos(reader: &mut impl Read, n_tensors: u64) -> Result<Vec<GgufTensorInfo>> {
    let mut infos = Vec::with_capacity((n_tensors as usize).min(1 << 16));
    for _ in 0..n_tensors {
        let name = read_gguf_string(reader)?;

        let n_dims = read_u32(reader)?;
        if n_dims > MAX_DIMS {
            return Err(ModelError::Malformed(format!(
                "tensor '{}' has {} dimensions",
                name, n_dims
            )));
        }
        let dims = (0..n_dims)
            .map(|_| read_u64(reader))
            .collect::<Result<Vec<_>>>()?;

        let type_id = read_u32(reader)?;
        let ty = GgmlType::from_gguf_type(type_id).ok_or(ModelError::UnsupportedGgufType(type_id))?;
        let offset = read_u64(reader)?;

        let info = GgufTensorInfo {
            name,
            dims,
            ty,
            offset,
        };
        info.data_size()?;
        infos.push(info);
    }
    Ok(infos)
}
