use std::collections::HashMap;
use std::io::Read;

use super::header::{read_gguf_string, read_u32, read_u64};
use crate::error::{ModelError, Result};

/// A single GGUF metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Array(Vec<GgufValue>),
}

impl GgufValue {
    fn type_name(&self) -> &'static str {
        match self {
            GgufValue::U8(_) => "U8",
            GgufValue::I8(_) => "I8",
            GgufValue::U16(_) => "U16",
            GgufValue::I16(_) => "I16",
            GgufValue::U32(_) => "U32",
            GgufValue::I32(_) => "I32",
            GgufValue::U64(_) => "U64",
            GgufValue::I64(_) => "I64",
            GgufValue::F32(_) => "F32",
            GgufValue::F64(_) => "F64",
            GgufValue::Bool(_) => "Bool",
            GgufValue::String(_) => "String",
            GgufValue::Array(_) => "Array",
        }
    }

    /// Any non-negative integer variant, widened. Converters write counts with
    /// whatever width they like, so callers should not care which one it is.
    fn as_u64(&self) -> Option<u64> {
        match *self {
            GgufValue::U8(v) => Some(v as u64),
            GgufValue::U16(v) => Some(v as u64),
            GgufValue::U32(v) => Some(v as u64),
            GgufValue::U64(v) => Some(v),
            GgufValue::I8(v) if v >= 0 => Some(v as u64),
            GgufValue::I16(v) if v >= 0 => Some(v as u64),
            GgufValue::I32(v) if v >= 0 => Some(v as u64),
            GgufValue::I64(v) if v >= 0 => Some(v as u64),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match *self {
            GgufValue::I8(v) => Some(v as i64),
            GgufValue::I16(v) => Some(v as i64),
            GgufValue::I32(v) => Some(v as i64),
            GgufValue::I64(v) => Some(v),
            _ => self.as_u64().and_then(|v| i64::try_from(v).ok()),
        }
    }

    fn as_f32(&self) -> Option<f32> {
        match *self {
            GgufValue::F32(v) => Some(v),
            GgufValue::F64(v) => Some(v as f32),
            _ => None,
        }
    }
}

/// Collection of GGUF metadata key-value pairs.
#[derive(Debug, Default)]
pub struct GgufMetadata {
    pub entries: HashMap<String, GgufValue>,
}

impl GgufMetadata {
    fn lookup(&self, key: &str) -> Result<&GgufValue> {
        self.entries
            .get(key)
            .ok_or_else(|| ModelError::MissingKey(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str, got: &GgufValue) -> ModelError {
        ModelError::TypeMismatch {
            key: key.to_string(),
            expected,
            got: got.type_name(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.lookup(key)? {
            GgufValue::String(s) => Ok(s.as_str()),
            other => Err(Self::mismatch(key, "String", other)),
        }
    }

    /// Unsigned integer of any width, as `usize`.
    pub fn get_usize(&self, key: &str) -> Result<usize> {
        let value = self.lookup(key)?;
        value
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| Self::mismatch(key, "unsigned integer", value))
    }

    pub fn get_u32(&self, key: &str) -> Result<u32> {
        let value = self.lookup(key)?;
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Self::mismatch(key, "U32", value))
    }

    pub fn get_f32(&self, key: &str) -> Result<f32> {
        let value = self.lookup(key)?;
        value.as_f32().ok_or_else(|| Self::mismatch(key, "F32", value))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.lookup(key)? {
            GgufValue::Bool(b) => Ok(*b),
            other => Err(Self::mismatch(key, "Bool", other)),
        }
    }

    fn get_array(&self, key: &str) -> Result<&[GgufValue]> {
        match self.lookup(key)? {
            GgufValue::Array(arr) => Ok(arr),
            other => Err(Self::mismatch(key, "Array", other)),
        }
    }

    fn collect_array<T>(
        &self,
        key: &str,
        expected: &'static str,
        convert: impl Fn(&GgufValue) -> Option<T>,
    ) -> Result<Vec<T>> {
        self.get_array(key)?
            .iter()
            .enumerate()
            .map(|(i, v)| {
                convert(v).ok_or_else(|| Self::mismatch(&format!("{}[{}]", key, i), expected, v))
            })
            .collect()
    }

    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>> {
        self.collect_array(key, "String", |v| match v {
            GgufValue::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn get_f32_array(&self, key: &str) -> Result<Vec<f32>> {
        self.collect_array(key, "F32", GgufValue::as_f32)
    }

    pub fn get_i32_array(&self, key: &str) -> Result<Vec<i32>> {
        self.collect_array(key, "I32", |v| v.as_i64().and_then(|x| i32::try_from(x).ok()))
    }

    /// Length of an array value without converting its elements.
    pub fn array_len(&self, key: &str) -> Result<usize> {
        Ok(self.get_array(key)?.len())
    }

    /// Parses `n_kv` entries: GGUF string key, u32 type ID, payload.
    ///
    /// Type IDs: 0=U8, 1=I8, 2=U16, 3=I16, 4=U32, 5=I32, 6=F32, 7=Bool,
    /// 8=String, 9=Array, 10=U64, 11=I64, 12=F64.
    pub fn parse_kv(reader: &mut impl Read, n_kv: u64) -> Result<GgufMetadata> {
        let mut entries = HashMap::new();
        for _ in 0..n_kv {
            let key = read_gguf_string(reader)?;
            let type_id = read_u32(reader)?;
            let value = read_value(reader, type_id)?;
            entries.insert(key, value);
        }
        Ok(GgufMetadata { entries })
    }
}

fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_value(reader: &mut impl Read, type_id: u32) -> Result<GgufValue> {
    let value = match type_id {
        0 => GgufValue::U8(read_array::<1>(reader)?[0]),
        1 => GgufValue::I8(read_array::<1>(reader)?[0] as i8),
        2 => GgufValue::U16(u16::from_le_bytes(read_array(reader)?)),
        3 => GgufValue::I16(i16::from_le_bytes(read_array(reader)?)),
        4 => GgufValue::U32(read_u32(reader)?),
        5 => GgufValue::I32(i32::from_le_bytes(read_array(reader)?)),
        6 => GgufValue::F32(f32::from_le_bytes(read_array(reader)?)),
        7 => GgufValue::Bool(read_array::<1>(reader)?[0] != 0),
        8 => GgufValue::String(read_gguf_string(reader)?),
        9 => {
            let elem_type = read_u32(reader)?;
            let count = read_u64(reader)? as usize;
            // Cap the preallocation; a corrupt count must not abort the process.
            let mut values = Vec::with_capacity(count.min(1 << 16));
            for _ in 0..count {
                values.push(read_value(reader, elem_type)?);
            }
            GgufValue::Array(values)
        }
        10 => GgufValue::U64(read_u64(reader)?),
        11 => GgufValue::I64(i64::from_le_bytes(read_array(reader)?)),
        12 => GgufValue::F64(f64::from_le_bytes(read_array(reader)?)),
        other => return Err(ModelError::UnsupportedGgufType(other)),
    };
    Ok(value)
}
