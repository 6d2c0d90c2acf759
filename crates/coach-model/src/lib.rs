//! `coach-model` - the model side of the coach runtime.
//!
//! - GGUF parsing and dequantization (`gguf`)
//! - Vocabulary and the text/token codec (`tokenizer`)
//! - Decode batches and the KV-cache-owning `DecodingContext`
//! - The `ModelArchitecture` seam with a LLaMA implementation
//! - `ModelLoader` for turning an artifact on disk into a model

pub mod architecture;
pub mod backend;
pub mod batch;
pub mod context;
pub mod error;
pub mod gguf;
pub mod llama;
pub mod loader;
pub mod tokenizer;

pub use architecture::ModelArchitecture;
pub use batch::{Batch, BatchEntry, BatchFull};
pub use context::{CacheLayout, ContextParams, DecodingContext, KvCache};
pub use error::{ModelError, Result};
pub use loader::{GgufLoader, LoadParams, ModelLoader};
pub use tokenizer::{TokenCodec, Utf8Accumulator, Vocab};

/// Vocabulary index.
pub type TokenId = u32;
/// Position of a token in the context.
pub type Pos = usize;
/// Sequence a batch entry belongs to.
pub type SeqId = u32;
