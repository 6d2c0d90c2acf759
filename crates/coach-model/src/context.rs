use tracing::trace;

use crate::architecture::ModelArchitecture;
use crate::batch::Batch;
use crate::error::{ModelError, Result};

/// Attention key/value storage for every layer of one sequence.
///
/// Layout per layer: `[n_ctx, kv_dim]`, row `pos` holds that position.
pub struct KvCache {
    k: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
    kv_dim: usize,
    n_ctx: usize,
}

impl KvCache {
    /// Allocates the cache, reporting allocation failure instead of aborting.
    pub fn try_new(n_layers: usize, kv_dim: usize, n_ctx: usize) -> Result<Self> {
        let per_layer = kv_dim
            .checked_mul(n_ctx)
            .ok_or_else(|| ModelError::ContextCreate("kv cache size overflows".to_string()))?;
        let alloc = || -> Result<Vec<f32>> {
            let mut buf = Vec::new();
            buf.try_reserve_exact(per_layer).map_err(|e| {
                ModelError::ContextCreate(format!("cannot allocate kv cache ({} floats): {}", per_layer, e))
            })?;
            buf.resize(per_layer, 0.0);
            Ok(buf)
        };

        let mut k = Vec::with_capacity(n_layers);
        let mut v = Vec::with_capacity(n_layers);
        for _ in 0..n_layers {
            k.push(alloc()?);
            v.push(alloc()?);
        }
        Ok(KvCache { k, v, kv_dim, n_ctx })
    }

    pub fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    pub fn kv_dim(&self) -> usize {
        self.kv_dim
    }

    pub fn store(&mut self, layer: usize, pos: usize, k: &[f32], v: &[f32]) {
        let at = pos * self.kv_dim;
        self.k[layer][at..at + self.kv_dim].copy_from_slice(k);
        self.v[layer][at..at + self.kv_dim].copy_from_slice(v);
    }

    /// Keys for positions `0..len`.
    pub fn keys(&self, layer: usize, len: usize) -> &[f32] {
        &self.k[layer][..len * self.kv_dim]
    }

    /// Values for positions `0..len`.
    pub fn values(&self, layer: usize, len: usize) -> &[f32] {
        &self.v[layer][..len * self.kv_dim]
    }
}

/// Shape a model needs from its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLayout {
    pub n_layers: usize,
    pub kv_dim: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    /// Token budget: prompt plus generated tokens.
    pub n_ctx: usize,
    /// Maximum tokens per decode call.
    pub n_batch: usize,
}

impl Default for ContextParams {
    fn default() -> Self {
        ContextParams {
            n_ctx: 2048,
            n_batch: 512,
        }
    }
}

/// Per-session decoding state: the KV cache, how much of it is filled, and
/// the logits of the last decode step.
pub struct DecodingContext {
    params: ContextParams,
    cache: KvCache,
    n_past: usize,
    logits: Vec<Vec<f32>>,
}

impl DecodingContext {
    pub fn new(model: &dyn ModelArchitecture, params: ContextParams) -> Result<Self> {
        if params.n_ctx == 0 || params.n_batch == 0 {
            return Err(ModelError::ContextCreate(format!(
                "n_ctx ({}) and n_batch ({}) must be positive",
                params.n_ctx, params.n_batch
            )));
        }
        let n_ctx_train = model.n_ctx_train();
        if n_ctx_train > 0 && params.n_ctx > n_ctx_train {
            return Err(ModelError::ContextCreate(format!(
                "n_ctx {} exceeds the model's trained context of {}",
                params.n_ctx, n_ctx_train
            )));
        }

        let layout = model.cache_layout();
        let cache = KvCache::try_new(layout.n_layers, layout.kv_dim, params.n_ctx)?;
        Ok(DecodingContext {
            params: ContextParams {
                n_batch: params.n_batch.min(params.n_ctx),
                ..params
            },
            cache,
            n_past: 0,
            logits: Vec::new(),
        })
    }

    pub fn n_ctx(&self) -> usize {
        self.params.n_ctx
    }

    pub fn n_batch(&self) -> usize {
        self.params.n_batch
    }

    /// Positions already in the cache.
    pub fn n_past(&self) -> usize {
        self.n_past
    }

    /// Forgets the cached sequence; the next batch must start at position 0.
    pub fn clear(&mut self) {
        self.n_past = 0;
        self.logits.clear();
    }

    /// Runs one decode step.
    ///
    /// Positions must continue the cached sequence without gaps and stay
    /// inside the token budget; only sequence 0 is supported.
    pub fn decode(&mut self, model: &dyn ModelArchitecture, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Err(ModelError::Decode("empty batch".to_string()));
        }
        if batch.len() > self.params.n_batch {
            return Err(ModelError::Decode(format!(
                "batch of {} exceeds n_batch {}",
                batch.len(),
                self.params.n_batch
            )));
        }

        let mut expected = self.n_past;
        for entry in batch.entries() {
            if entry.seq_id != 0 {
                return Err(ModelError::Decode(format!("unsupported sequence id {}", entry.seq_id)));
            }
            if entry.pos > expected {
                return Err(ModelError::Decode(format!(
                    "position {} leaves a gap after {}",
                    entry.pos, self.n_past
                )));
            }
            if entry.pos >= self.params.n_ctx {
                return Err(ModelError::Decode(format!(
                    "position {} outside context of {}",
                    entry.pos, self.params.n_ctx
                )));
            }
            expected = expected.max(entry.pos + 1);
        }

        trace!(n_tokens = batch.len(), n_past = self.n_past, "decode");
        let logits = model.forward(batch, &mut self.cache)?;
        if logits.len() != batch.n_logits() {
            return Err(ModelError::Decode(format!(
                "model returned {} logit rows for {} requests",
                logits.len(),
                batch.n_logits()
            )));
        }

        self.n_past = expected;
        self.logits = logits;
        Ok(())
    }

    /// Logits of the last entry that requested them in the last decode.
    pub fn last_logits(&self) -> Option<&[f32]> {
        self.logits.last().map(Vec::as_slice)
    }
}
