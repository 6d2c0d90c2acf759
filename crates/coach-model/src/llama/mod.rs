pub mod config;
pub mod layers;

pub use config::LlamaConfig;
pub use layers::{LlamaLayer, LlamaWeights};

use crate::architecture::ModelArchitecture;
use crate::backend::LayerPlacement;
use crate::batch::Batch;
use crate::context::{CacheLayout, KvCache};
use crate::error::{ModelError, Result};
use crate::gguf::reader::GgufFile;
use crate::tokenizer::{TokenCodec, Vocab};

/// A LLaMA-family transformer with f32 weights.
pub struct LlamaModel {
    pub config: LlamaConfig,
    pub weights: LlamaWeights,
    codec: TokenCodec,
    placement: LayerPlacement,
}

impl LlamaModel {
    /// Builds the model from a parsed GGUF file. `on_layer(done, total)` is
    /// reported after each block is dequantized.
    pub fn from_gguf(
        gguf: &GgufFile,
        placement: LayerPlacement,
        mut on_layer: impl FnMut(usize, usize),
    ) -> Result<LlamaModel> {
        let config = LlamaConfig::from_gguf(&gguf.metadata)?;
        let vocab = Vocab::from_gguf(&gguf.metadata)?;
        if vocab.len() != config.n_vocab {
            return Err(ModelError::Tokenizer(format!(
                "vocabulary has {} tokens but the model expects {}",
                vocab.len(),
                config.n_vocab
            )));
        }

        let total = config.n_layers;
        let weights = LlamaWeights::from_gguf(gguf, &config, |i| on_layer(i + 1, total))?;

        tracing::info!(
            n_layers = config.n_layers,
            n_embd = config.n_embd,
            n_vocab = config.n_vocab,
            offloaded = placement.offloaded_layers(config.n_layers),
            "llama model loaded"
        );

        Ok(LlamaModel {
            config,
            weights,
            codec: TokenCodec::new(vocab),
            placement,
        })
    }

    /// Hidden state for one token at `pos`, through every block.
    fn forward_token(&self, token: u32, pos: usize, cache: &mut KvCache) -> Result<Vec<f32>> {
        let cfg = &self.config;
        let (n_embd, head_dim) = (cfg.n_embd, cfg.head_dim);
        let q_dim = cfg.n_heads * head_dim;
        let kv_dim = cfg.kv_dim();
        let heads_per_kv = cfg.n_heads / cfg.n_kv_heads;
        let scale = 1.0 / (head_dim as f32).sqrt();
        let freqs = self.weights.rope_freqs.as_deref();

        if token as usize >= cfg.n_vocab {
            return Err(ModelError::Decode(format!(
                "token id {} exceeds vocab size {}",
                token, cfg.n_vocab
            )));
        }
        let row = token as usize * n_embd;
        let mut hidden = self.weights.token_embd[row..row + n_embd].to_vec();

        for (l, layer) in self.weights.layers.iter().enumerate() {
            let be = self.placement.for_layer(l);

            let normed = be.rms_norm(&hidden, &layer.attn_norm, cfg.norm_eps)?;
            let mut q = be.matvec(&layer.wq, &normed, q_dim, n_embd)?;
            let mut k = be.matvec(&layer.wk, &normed, kv_dim, n_embd)?;
            let v = be.matvec(&layer.wv, &normed, kv_dim, n_embd)?;
            be.rope(&mut q, cfg.n_heads, head_dim, pos, cfg.rope_theta, freqs)?;
            be.rope(&mut k, cfg.n_kv_heads, head_dim, pos, cfg.rope_theta, freqs)?;

            cache.store(l, pos, &k, &v);
            let seq_len = pos + 1;
            let keys = cache.keys(l, seq_len);
            let values = cache.values(l, seq_len);

            // Causal by construction: the cache holds positions 0..=pos only.
            let mut attn = vec![0.0f32; q_dim];
            for h in 0..cfg.n_heads {
                let kv_off = (h / heads_per_kv) * head_dim;
                let qh = &q[h * head_dim..(h + 1) * head_dim];

                let mut scores: Vec<f32> = (0..seq_len)
                    .map(|s| {
                        let kh = &keys[s * kv_dim + kv_off..s * kv_dim + kv_off + head_dim];
                        qh.iter().zip(kh).map(|(a, b)| a * b).sum::<f32>() * scale
                    })
                    .collect();
                softmax_in_place(&mut scores);

                let out = &mut attn[h * head_dim..(h + 1) * head_dim];
                for (s, &p) in scores.iter().enumerate() {
                    let vh = &values[s * kv_dim + kv_off..s * kv_dim + kv_off + head_dim];
                    for (o, &x) in out.iter_mut().zip(vh) {
                        *o += p * x;
                    }
                }
            }

            let attn_out = be.matvec(&layer.wo, &attn, n_embd, q_dim)?;
            add_in_place(&mut hidden, &attn_out);

            let normed = be.rms_norm(&hidden, &layer.ffn_norm, cfg.norm_eps)?;
            let gate = be.matvec(&layer.ffn_gate, &normed, cfg.n_ff, n_embd)?;
            let up = be.matvec(&layer.ffn_up, &normed, cfg.n_ff, n_embd)?;
            let act = be.silu_mul(&gate, &up)?;
            let ffn_out = be.matvec(&layer.ffn_down, &act, n_embd, cfg.n_ff)?;
            add_in_place(&mut hidden, &ffn_out);
        }

        Ok(hidden)
    }
}

fn add_in_place(acc: &mut [f32], x: &[f32]) {
    for (a, b) in acc.iter_mut().zip(x) {
        *a += b;
    }
}

fn softmax_in_place(x: &mut [f32]) {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in x.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in x.iter_mut() {
        *v /= sum;
    }
}

impl ModelArchitecture for LlamaModel {
    fn name(&self) -> &str {
        "llama"
    }

    fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    fn n_ctx_train(&self) -> usize {
        self.config.n_ctx_train
    }

    fn cache_layout(&self) -> CacheLayout {
        CacheLayout {
            n_layers: self.config.n_layers,
            kv_dim: self.config.kv_dim(),
        }
    }

    fn forward(&self, batch: &Batch, cache: &mut KvCache) -> Result<Vec<Vec<f32>>> {
        let host = self.placement.host();
        let mut rows = Vec::with_capacity(batch.n_logits());

        for entry in batch.entries() {
            let hidden = self.forward_token(entry.token, entry.pos, cache)?;
            if entry.logits {
                let normed = host.rms_norm(&hidden, &self.weights.output_norm, self.config.norm_eps)?;
                rows.push(host.matvec(&self.weights.output, &normed, self.config.n_vocab, self.config.n_embd)?);
            }
        }
        Ok(rows)
    }
}
