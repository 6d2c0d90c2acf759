use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;

/// LLaMA hyperparameters from `{arch}.*` metadata keys.
#[derive(Debug, Clone)]
pub struct LlamaConfig {
    pub n_vocab: usize,
    pub n_embd: usize,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub n_layers: usize,
    pub n_ff: usize,
    pub norm_eps: f32,
    pub n_ctx_train: usize,
    pub rope_theta: f32,
    pub head_dim: usize,
}

impl LlamaConfig {
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<LlamaConfig> {
        let arch = metadata.get_string("general.architecture").unwrap_or("llama");
        if arch != "llama" {
            return Err(ModelError::UnsupportedArchitecture(arch.to_string()));
        }

        let n_embd = metadata.get_usize("llama.embedding_length")?;
        let n_heads = metadata.get_usize("llama.attention.head_count")?;
        // Absent means plain multi-head attention.
        let n_kv_heads = metadata
            .get_usize("llama.attention.head_count_kv")
            .unwrap_or(n_heads);
        let n_layers = metadata.get_usize("llama.block_count")?;
        let n_ff = metadata.get_usize("llama.feed_forward_length")?;
        let norm_eps = metadata
            .get_f32("llama.attention.layer_norm_rms_epsilon")
            .unwrap_or(1e-5);
        let n_ctx_train = metadata.get_usize("llama.context_length").unwrap_or(0);
        let rope_theta = metadata.get_f32("llama.rope.freq_base").unwrap_or(10000.0);
        let n_vocab = match metadata.get_usize("llama.vocab_size") {
            Ok(n) => n,
            Err(_) => metadata.array_len("tokenizer.ggml.tokens")?,
        };

        if n_heads == 0 || n_kv_heads == 0 || n_embd % n_heads != 0 || n_heads % n_kv_heads != 0 {
            return Err(ModelError::Other(format!(
                "inconsistent attention shape: n_embd={} n_heads={} n_kv_heads={}",
                n_embd, n_heads, n_kv_heads
            )));
        }

        Ok(LlamaConfig {
            n_vocab,
            n_embd,
            n_heads,
            n_kv_heads,
            n_layers,
            n_ff,
            norm_eps,
            n_ctx_train,
            rope_theta,
            head_dim: n_embd / n_heads,
        })
    }

    pub fn kv_dim(&self) -> usize {
        self.n_kv_heads * self.head_dim
    }
}
