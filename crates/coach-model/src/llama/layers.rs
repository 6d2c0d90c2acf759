use super::config::LlamaConfig;
use crate::error::Result;
use crate::gguf::reader::GgufFile;

/// Weights of one transformer block, dequantized to f32, `[out, in]` row-major.
pub struct LlamaLayer {
    pub attn_norm: Vec<f32>,
    pub wq: Vec<f32>,
    pub wk: Vec<f32>,
    pub wv: Vec<f32>,
    pub wo: Vec<f32>,
    pub ffn_norm: Vec<f32>,
    pub ffn_gate: Vec<f32>,
    pub ffn_up: Vec<f32>,
    pub ffn_down: Vec<f32>,
}

pub struct LlamaWeights {
    /// `[n_vocab, n_embd]`
    pub token_embd: Vec<f32>,
    pub output_norm: Vec<f32>,
    /// LM head; tied models reuse `token_embd`.
    pub output: Vec<f32>,
    /// Per-pair RoPE frequency divisors (Llama 3.x long-context scaling).
    pub rope_freqs: Option<Vec<f32>>,
    pub layers: Vec<LlamaLayer>,
}

impl LlamaWeights {
    /// Loads tensors named `token_embd.weight`, `output_norm.weight`,
    /// `output.weight` (optional), `rope_freqs.weight` (optional) and
    /// `blk.{i}.{attn_norm,attn_q,attn_k,attn_v,attn_output,ffn_norm,ffn_gate,ffn_up,ffn_down}.weight`.
    ///
    /// `on_layer` is called after each block so callers can report progress.
    pub fn from_gguf(
        gguf: &GgufFile,
        config: &LlamaConfig,
        mut on_layer: impl FnMut(usize),
    ) -> Result<LlamaWeights> {
        let (n_embd, n_ff, n_vocab) = (config.n_embd, config.n_ff, config.n_vocab);
        let q_dim = config.n_heads * config.head_dim;
        let kv_dim = config.kv_dim();

        let token_embd = gguf.tensor_f32_shaped("token_embd.weight", &[n_vocab, n_embd])?;
        let output_norm = gguf.tensor_f32_shaped("output_norm.weight", &[n_embd])?;
        let output = if gguf.tensor_info("output.weight").is_some() {
            gguf.tensor_f32_shaped("output.weight", &[n_vocab, n_embd])?
        } else {
            token_embd.clone()
        };
        let rope_freqs = if gguf.tensor_info("rope_freqs.weight").is_some() {
            Some(gguf.tensor_f32_shaped("rope_freqs.weight", &[config.head_dim / 2])?)
        } else {
            None
        };

        let mut layers = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            let t = |name: &str, shape: &[usize]| gguf.tensor_f32_shaped(&format!("blk.{}.{}.weight", i, name), shape);
            layers.push(LlamaLayer {
                attn_norm: t("attn_norm", &[n_embd])?,
                wq: t("attn_q", &[q_dim, n_embd])?,
                wk: t("attn_k", &[kv_dim, n_embd])?,
                wv: t("attn_v", &[kv_dim, n_embd])?,
                wo: t("attn_output", &[n_embd, q_dim])?,
                ffn_norm: t("ffn_norm", &[n_embd])?,
                ffn_gate: t("ffn_gate", &[n_ff, n_embd])?,
                ffn_up: t("ffn_up", &[n_ff, n_embd])?,
                ffn_down: t("ffn_down", &[n_embd, n_ff])?,
            });
            on_layer(i);
        }

        Ok(LlamaWeights {
            token_embd,
            output_norm,
            output,
            rope_freqs,
            layers,
        })
    }
}
