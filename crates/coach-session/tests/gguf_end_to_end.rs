//! Full path through the real loader: synthetic GGUF on disk, LLaMA forward
//! pass, sampling and detokenization.

use std::path::Path;

use coach_model::gguf::GgufWriter;
use coach_model::tokenizer::byte_level_table;
use coach_session::{
    CancellationToken, ModelSession, PromptBuilder, SamplerConfig, SeedPolicy, SessionConfig,
    SessionState,
};

const N_EMBD: usize = 16;
const N_FF: usize = 32;
const N_CTX_TRAIN: u32 = 256;

fn values(n: usize, seed: f32) -> Vec<f32> {
    (0..n).map(|i| ((i as f32 * 0.73 + seed) * 1.31).sin() * 0.3).collect()
}

fn write_model(path: &Path) {
    let mut tokens: Vec<String> = byte_level_table().iter().map(|c| c.to_string()).collect();
    for s in PromptBuilder::MARKERS {
        tokens.push(s.to_string());
    }
    let n_vocab = tokens.len();
    let bos = n_vocab - 4;
    let eot = n_vocab - 1;

    let mut w = GgufWriter::new();
    w.add_string("general.architecture", "llama")
        .add_u32("llama.embedding_length", N_EMBD as u32)
        .add_u32("llama.attention.head_count", 4)
        .add_u32("llama.attention.head_count_kv", 2)
        .add_u32("llama.block_count", 2)
        .add_u32("llama.feed_forward_length", N_FF as u32)
        .add_u32("llama.context_length", N_CTX_TRAIN)
        .add_string("tokenizer.ggml.model", "gpt2")
        .add_string_array("tokenizer.ggml.tokens", &tokens)
        .add_u32("tokenizer.ggml.bos_token_id", bos as u32)
        .add_u32("tokenizer.ggml.eos_token_id", eot as u32)
        .add_u32("tokenizer.ggml.eot_token_id", eot as u32);

    let kv_dim = N_EMBD / 4 * 2;
    let mut seed = 0.0;
    let mut f32_tensor = |w: &mut GgufWriter, name: &str, shape: &[usize]| {
        seed += 1.0;
        let n = shape.iter().product();
        w.add_f32_tensor(name, shape, &values(n, seed)).unwrap();
    };
    f32_tensor(&mut w, "token_embd.weight", &[n_vocab, N_EMBD]);
    f32_tensor(&mut w, "output_norm.weight", &[N_EMBD]);
    for l in 0..2 {
        let name = |t: &str| format!("blk.{l}.{t}.weight");
        f32_tensor(&mut w, &name("attn_norm"), &[N_EMBD]);
        f32_tensor(&mut w, &name("attn_q"), &[N_EMBD, N_EMBD]);
        f32_tensor(&mut w, &name("attn_k"), &[kv_dim, N_EMBD]);
        f32_tensor(&mut w, &name("attn_v"), &[kv_dim, N_EMBD]);
        f32_tensor(&mut w, &name("attn_output"), &[N_EMBD, N_EMBD]);
        f32_tensor(&mut w, &name("ffn_norm"), &[N_EMBD]);
        f32_tensor(&mut w, &name("ffn_up"), &[N_FF, N_EMBD]);
        f32_tensor(&mut w, &name("ffn_down"), &[N_EMBD, N_FF]);
        w.add_q8_0_tensor(&name("ffn_gate"), &[N_FF, N_EMBD], &values(N_FF * N_EMBD, 100.0 + l as f32))
            .unwrap();
    }
    w.write_to(path).unwrap();
}

#[test]
fn test_synthetic_model_generates() {
    let dir = tempfile::tempdir().unwrap();
    write_model(&dir.path().join("coach-model.gguf"));

    let config = SessionConfig::new(dir.path())
        .with_n_ctx(256)
        .with_n_batch(32)
        .with_max_new_tokens(12)
        .with_sampler(SamplerConfig::default().with_seed(SeedPolicy::Fixed(2024)));
    let mut session = ModelSession::new(config);

    let mut last = 0.0f32;
    session
        .load_if_needed(&mut |p, _| {
            assert!(p >= last);
            last = p;
        })
        .unwrap();
    assert_eq!(last, 1.0);
    assert_eq!(session.state(), SessionState::Ready);

    let prompt = PromptBuilder::build("Coach", "Steps: 8547 (goal 10000)", "How's my activity?");
    let first = session.generate(&prompt, &CancellationToken::new()).unwrap();
    assert!(first.prompt_tokens > 32, "prompt should span several chunks");
    assert!(first.generated_tokens <= 12);
    assert!(!PromptBuilder::contains_marker(&first.text));

    // Fresh context and rewound sampler: the same prompt gives the same reply.
    let second = session.generate(&prompt, &CancellationToken::new()).unwrap();
    assert_eq!(first.text, second.text);
    assert_eq!(first.generated_tokens, second.generated_tokens);
    assert_eq!(first.finish, second.finish);
}
