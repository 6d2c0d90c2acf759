//! Scripted stand-ins for a real model: the "model" answers every prompt with
//! a fixed reply, one byte-level token per step, then end-of-turn.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coach_model::tokenizer::{byte_level_table, SpecialTokens, VocabKind};
use coach_model::{
    Batch, BatchEntry, CacheLayout, KvCache, LoadParams, ModelArchitecture, ModelError,
    ModelLoader, TokenCodec, Vocab,
};
use coach_session::{SamplerConfig, SeedPolicy, SessionConfig};

pub const BOS: &str = "<|begin_of_text|>";
pub const EOT: &str = "<|eot_id|>";

pub fn chat_codec() -> TokenCodec {
    let mut tokens: Vec<String> = byte_level_table().iter().map(|c| c.to_string()).collect();
    for special in [BOS, "<|start_header_id|>", "<|end_header_id|>", EOT] {
        tokens.push(special.to_string());
    }
    let special = SpecialTokens {
        bos: Some(256),
        eos: Some(259),
        eot: Some(259),
        unk: None,
        add_bos: true,
    };
    let vocab = Vocab::new(VocabKind::Bpe, tokens, vec![], vec![], vec![], special)
        .expect("chat vocabulary");
    TokenCodec::new(vocab)
}

#[derive(Clone)]
pub struct Script {
    pub reply: String,
    /// Keep cycling the reply instead of ending the turn.
    pub endless: bool,
    /// Fail any forward pass touching this position.
    pub fail_at: Option<usize>,
    /// Panic in the first forward pass touching this position.
    pub panic_once_at: Option<usize>,
    pub step_delay: Duration,
    pub n_ctx_train: usize,
}

impl Script {
    pub fn new(reply: &str) -> Self {
        Script {
            reply: reply.to_string(),
            endless: false,
            fail_at: None,
            panic_once_at: None,
            step_delay: Duration::ZERO,
            n_ctx_train: 0,
        }
    }
}

/// What the scripted model observed, shared with the test.
#[derive(Default)]
pub struct Recorder {
    pub batches: Mutex<Vec<Vec<BatchEntry>>>,
    pub loads: AtomicUsize,
    pub drops: AtomicUsize,
    pub panicked: AtomicBool,
}

impl Recorder {
    pub fn batches(&self) -> Vec<Vec<BatchEntry>> {
        self.batches.lock().unwrap().clone()
    }

    /// Single-token batches, i.e. incremental generation steps.
    pub fn steps(&self) -> usize {
        self.batches.lock().unwrap().iter().filter(|b| b.len() == 1).count()
    }
}

pub struct ScriptedModel {
    codec: TokenCodec,
    reply: Vec<u32>,
    script: Script,
    /// Position of the last prompt token of the current generation.
    prompt_end: Mutex<Option<usize>>,
    recorder: Arc<Recorder>,
}

impl ScriptedModel {
    pub fn new(script: Script, recorder: Arc<Recorder>) -> Self {
        let codec = chat_codec();
        let reply = codec.encode(&script.reply, false).expect("reply encodes");
        ScriptedModel {
            codec,
            reply,
            script,
            prompt_end: Mutex::new(None),
            recorder,
        }
    }

    fn next_token(&self, step: usize) -> u32 {
        let eot = self.codec.vocab().special.eot.unwrap();
        if self.reply.is_empty() {
            return eot;
        }
        match (self.reply.get(step), self.script.endless) {
            (Some(&t), _) => t,
            (None, true) => self.reply[step % self.reply.len()],
            (None, false) => eot,
        }
    }
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.recorder.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl ModelArchitecture for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    fn n_ctx_train(&self) -> usize {
        self.script.n_ctx_train
    }

    fn cache_layout(&self) -> CacheLayout {
        CacheLayout {
            n_layers: 0,
            kv_dim: 0,
        }
    }

    fn forward(&self, batch: &Batch, _cache: &mut KvCache) -> coach_model::Result<Vec<Vec<f32>>> {
        if !self.script.step_delay.is_zero() {
            std::thread::sleep(self.script.step_delay);
        }
        self.recorder.batches.lock().unwrap().push(batch.entries().to_vec());

        let mut prompt_end = self.prompt_end.lock().unwrap();
        if batch.entries().first().map(|e| e.pos) == Some(0) {
            *prompt_end = None;
        }

        let n_vocab = self.codec.n_vocab();
        let mut rows = Vec::new();
        for entry in batch.entries() {
            if Some(entry.pos) == self.script.panic_once_at && !self.recorder.panicked.swap(true, Ordering::SeqCst) {
                panic!("scripted panic at {}", entry.pos);
            }
            if Some(entry.pos) == self.script.fail_at {
                return Err(ModelError::Decode(format!("scripted failure at {}", entry.pos)));
            }
            if !entry.logits {
                continue;
            }
            let end = *prompt_end.get_or_insert(entry.pos);
            let target = self.next_token(entry.pos - end);
            let mut logits = vec![-10.0f32; n_vocab];
            logits[target as usize] = 100.0;
            rows.push(logits);
        }
        Ok(rows)
    }
}

pub struct ScriptedLoader {
    pub script: Script,
    pub recorder: Arc<Recorder>,
    pub fail_with: Option<String>,
    /// Panic on the first load attempt only.
    pub panic_first_load: bool,
}

impl ScriptedLoader {
    pub fn new(script: Script) -> Self {
        ScriptedLoader {
            script,
            recorder: Arc::new(Recorder::default()),
            fail_with: None,
            panic_first_load: false,
        }
    }
}

impl ModelLoader for ScriptedLoader {
    fn load(
        &self,
        _path: &Path,
        _params: &LoadParams,
        progress: &mut dyn FnMut(f32),
    ) -> coach_model::Result<Box<dyn ModelArchitecture>> {
        progress(0.5);
        if self.panic_first_load && !self.recorder.panicked.swap(true, Ordering::SeqCst) {
            panic!("scripted load panic");
        }
        if let Some(msg) = &self.fail_with {
            return Err(ModelError::Other(msg.clone()));
        }
        self.recorder.loads.fetch_add(1, Ordering::SeqCst);
        progress(1.0);
        Ok(Box::new(ScriptedModel::new(self.script.clone(), Arc::clone(&self.recorder))))
    }
}

/// Temp dir holding an (empty) artifact under the first default candidate name.
pub fn model_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("coach-model.gguf"), b"").unwrap();
    dir
}

pub fn test_config(dir: &Path) -> SessionConfig {
    SessionConfig::new(PathBuf::from(dir))
        .with_n_ctx(512)
        .with_n_batch(64)
        .with_sampler(SamplerConfig::default().with_seed(SeedPolicy::Fixed(7)))
}
