use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use coach_sampler::{SamplerConfig, SeedPolicy};
use tracing::warn;

/// Artifact base names tried in order inside the model directory.
pub const DEFAULT_MODEL_CANDIDATES: [&str; 4] = [
    "coach-model",
    "Llama-3.2-1B-Instruct-Q4_K_M",
    "llama-3.2-1b-instruct-q4_k_m",
    "model",
];

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly, encouraging wellness coach. \
Use the user's health data below to give short, specific and practical advice. \
Do not give medical diagnoses.";

/// Everything a [`ModelSession`](crate::ModelSession) needs to load and generate.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub model_dir: PathBuf,
    /// Base names, without the `.gguf` extension.
    pub model_candidates: Vec<String>,
    /// Token budget shared by prompt and reply.
    pub n_ctx: usize,
    /// Upper bound on tokens per decode call.
    pub n_batch: usize,
    /// Layers to offload when an accelerator is available.
    pub gpu_layers: usize,
    pub max_new_tokens: usize,
    /// Soft ceiling; generation stops with partial text once exceeded.
    pub generation_timeout: Duration,
    pub system_instruction: String,
    pub sampler: SamplerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            model_candidates: DEFAULT_MODEL_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            n_ctx: 2048,
            n_batch: 512,
            gpu_layers: 99,
            max_new_tokens: 256,
            generation_timeout: Duration::from_secs(20),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            sampler: SamplerConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            ..Default::default()
        }
    }

    /// Defaults overlaid with `COACH_MODEL_DIR`, `COACH_N_CTX`,
    /// `COACH_MAX_NEW_TOKENS` and `COACH_SEED`. Unparsable values are logged
    /// and ignored.
    pub fn from_env() -> Self {
        Self::default().overlay_env(|key| env::var(key).ok())
    }

    fn overlay_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("COACH_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(n) = parse_var(&lookup, "COACH_N_CTX") {
            self.n_ctx = n;
        }
        if let Some(n) = parse_var(&lookup, "COACH_MAX_NEW_TOKENS") {
            self.max_new_tokens = n;
        }
        if let Some(seed) = parse_var(&lookup, "COACH_SEED") {
            self.sampler.seed = SeedPolicy::Fixed(seed);
        }
        self
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    pub fn with_model_candidates<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.model_candidates = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_n_ctx(mut self, n_ctx: usize) -> Self {
        self.n_ctx = n_ctx;
        self
    }

    pub fn with_n_batch(mut self, n_batch: usize) -> Self {
        self.n_batch = n_batch;
        self
    }

    pub fn with_gpu_layers(mut self, layers: usize) -> Self {
        self.gpu_layers = layers;
        self
    }

    pub fn with_max_new_tokens(mut self, n: usize) -> Self {
        self.max_new_tokens = n;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }

    /// `<model_dir>/<candidate>.gguf` for every candidate, in search order.
    pub fn candidate_paths(&self) -> Vec<PathBuf> {
        candidate_paths(&self.model_dir, &self.model_candidates)
    }
}

fn candidate_paths(dir: &Path, names: &[String]) -> Vec<PathBuf> {
    names.iter().map(|n| dir.join(format!("{n}.gguf"))).collect()
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
