/// Where the draw stage gets its randomness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedPolicy {
    /// Seeded once from OS entropy when the chain is built.
    #[default]
    Entropy,
    /// Fixed seed; every reset rewinds the generator to it.
    Fixed(u64),
}

/// Parameters for [`SamplerChain::from_config`](crate::SamplerChain::from_config).
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Candidates kept by top-k; 0 disables the stage.
    pub top_k: usize,
    /// Nucleus mass kept by top-p.
    pub top_p: f32,
    /// Logit divisor. Zero or below means greedy selection.
    pub temperature: f32,
    /// 1.0 leaves logits untouched.
    pub repeat_penalty: f32,
    /// Accepted tokens remembered by the repetition penalty.
    pub repeat_last_n: usize,
    pub seed: SeedPolicy,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.9,
            temperature: 0.7,
            repeat_penalty: 1.0,
            repeat_last_n: 64,
            seed: SeedPolicy::Entropy,
        }
    }
}

impl SamplerConfig {
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = p;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_repeat_penalty(mut self, penalty: f32, last_n: usize) -> Self {
        self.repeat_penalty = penalty;
        self.repeat_last_n = last_n;
        self
    }

    pub fn with_seed(mut self, seed: SeedPolicy) -> Self {
        self.seed = seed;
        self
    }
}
