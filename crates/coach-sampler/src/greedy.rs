use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::SeedPolicy;
use crate::sampler::{softmax, Sampler, TokenLogit};

/// Selects the single highest-logit candidate.
pub struct GreedySampler;

impl GreedySampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GreedySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for GreedySampler {
    fn name(&self) -> &str {
        "greedy"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        // First maximum wins ties, matching a stable descending sort.
        let best = logits
            .iter()
            .enumerate()
            .fold(None::<(usize, f32)>, |best, (i, t)| match best {
                Some((_, b)) if b >= t.logit => best,
                _ => Some((i, t.logit)),
            });
        if let Some((i, _)) = best {
            let selected = logits.swap_remove(i);
            logits.clear();
            logits.push(selected);
        }
    }
}

/// Draws one candidate from the softmax distribution with a persistent RNG.
///
/// The generator advances across calls; with [`SeedPolicy::Fixed`] a reset
/// rewinds it so the same logits yield the same draws.
pub struct DistSampler {
    seed: Option<u64>,
    rng: StdRng,
}

impl DistSampler {
    pub fn new(policy: SeedPolicy) -> Self {
        match policy {
            SeedPolicy::Fixed(seed) => Self {
                seed: Some(seed),
                rng: StdRng::seed_from_u64(seed),
            },
            SeedPolicy::Entropy => Self {
                seed: None,
                rng: StdRng::from_entropy(),
            },
        }
    }
}

impl Sampler for DistSampler {
    fn name(&self) -> &str {
        "dist"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }

        let probs = softmax(logits);
        let index = match WeightedIndex::new(&probs) {
            Ok(dist) => dist.sample(&mut self.rng),
            // All weights zero or non-finite: fall back to the argmax.
            Err(_) => {
                GreedySampler.apply(logits);
                return;
            }
        };

        let selected = logits.swap_remove(index);
        logits.clear();
        logits.push(selected);
    }

    fn reset(&mut self) {
        if let Some(seed) = self.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
    }
}
