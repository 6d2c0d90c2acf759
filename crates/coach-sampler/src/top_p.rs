use crate::sampler::{softmax, sort_descending, Sampler, TokenLogit};

/// Nucleus filter: keeps the smallest prefix of candidates (by descending
/// logit) whose cumulative probability reaches `p`. At least one survives.
pub struct TopPSampler {
    p: f32,
}

impl TopPSampler {
    pub fn new(p: f32) -> Self {
        Self { p }
    }
}

impl Sampler for TopPSampler {
    fn name(&self) -> &str {
        "top_p"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() || self.p >= 1.0 {
            return;
        }

        sort_descending(logits);
        let probs = softmax(logits);

        let mut cumulative = 0.0f32;
        let mut cutoff = logits.len();
        for (i, &prob) in probs.iter().enumerate() {
            cumulative += prob;
            if cumulative >= self.p {
                cutoff = i + 1;
                break;
            }
        }

        logits.truncate(cutoff.max(1));
    }
}
