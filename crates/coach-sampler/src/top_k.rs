use crate::sampler::{sort_descending, Sampler, TokenLogit};

/// Keeps the `k` highest-logit candidates, sorted descending. `k == 0`
/// disables the stage.
pub struct TopKSampler {
    k: usize,
}

impl TopKSampler {
    pub fn new(k: usize) -> Self {
        Self { k }
    }
}

impl Sampler for TopKSampler {
    fn name(&self) -> &str {
        "top_k"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if self.k == 0 || self.k >= logits.len() {
            return;
        }

        // Partition first so only the survivors get sorted.
        logits.select_nth_unstable_by(self.k - 1, |a, b| {
            b.logit
                .partial_cmp(&a.logit)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        logits.truncate(self.k);
        sort_descending(logits);
    }
}
