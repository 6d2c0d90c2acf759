use std::collections::VecDeque;

use crate::sampler::{Sampler, TokenLogit};

/// Penalizes candidates that were accepted recently: positive logits are
/// divided by `penalty`, negative ones multiplied.
pub struct RepetitionPenaltySampler {
    penalty: f32,
    recent_tokens: VecDeque<u32>,
    max_history: usize,
}

impl RepetitionPenaltySampler {
    pub fn new(penalty: f32, max_history: usize) -> Self {
        Self {
            penalty,
            recent_tokens: VecDeque::with_capacity(max_history),
            max_history,
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &u32> {
        self.recent_tokens.iter()
    }
}

impl Sampler for RepetitionPenaltySampler {
    fn name(&self) -> &str {
        "repetition_penalty"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if self.recent_tokens.is_empty() {
            return;
        }
        for token in logits.iter_mut() {
            if self.recent_tokens.contains(&token.token_id) {
                if token.logit > 0.0 {
                    token.logit /= self.penalty;
                } else {
                    token.logit *= self.penalty;
                }
            }
        }
    }

    fn accept(&mut self, token: u32) {
        if self.max_history == 0 {
            return;
        }
        if self.recent_tokens.len() == self.max_history {
            self.recent_tokens.pop_front();
        }
        self.recent_tokens.push_back(token);
    }

    fn reset(&mut self) {
        self.recent_tokens.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_penalizes_recent_tokens() {
        let mut rep = RepetitionPenaltySampler::new(2.0, 4);
        rep.accept(0);
        rep.accept(2);
        let mut logits = vec![
            TokenLogit { token_id: 0, logit: 3.0 },
            TokenLogit { token_id: 1, logit: 3.0 },
            TokenLogit { token_id: 2, logit: -1.0 },
        ];
        rep.apply(&mut logits);
        assert_relative_eq!(logits[0].logit, 1.5);
        assert_relative_eq!(logits[1].logit, 3.0);
        assert_relative_eq!(logits[2].logit, -2.0);
    }

    #[test]
    fn test_window_is_bounded_and_reset_clears() {
        let mut rep = RepetitionPenaltySampler::new(1.5, 2);
        for t in [1, 2, 3] {
            rep.accept(t);
        }
        assert_eq!(rep.history().copied().collect::<Vec<_>>(), vec![2, 3]);
        rep.reset();
        assert_eq!(rep.history().count(), 0);
    }
}
