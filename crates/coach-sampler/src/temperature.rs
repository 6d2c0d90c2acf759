use crate::sampler::{Sampler, TokenLogit};

/// Divides every logit by the temperature. Values at or below zero are
/// clamped to a tiny positive divisor, which is effectively greedy.
pub struct TemperatureSampler {
    temperature: f32,
}

impl TemperatureSampler {
    pub fn new(temperature: f32) -> Self {
        Self { temperature }
    }
}

impl Sampler for TemperatureSampler {
    fn name(&self) -> &str {
        "temperature"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        let temp = self.temperature.max(1e-7);
        for token in logits.iter_mut() {
            token.logit /= temp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scales_logits() {
        let mut logits = vec![
            TokenLogit { token_id: 0, logit: 1.4 },
            TokenLogit { token_id: 1, logit: -0.7 },
        ];
        TemperatureSampler::new(0.7).apply(&mut logits);
        assert_relative_eq!(logits[0].logit, 2.0, epsilon = 1e-5);
        assert_relative_eq!(logits[1].logit, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_non_positive_is_clamped() {
        let mut logits = vec![TokenLogit { token_id: 0, logit: 1.0 }];
        TemperatureSampler::new(0.0).apply(&mut logits);
        assert!(logits[0].logit.is_finite());
        assert!(logits[0].logit > 1e6);
    }
}
