use std::cmp::Ordering;

use crate::config::SamplerConfig;
use crate::greedy::{DistSampler, GreedySampler};
use crate::repetition::RepetitionPenaltySampler;
use crate::temperature::TemperatureSampler;
use crate::top_k::TopKSampler;
use crate::top_p::TopPSampler;

/// A token ID paired with its logit value.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenLogit {
    pub token_id: u32,
    pub logit: f32,
}

/// One stage of a sampling pipeline.
///
/// Stages filter or rescale the candidate list in place. The final stage of a
/// chain is a selector that leaves exactly one candidate.
pub trait Sampler: Send {
    fn name(&self) -> &str;

    fn apply(&mut self, logits: &mut Vec<TokenLogit>);

    /// Called with every token the chain hands out.
    fn accept(&mut self, _token: u32) {}

    /// Return to the state right after construction.
    fn reset(&mut self) {}
}

/// Descending by logit; NaN compares equal so sorting never panics.
pub(crate) fn sort_descending(logits: &mut [TokenLogit]) {
    logits.sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(Ordering::Equal));
}

/// Softmax over the candidates' logits, in candidate order.
pub(crate) fn softmax(logits: &[TokenLogit]) -> Vec<f32> {
    let max_logit = logits
        .iter()
        .map(|t| t.logit)
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|t| (t.logit - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// Ordered pipeline of samplers.
pub struct SamplerChain {
    samplers: Vec<Box<dyn Sampler>>,
}

impl SamplerChain {
    pub fn new() -> Self {
        Self {
            samplers: Vec::new(),
        }
    }

    /// Builds the coaching pipeline: optional repetition penalty, top-k,
    /// top-p, then temperature with a seeded draw. A temperature of zero or
    /// below selects greedily instead.
    pub fn from_config(config: &SamplerConfig) -> Self {
        let mut chain = SamplerChain::new();
        if config.repeat_penalty != 1.0 && config.repeat_last_n > 0 {
            chain = chain.with(Box::new(RepetitionPenaltySampler::new(
                config.repeat_penalty,
                config.repeat_last_n,
            )));
        }
        chain = chain
            .with(Box::new(TopKSampler::new(config.top_k)))
            .with(Box::new(TopPSampler::new(config.top_p)));

        if config.temperature <= 0.0 {
            chain.with(Box::new(GreedySampler::new()))
        } else {
            chain
                .with(Box::new(TemperatureSampler::new(config.temperature)))
                .with(Box::new(DistSampler::new(config.seed)))
        }
    }

    /// Appends a stage.
    pub fn with(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.samplers.push(sampler);
        self
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }

    /// Stage names in pipeline order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.samplers.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage over `logits` (indexed by token id) and returns the
    /// first surviving candidate. Token 0 when nothing survives.
    pub fn sample(&mut self, logits: &[f32]) -> u32 {
        let mut token_logits: Vec<TokenLogit> = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit {
                token_id: i as u32,
                logit,
            })
            .collect();

        for sampler in &mut self.samplers {
            sampler.apply(&mut token_logits);
        }

        token_logits.first().map(|t| t.token_id).unwrap_or(0)
    }

    /// Records a token that was actually emitted.
    pub fn accept(&mut self, token: u32) {
        for sampler in &mut self.samplers {
            sampler.accept(token);
        }
    }

    /// Clears per-generation state in every stage.
    pub fn reset(&mut self) {
        for sampler in &mut self.samplers {
            sampler.reset();
        }
    }
}

impl Default for SamplerChain {
    fn default() -> Self {
        Self::new()
    }
}
