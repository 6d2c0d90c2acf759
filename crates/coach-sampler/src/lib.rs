//! Token sampling for the coach runtime.
//!
//! A [`SamplerChain`] runs logits through an ordered list of [`Sampler`]
//! stages and returns the selected token. [`SamplerConfig`] describes the
//! default coaching pipeline: top-k, top-p, temperature, then a seeded draw.

pub mod config;
pub mod greedy;
pub mod repetition;
pub mod sampler;
pub mod temperature;
pub mod top_k;
pub mod top_p;

pub use config::{SamplerConfig, SeedPolicy};
pub use greedy::{DistSampler, GreedySampler};
pub use repetition::RepetitionPenaltySampler;
pub use sampler::{Sampler, SamplerChain, TokenLogit};
pub use temperature::TemperatureSampler;
pub use top_k::TopKSampler;
pub use top_p::TopPSampler;
