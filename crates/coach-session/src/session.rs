use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use coach_model::{
    Batch, ContextParams, DecodingContext, GgufLoader, LoadParams, ModelArchitecture, ModelLoader,
    Utf8Accumulator,
};
use coach_sampler::SamplerChain;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::{InferenceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Loading,
    Ready,
    Generating,
    /// The last load failed; the next `load_if_needed` retries.
    Error,
}

/// Why the sampling loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum FinishReason {
    EndOfGeneration,
    MaxTokens,
    TimedOut,
    /// The loop hit an error after the reply started: a failed decode step,
    /// or `ContextOverflow` when the next position would exceed the budget.
    Aborted(InferenceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Trimmed reply text.
    pub text: String,
    pub finish: FinishReason,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub elapsed: Duration,
}

impl Generation {
    /// Anything but a natural end of generation.
    pub fn is_partial(&self) -> bool {
        self.finish != FinishReason::EndOfGeneration
    }
}

/// Resources created together by a successful load.
///
/// Field order is drop order: sampler, then context, then model.
struct LoadedModel {
    sampler: SamplerChain,
    context: DecodingContext,
    model: Box<dyn ModelArchitecture>,
    path: PathBuf,
}

/// Single-consumer inference session: one model, one decoding context, one
/// sampler, driven through `Unloaded -> Loading -> Ready -> Generating`.
pub struct ModelSession {
    config: SessionConfig,
    loader: Arc<dyn ModelLoader>,
    state: SessionState,
    loaded: Option<LoadedModel>,
}

impl ModelSession {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_loader(config, Arc::new(GgufLoader))
    }

    pub fn with_loader(config: SessionConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            config,
            loader,
            state: SessionState::Unloaded,
            loaded: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.loaded.as_ref().map(|l| l.path.as_path())
    }

    pub fn n_ctx(&self) -> Option<usize> {
        self.loaded.as_ref().map(|l| l.context.n_ctx())
    }

    /// Locates the artifact, loads it, and creates the context and sampler.
    /// Does nothing when already loaded.
    ///
    /// `progress(fraction, status)` is called with non-decreasing fractions.
    pub fn load_if_needed(&mut self, progress: &mut dyn FnMut(f32, &str)) -> Result<()> {
        if self.loaded.is_some() {
            return Ok(());
        }

        self.state = SessionState::Loading;
        progress(0.0, "Locating model");
        match self.load(progress) {
            Ok(loaded) => {
                info!(path = %loaded.path.display(), n_ctx = loaded.context.n_ctx(), "model ready");
                self.loaded = Some(loaded);
                self.state = SessionState::Ready;
                progress(1.0, "Ready");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "model load failed");
                self.state = SessionState::Error;
                Err(e)
            }
        }
    }

    fn load(&self, progress: &mut dyn FnMut(f32, &str)) -> Result<LoadedModel> {
        let candidates = self.config.candidate_paths();
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| InferenceError::ModelNotFound {
                searched: candidates.clone(),
            })?;
        info!(path = %path.display(), "model artifact found");
        progress(0.2, "Loading model");

        let params = LoadParams {
            gpu_layers: self.config.gpu_layers,
        };
        let mut last = 0.2f32;
        let model = self
            .loader
            .load(&path, &params, &mut |p| {
                let scaled = (0.2 + 0.5 * p.clamp(0.0, 1.0)).min(0.7).max(last);
                last = scaled;
                progress(scaled, "Loading model");
            })
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;
        progress(0.7, "Creating context");

        let context = DecodingContext::new(
            &*model,
            ContextParams {
                n_ctx: self.config.n_ctx,
                n_batch: self.config.n_batch,
            },
        )
        .map_err(|e| InferenceError::ContextCreate(e.to_string()))?;

        Ok(LoadedModel {
            sampler: SamplerChain::from_config(&self.config.sampler),
            context,
            model,
            path,
        })
    }

    /// Runs one prompt to completion on a fresh context.
    ///
    /// Errors before the first sampled token (encoding, overflow, prompt
    /// decode, cancellation) return `Err`. Failures once the reply has started
    /// return the partial text with the matching [`FinishReason`].
    pub fn generate(&mut self, prompt: &str, cancel: &CancellationToken) -> Result<Generation> {
        let loaded = self.loaded.as_mut().ok_or(InferenceError::NotLoaded)?;

        self.state = SessionState::Generating;
        let result = run_generation(loaded, &self.config, prompt, cancel);
        self.state = SessionState::Ready;

        match &result {
            Ok(g) => debug!(
                prompt_tokens = g.prompt_tokens,
                generated_tokens = g.generated_tokens,
                elapsed_ms = g.elapsed.as_millis() as u64,
                finish = ?g.finish,
                "generation finished"
            ),
            Err(InferenceError::Cancelled) => debug!("generation cancelled"),
            Err(e) => warn!(error = %e, "generation failed"),
        }
        result
    }

    /// Releases sampler, context and model. Safe to call in any state.
    pub fn unload(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            info!(path = %loaded.path.display(), "unloading model");
            drop(loaded);
        }
        self.state = SessionState::Unloaded;
    }
}

fn run_generation(
    loaded: &mut LoadedModel,
    config: &SessionConfig,
    prompt: &str,
    cancel: &CancellationToken,
) -> Result<Generation> {
    let start = Instant::now();
    let LoadedModel {
        sampler,
        context,
        model,
        ..
    } = loaded;
    let model: &dyn ModelArchitecture = &**model;
    let codec = model.codec();

    sampler.reset();
    context.clear();

    // The template already spells out BOS; only add it when missing.
    let mut tokens = codec
        .encode(prompt, false)
        .map_err(|e| InferenceError::Encoding(e.to_string()))?;
    let special = &codec.vocab().special;
    if let (true, Some(bos)) = (special.add_bos, special.bos) {
        if tokens.first() != Some(&bos) {
            tokens.insert(0, bos);
        }
    }
    if tokens.is_empty() {
        return Err(InferenceError::Encoding("prompt produced no tokens".to_string()));
    }
    let n_ctx = context.n_ctx();
    if tokens.len() > n_ctx {
        return Err(InferenceError::ContextOverflow {
            needed: tokens.len(),
            budget: n_ctx,
        });
    }

    // Prompt: chunks of at most n_batch, logits only for the final token.
    let n_batch = context.n_batch();
    let mut batch = Batch::new(n_batch);
    for (chunk_index, chunk) in tokens.chunks(n_batch).enumerate() {
        if cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }
        batch.clear();
        let base = chunk_index * n_batch;
        for (i, &token) in chunk.iter().enumerate() {
            let pos = base + i;
            batch.add(token, pos, 0, pos == tokens.len() - 1);
        }
        trace!(chunk = chunk_index, n_tokens = chunk.len(), "prompt chunk");
        context
            .decode(model, &batch)
            .map_err(|e| InferenceError::DecodeStep(e.to_string()))?;
    }

    let deadline = start + config.generation_timeout;
    let mut utf8 = Utf8Accumulator::new();
    let mut text = String::new();
    let mut n_cur = tokens.len();
    let mut generated = 0usize;

    let finish = loop {
        if cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }
        if generated >= config.max_new_tokens {
            break FinishReason::MaxTokens;
        }
        if Instant::now() >= deadline {
            warn!(generated, "generation timed out");
            break FinishReason::TimedOut;
        }

        let Some(logits) = context.last_logits() else {
            break FinishReason::Aborted(InferenceError::DecodeStep(
                "no logits available".to_string(),
            ));
        };
        let token = sampler.sample(logits);
        if codec.is_eog(token) {
            break FinishReason::EndOfGeneration;
        }

        text.push_str(&utf8.push(&codec.decode_piece(token)));
        sampler.accept(token);
        generated += 1;

        if generated >= config.max_new_tokens {
            break FinishReason::MaxTokens;
        }
        if n_cur >= n_ctx {
            warn!(n_ctx, "context budget exhausted mid-generation");
            break FinishReason::Aborted(InferenceError::ContextOverflow {
                needed: n_cur + 1,
                budget: n_ctx,
            });
        }

        batch.clear();
        batch.add(token, n_cur, 0, true);
        if let Err(e) = context.decode(model, &batch) {
            warn!(error = %e, pos = n_cur, "decode failed mid-generation");
            break FinishReason::Aborted(InferenceError::DecodeStep(e.to_string()));
        }
        n_cur += 1;
    };
    text.push_str(&utf8.finish());

    Ok(Generation {
        text: text.trim().to_string(),
        finish,
        prompt_tokens: tokens.len(),
        generated_tokens: generated,
        elapsed: start.elapsed(),
    })
}
