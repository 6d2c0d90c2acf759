use std::path::Path;

use crate::architecture::ModelArchitecture;
use crate::backend::{detect_accelerator, LayerPlacement};
use crate::error::Result;
use crate::gguf::reader::GgufFile;
use crate::llama::LlamaModel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadParams {
    /// Transformer blocks to place on an accelerator when one is present.
    pub gpu_layers: usize,
}

/// Turns a model artifact into a ready-to-decode model.
///
/// `progress` receives fractions in `0.0..=1.0` as loading advances.
pub trait ModelLoader: Send + Sync {
    fn load(
        &self,
        path: &Path,
        params: &LoadParams,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Box<dyn ModelArchitecture>>;
}

/// Loads LLaMA-architecture GGUF files.
#[derive(Debug, Clone, Copy, Default)]
pub struct GgufLoader;

impl ModelLoader for GgufLoader {
    fn load(
        &self,
        path: &Path,
        params: &LoadParams,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Box<dyn ModelArchitecture>> {
        let gguf = GgufFile::open(path)?;
        tracing::debug!(
            path = %path.display(),
            version = gguf.header.version,
            n_tensors = gguf.header.n_tensors,
            "gguf parsed"
        );
        progress(0.1);

        let placement = LayerPlacement::new(detect_accelerator(), params.gpu_layers);
        let model = LlamaModel::from_gguf(&gguf, placement, |done, total| {
            progress(0.1 + 0.9 * done as f32 / total.max(1) as f32);
        })?;
        progress(1.0);
        Ok(Box::new(model))
    }
}
