use crate::batch::Batch;
use crate::context::{CacheLayout, KvCache};
use crate::tokenizer::TokenCodec;

/// A loaded model: immutable weights plus the vocabulary they were trained
/// with. All mutable decoding state lives in the [`KvCache`] handed to
/// `forward`, so one model can back a fresh context after every reset.
pub trait ModelArchitecture: Send + Sync {
    /// Short architecture name for logs ("llama").
    fn name(&self) -> &str;

    fn codec(&self) -> &TokenCodec;

    /// Context length the model was trained with; 0 when unknown.
    fn n_ctx_train(&self) -> usize;

    fn cache_layout(&self) -> CacheLayout;

    /// Processes `batch` in order, storing keys/values at each entry's
    /// position, and returns one logits row (length = vocabulary size) per
    /// entry whose `logits` flag is set.
    fn forward(&self, batch: &Batch, cache: &mut KvCache) -> crate::Result<Vec<Vec<f32>>>;
}
