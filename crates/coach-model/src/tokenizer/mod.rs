//! Text <-> token id conversion against a model's vocabulary.

pub mod codec;
pub mod utf8;
pub mod vocab;

pub use codec::{byte_level_table, TokenCodec};
pub use utf8::Utf8Accumulator;
pub use vocab::{SpecialTokens, TokenType, Vocab, VocabKind};
