use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;
use crate::TokenId;

/// Control-token texts that end a reply even when the file does not flag them
/// as EOS/EOT.
const EOG_TEXTS: &[&str] = &["<|eot_id|>", "<|end_of_text|>", "<|im_end|>", "<|end|>"];

/// Tokenizer family, from `tokenizer.ggml.model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabKind {
    /// SentencePiece ("llama"): `▁` marks spaces, merges follow token scores,
    /// unknown bytes fall back to `<0xHH>` tokens.
    Spm,
    /// Byte-level BPE ("gpt2"): every byte has a printable stand-in character,
    /// merges follow `tokenizer.ggml.merges` rank order.
    Bpe,
}

/// Per-token attribute from `tokenizer.ggml.token_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl TokenType {
    pub fn from_gguf(id: i32) -> TokenType {
        match id {
            2 => TokenType::Unknown,
            3 => TokenType::Control,
            4 => TokenType::UserDefined,
            5 => TokenType::Unused,
            6 => TokenType::Byte,
            _ => TokenType::Normal,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpecialTokens {
    pub bos: Option<TokenId>,
    pub eos: Option<TokenId>,
    pub eot: Option<TokenId>,
    pub unk: Option<TokenId>,
    /// Whether `encode(.., add_special = true)` prepends BOS.
    pub add_bos: bool,
}

/// Token vocabulary: strings, scores and types indexed by token id.
#[derive(Debug, Clone)]
pub struct Vocab {
    pub kind: VocabKind,
    pub tokens: Vec<String>,
    pub scores: Vec<f32>,
    pub types: Vec<TokenType>,
    /// Ordered merge rules ("a b" split on the first space). Empty for SPM.
    pub merges: Vec<(String, String)>,
    pub special: SpecialTokens,
    token_to_id: HashMap<String, TokenId>,
}

impl Vocab {
    /// Builds a vocabulary from its parts. `scores` and `types` must be empty
    /// (defaults) or match `tokens` in length.
    pub fn new(
        kind: VocabKind,
        tokens: Vec<String>,
        scores: Vec<f32>,
        types: Vec<TokenType>,
        merges: Vec<(String, String)>,
        special: SpecialTokens,
    ) -> Result<Vocab> {
        let n = tokens.len();
        let scores = if scores.is_empty() { vec![0.0; n] } else { scores };
        let types = if types.is_empty() {
            tokens.iter().map(|t| guess_type(t)).collect()
        } else {
            types
        };
        if scores.len() != n || types.len() != n {
            return Err(ModelError::Tokenizer(format!(
                "vocabulary has {} tokens but {} scores and {} types",
                n,
                scores.len(),
                types.len()
            )));
        }
        for id in [special.bos, special.eos, special.eot, special.unk].into_iter().flatten() {
            if id as usize >= n {
                return Err(ModelError::Tokenizer(format!(
                    "special token id {} outside vocabulary of {}",
                    id, n
                )));
            }
        }

        let mut token_to_id = HashMap::with_capacity(n);
        for (id, tok) in tokens.iter().enumerate() {
            // First occurrence wins; some vocabularies repeat padding entries.
            token_to_id.entry(tok.clone()).or_insert(id as TokenId);
        }

        Ok(Vocab {
            kind,
            tokens,
            scores,
            types,
            merges,
            special,
            token_to_id,
        })
    }

    /// Reads `tokenizer.ggml.*` keys. Only `tokens` is mandatory.
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<Vocab> {
        let kind = match metadata.get_string("tokenizer.ggml.model").unwrap_or("llama") {
            "llama" => VocabKind::Spm,
            "gpt2" => VocabKind::Bpe,
            other => {
                return Err(ModelError::Tokenizer(format!(
                    "unsupported tokenizer model '{}'",
                    other
                )))
            }
        };

        let tokens = metadata.get_string_array("tokenizer.ggml.tokens")?;
        let scores = optional(metadata.get_f32_array("tokenizer.ggml.scores"))?.unwrap_or_default();
        let types = optional(metadata.get_i32_array("tokenizer.ggml.token_type"))?
            .map(|ids| ids.into_iter().map(TokenType::from_gguf).collect::<Vec<_>>())
            .unwrap_or_default();

        let merges = optional(metadata.get_string_array("tokenizer.ggml.merges"))?
            .unwrap_or_default()
            .into_iter()
            .map(|entry| match entry.split_once(' ') {
                Some((a, b)) => Ok((a.to_string(), b.to_string())),
                None => Err(ModelError::Tokenizer(format!("invalid merge entry: {:?}", entry))),
            })
            .collect::<Result<Vec<_>>>()?;

        let id = |key: &str| metadata.get_u32(key).ok();
        let special = SpecialTokens {
            bos: id("tokenizer.ggml.bos_token_id"),
            eos: id("tokenizer.ggml.eos_token_id"),
            eot: id("tokenizer.ggml.eot_token_id"),
            unk: id("tokenizer.ggml.unknown_token_id"),
            add_bos: metadata
                .get_bool("tokenizer.ggml.add_bos_token")
                .unwrap_or(kind == VocabKind::Spm),
        };

        Vocab::new(kind, tokens, scores, types, merges, special)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn id_of(&self, text: &str) -> Option<TokenId> {
        self.token_to_id.get(text).copied()
    }

    pub fn text_of(&self, id: TokenId) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    pub fn token_type(&self, id: TokenId) -> Option<TokenType> {
        self.types.get(id as usize).copied()
    }

    /// True for tokens that end a reply: EOS, EOT and the well-known
    /// end-of-turn control tokens.
    pub fn is_eog(&self, id: TokenId) -> bool {
        if Some(id) == self.special.eos || Some(id) == self.special.eot {
            return true;
        }
        self.token_type(id) == Some(TokenType::Control)
            && self.text_of(id).is_some_and(|t| EOG_TEXTS.contains(&t))
    }
}

/// Maps a missing key to `None` while keeping type errors.
fn optional<T>(res: Result<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(ModelError::MissingKey(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn guess_type(text: &str) -> TokenType {
    if parse_byte_token(text).is_some() {
        TokenType::Byte
    } else if text.starts_with("<|") && text.ends_with("|>") {
        TokenType::Control
    } else {
        TokenType::Normal
    }
}

/// `<0xHH>` -> byte.
pub(crate) fn parse_byte_token(text: &str) -> Option<u8> {
    let hex = text.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}
