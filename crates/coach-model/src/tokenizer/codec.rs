use std::collections::HashMap;

use regex::Regex;

use super::vocab::{parse_byte_token, TokenType, Vocab, VocabKind};
use crate::error::{ModelError, Result};
use crate::TokenId;

/// SentencePiece's visible space.
const SPM_SPACE: char = '\u{2581}';

/// Llama-3 pre-tokenizer pattern minus its final `\s+(?!\S)` lookahead,
/// which [`pre_split`] applies by hand.
const LLAMA3_PRE_TOKENIZER: &str = concat!(
    r"(?i:'s|'t|'re|'ve|'m|'ll|'d)",
    r"|[^\r\n\p{L}\p{N}]?\p{L}+",
    r"|\p{N}{1,3}",
    r"| ?[^\s\p{L}\p{N}]+[\r\n]*",
    r"|\s*[\r\n]+",
    r"|\s+",
);

/// Converts text to token ids and token ids back to UTF-8 bytes, using only
/// the vocabulary it owns.
pub struct TokenCodec {
    vocab: Vocab,
    /// merge pair -> rank (lower merges first)
    merge_ranks: HashMap<String, HashMap<String, usize>>,
    /// Control and user-defined token texts matched literally in input,
    /// longest first so `<|eot_id|>` wins over any shorter prefix.
    specials: Vec<(String, TokenId)>,
    byte_to_char: [char; 256],
    char_to_byte: HashMap<char, u8>,
    /// Word splitter for byte-level vocabularies.
    pre_tokenizer: Option<Regex>,
    render_special: bool,
}

/// One unit of the working sequence during merging.
struct Symbol {
    text: String,
    /// Byte-fallback symbols are already final ids and never merge.
    fixed: Option<TokenId>,
}

enum Segment<'a> {
    Text(&'a str),
    Special(TokenId),
}

impl TokenCodec {
    pub fn new(vocab: Vocab) -> TokenCodec {
        let mut merge_ranks: HashMap<String, HashMap<String, usize>> = HashMap::new();
        for (rank, (a, b)) in vocab.merges.iter().enumerate() {
            merge_ranks
                .entry(a.clone())
                .or_default()
                .entry(b.clone())
                .or_insert(rank);
        }

        let mut specials: Vec<(String, TokenId)> = vocab
            .tokens
            .iter()
            .zip(&vocab.types)
            .enumerate()
            .filter(|(_, (text, ty))| {
                matches!(ty, TokenType::Control | TokenType::UserDefined) && !text.is_empty()
            })
            .map(|(id, (text, _))| (text.clone(), id as TokenId))
            .collect();
        specials.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.1.cmp(&b.1)));

        let byte_to_char = byte_level_table();
        let char_to_byte = byte_to_char
            .iter()
            .enumerate()
            .map(|(b, &c)| (c, b as u8))
            .collect();

        let pre_tokenizer = match vocab.kind {
            VocabKind::Bpe => Regex::new(LLAMA3_PRE_TOKENIZER).ok(),
            VocabKind::Spm => None,
        };

        TokenCodec {
            vocab,
            merge_ranks,
            specials,
            byte_to_char,
            char_to_byte,
            pre_tokenizer,
            render_special: false,
        }
    }

    /// Render control tokens as their literal text in `decode_piece`.
    pub fn with_render_special(mut self, render: bool) -> Self {
        self.render_special = render;
        self
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn n_vocab(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_eog(&self, token: TokenId) -> bool {
        self.vocab.is_eog(token)
    }

    /// Encodes `text`. With `add_special`, BOS is prepended when the
    /// vocabulary asks for it. Control-token texts inside `text` map to their
    /// ids.
    pub fn encode(&self, text: &str, add_special: bool) -> Result<Vec<TokenId>> {
        let mut out = Vec::with_capacity(text.len() / 3 + 2);
        if add_special && self.vocab.special.add_bos {
            if let Some(bos) = self.vocab.special.bos {
                out.push(bos);
            }
        }

        for segment in self.split_specials(text) {
            match segment {
                Segment::Special(id) => out.push(id),
                Segment::Text(s) => {
                    let words = match &self.pre_tokenizer {
                        Some(re) => pre_split(re, s),
                        None => split_words(s).collect(),
                    };
                    for word in words {
                        self.encode_word(word, &mut out)?;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Raw bytes of one token. May be an incomplete UTF-8 sequence; control
    /// tokens produce nothing unless `render_special` is set.
    pub fn decode_piece(&self, token: TokenId) -> Vec<u8> {
        let (Some(text), Some(ty)) = (self.vocab.text_of(token), self.vocab.token_type(token)) else {
            return Vec::new();
        };

        match ty {
            TokenType::Control | TokenType::Unknown | TokenType::Unused => {
                if self.render_special {
                    text.as_bytes().to_vec()
                } else {
                    Vec::new()
                }
            }
            TokenType::UserDefined => text.as_bytes().to_vec(),
            TokenType::Byte => match parse_byte_token(text) {
                Some(b) => vec![b],
                None => self.normal_piece(text),
            },
            TokenType::Normal => self.normal_piece(text),
        }
    }

    /// Concatenates all pieces and converts once, so split characters survive.
    pub fn decode(&self, tokens: &[TokenId]) -> String {
        let bytes: Vec<u8> = tokens.iter().flat_map(|&t| self.decode_piece(t)).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn normal_piece(&self, text: &str) -> Vec<u8> {
        match self.vocab.kind {
            VocabKind::Spm => text.replace(SPM_SPACE, " ").into_bytes(),
            VocabKind::Bpe => {
                let mut bytes = Vec::with_capacity(text.len());
                for c in text.chars() {
                    match self.char_to_byte.get(&c) {
                        Some(&b) => bytes.push(b),
                        None => {
                            let mut buf = [0u8; 4];
                            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                        }
                    }
                }
                bytes
            }
        }
    }

    fn split_specials<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        let mut rest = text;

        while !rest.is_empty() {
            // Earliest match; on ties the longer token (sorted first) wins.
            let hit = self
                .specials
                .iter()
                .filter_map(|(s, id)| rest.find(s.as_str()).map(|at| (at, s.len(), *id)))
                .min_by_key(|&(at, _, _)| at);

            match hit {
                Some((at, len, id)) => {
                    if at > 0 {
                        segments.push(Segment::Text(&rest[..at]));
                    }
                    segments.push(Segment::Special(id));
                    rest = &rest[at + len..];
                }
                None => {
                    segments.push(Segment::Text(rest));
                    break;
                }
            }
        }
        segments
    }

    fn encode_word(&self, word: &str, out: &mut Vec<TokenId>) -> Result<()> {
        let mut symbols = self.initial_symbols(word)?;
        self.merge(&mut symbols);

        for sym in symbols {
            if let Some(id) = sym.fixed {
                out.push(id);
                continue;
            }
            match self.vocab.id_of(&sym.text) {
                Some(id) => out.push(id),
                None => match self.vocab.special.unk {
                    Some(unk) => out.push(unk),
                    None => return Err(ModelError::Encoding(sym.text)),
                },
            }
        }
        Ok(())
    }

    fn initial_symbols(&self, word: &str) -> Result<Vec<Symbol>> {
        let mut symbols = Vec::with_capacity(word.len());
        match self.vocab.kind {
            VocabKind::Bpe => {
                for b in word.bytes() {
                    symbols.push(Symbol {
                        text: self.byte_to_char[b as usize].to_string(),
                        fixed: None,
                    });
                }
            }
            VocabKind::Spm => {
                for c in word.chars() {
                    let c = if c == ' ' { SPM_SPACE } else { c };
                    let text = c.to_string();
                    if self.vocab.id_of(&text).is_some() {
                        symbols.push(Symbol { text, fixed: None });
                        continue;
                    }
                    let mut buf = [0u8; 4];
                    for &b in c.encode_utf8(&mut buf).as_bytes() {
                        let byte_tok = format!("<0x{:02X}>", b);
                        let id = self
                            .vocab
                            .id_of(&byte_tok)
                            .or(self.vocab.special.unk)
                            .ok_or_else(|| ModelError::Encoding(text.clone()))?;
                        symbols.push(Symbol {
                            text: byte_tok,
                            fixed: Some(id),
                        });
                    }
                }
            }
        }
        Ok(symbols)
    }

    /// Lower is better. BPE ranks come from the merge list; SPM merges are
    /// allowed whenever the concatenation is a token and prefer higher scores.
    fn pair_priority(&self, a: &str, b: &str, scratch: &mut String) -> Option<f64> {
        match self.vocab.kind {
            VocabKind::Bpe => self
                .merge_ranks
                .get(a)
                .and_then(|m| m.get(b))
                .map(|&r| r as f64),
            VocabKind::Spm => {
                scratch.clear();
                scratch.push_str(a);
                scratch.push_str(b);
                self.vocab
                    .id_of(scratch)
                    .map(|id| -(self.vocab.scores[id as usize] as f64))
            }
        }
    }

    fn merge(&self, symbols: &mut Vec<Symbol>) {
        let mut scratch = String::new();
        loop {
            let mut best: Option<(f64, usize)> = None;
            for i in 0..symbols.len().saturating_sub(1) {
                let (a, b) = (&symbols[i], &symbols[i + 1]);
                if a.fixed.is_some() || b.fixed.is_some() {
                    continue;
                }
                if let Some(p) = self.pair_priority(&a.text, &b.text, &mut scratch) {
                    if best.map_or(true, |(bp, _)| p < bp) {
                        best = Some((p, i));
                    }
                }
            }

            let Some((_, i)) = best else { break };
            let right = symbols.remove(i + 1);
            symbols[i].text.push_str(&right.text);
        }
    }
}

/// Splits before every space that follows a non-space, so " world" stays one
/// word and merges never cross word boundaries.
fn split_words(text: &str) -> impl Iterator<Item = &str> {
    let mut starts = vec![0];
    let mut prev_space = true;
    for (i, c) in text.char_indices() {
        if c == ' ' && !prev_space {
            starts.push(i);
        }
        prev_space = c == ' ';
    }
    starts.push(text.len());
    starts
        .windows(2)
        .map(|w| &text[w[0]..w[1]])
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .into_iter()
}

/// Splits `text` into pre-tokens with the Llama-3 pattern. A run of
/// whitespace without line breaks that is followed by more text gives its
/// last character to the next pre-token, as `\s+(?!\S)` does.
fn pre_split<'a>(re: &Regex, text: &'a str) -> Vec<&'a str> {
    let mut words = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let Some(m) = re.find_at(text, pos) else {
            words.push(&text[pos..]);
            break;
        };
        if m.start() > pos {
            words.push(&text[pos..m.start()]);
        }
        let piece = m.as_str();
        let mut end = m.end();
        if end < text.len()
            && piece.chars().all(char::is_whitespace)
            && !piece.contains(['\r', '\n'])
            && piece.chars().count() > 1
        {
            end -= piece.chars().next_back().map_or(0, char::len_utf8);
        }
        if end == m.start() {
            // Empty matches cannot advance; take one character.
            end += text[end..].chars().next().map_or(1, char::len_utf8);
        }
        words.push(&text[m.start()..end]);
        pos = end;
    }
    words
}

/// Byte-level BPE's byte -> printable character mapping: printable Latin-1
/// bytes map to themselves, the rest to code points from U+0100 upwards.
pub fn byte_level_table() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut next = 256u32;
    for b in 0..=255u8 {
        let printable = matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
        let code = if printable {
            b as u32
        } else {
            let c = next;
            next += 1;
            c
        };
        table[b as usize] = char::from_u32(code).unwrap_or('\u{FFFD}');
    }
    table
}
