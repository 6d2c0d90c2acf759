use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid GGUF magic: expected 'GGUF', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("missing metadata key: {0}")]
    MissingKey(String),
    #[error("type mismatch for key '{key}': expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("unsupported GGUF type ID: {0}")]
    UnsupportedGgufType(u32),
    #[error("malformed GGUF: {0}")]
    Malformed(String),
    #[error("tensor not found: {0}")]
    TensorNotFound(String),
    #[error("tensor '{name}' has shape {got:?}, expected {expected:?}")]
    TensorShape {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("tensor '{0}' extends past the end of the file")]
    TensorOutOfBounds(String),
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("cannot encode {0:?}: no vocabulary entry and no byte fallback")]
    Encoding(String),
    #[error("failed to create decoding context: {0}")]
    ContextCreate(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
