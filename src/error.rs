use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by every loading API in this crate.
pub type Result<T> = std::result::Result<T, SpineError>;

#[derive(Debug, Error)]
pub enum SpineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("skeleton json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("atlas format error at line {line}: {message}")]
    AtlasFormat { line: usize, message: String },

    #[error("atlas has no region named `{0}`")]
    MissingRegion(String),

    #[error("texture file not found: {0}")]
    MissingTexture(PathBuf),

    #[error("failed to decode texture `{path}`: {message}")]
    TextureDecode { path: PathBuf, message: String },

    #[error("skeleton references unknown bone `{0}`")]
    MissingBone(String),

    #[error("config error: {0}")]
    Config(String),
}

impl SpineError {
    pub(crate) fn atlas(line: usize, message: impl Into<String>) -> Self {
        Self::AtlasFormat { line, message: message.into() }
    }
}
