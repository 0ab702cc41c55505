use attention::AttentionError;
use thiserror::Error;

/// Failures raised while building or running the hierarchical network.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{missing} must be set when no pretrained embedding matrix is given")]
    MissingEmbeddingSize { missing: String },
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid model input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Attention(#[from] AttentionError),
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}
