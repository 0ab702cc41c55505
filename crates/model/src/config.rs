use attention::PoolingConfig;
use candle_core::{DType, Device, Tensor};
use embedding::EmbeddingSource;
use layers::RecurrentKind;

use crate::errors::ModelError;

/// Embedding table selection.
///
/// Learned sizes are optional so partially filled configuration files can be
/// represented; [`HanConfig::validate`] rejects the missing ones.
#[derive(Debug, Clone)]
pub enum EmbeddingSpec {
    Learned {
        vocab_size: Option<usize>,
        embedding_size: Option<usize>,
    },
    /// Frozen `(vocab_size, embedding_size)` matrix.
    Pretrained(Tensor),
}

/// High-level configuration for assembling the hierarchical attention network.
#[derive(Debug, Clone)]
pub struct HanConfig {
    /// Tokens per sentence; every sentence row is padded to this length.
    pub max_seq: usize,
    pub embedding: EmbeddingSpec,
    pub recurrent: RecurrentKind,
    /// Hidden size per direction of the word-level encoder.
    pub word_rnn_size: usize,
    /// Hidden size per direction of the sentence-level encoder.
    pub sentence_rnn_size: usize,
    pub drop_word_emb: f32,
    pub drop_word_rnn_out: f32,
    pub drop_sentence_rnn_out: f32,
    pub pooling: PoolingConfig,
    /// Makes parameter initialisation and dropout masks reproducible.
    pub seed: Option<u64>,
    pub dtype: DType,
    pub device: Device,
}

impl HanConfig {
    /// Defaults around a learned embedding table.
    pub fn learned(max_seq: usize, vocab_size: usize, embedding_size: usize) -> Self {
        Self::with_embedding(
            max_seq,
            EmbeddingSpec::Learned {
                vocab_size: Some(vocab_size),
                embedding_size: Some(embedding_size),
            },
        )
    }

    /// Defaults around a frozen pretrained matrix.
    pub fn pretrained(max_seq: usize, matrix: Tensor) -> Self {
        Self::with_embedding(max_seq, EmbeddingSpec::Pretrained(matrix))
    }

    pub fn with_embedding(max_seq: usize, embedding: EmbeddingSpec) -> Self {
        Self {
            max_seq,
            embedding,
            recurrent: RecurrentKind::Gru,
            word_rnn_size: 100,
            sentence_rnn_size: 100,
            drop_word_emb: 0.2,
            drop_word_rnn_out: 0.2,
            drop_sentence_rnn_out: 0.5,
            pooling: PoolingConfig::default(),
            seed: None,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    /// Disables every dropout stage.
    pub fn without_dropout(mut self) -> Self {
        self.drop_word_emb = 0.0;
        self.drop_word_rnn_out = 0.0;
        self.drop_sentence_rnn_out = 0.0;
        self
    }

    /// Validate structural invariants before any parameter is created.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.max_seq == 0 {
            return Err(ModelError::InvalidConfig(
                "max_seq must be greater than zero".into(),
            ));
        }
        self.embedding_source()?;
        if self.word_rnn_size == 0 {
            return Err(ModelError::InvalidConfig(
                "word_rnn_size must be greater than zero".into(),
            ));
        }
        if self.sentence_rnn_size == 0 {
            return Err(ModelError::InvalidConfig(
                "sentence_rnn_size must be greater than zero".into(),
            ));
        }
        for (name, p) in [
            ("drop_word_emb", self.drop_word_emb),
            ("drop_word_rnn_out", self.drop_word_rnn_out),
            ("drop_sentence_rnn_out", self.drop_sentence_rnn_out),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(ModelError::InvalidConfig(format!(
                    "{name} must be in [0, 1), got {p}"
                )));
            }
        }
        if !self.dtype.is_float() {
            return Err(ModelError::InvalidConfig(format!(
                "parameter dtype must be a float type, got {:?}",
                self.dtype
            )));
        }
        if self.pooling.epsilon < 0.0 {
            return Err(ModelError::InvalidConfig(
                "attention epsilon must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Resolves the embedding selection into a constructible source.
    pub fn embedding_source(&self) -> Result<EmbeddingSource, ModelError> {
        match &self.embedding {
            EmbeddingSpec::Pretrained(matrix) => match matrix.dims() {
                [vocab, dim] if *vocab > 0 && *dim > 0 => {
                    Ok(EmbeddingSource::Pretrained(matrix.clone()))
                }
                dims => Err(ModelError::InvalidConfig(format!(
                    "pretrained embeddings must be a non-empty matrix, got shape {dims:?}"
                ))),
            },
            EmbeddingSpec::Learned {
                vocab_size,
                embedding_size,
            } => match (vocab_size, embedding_size) {
                (Some(vocab_size), Some(embedding_dim)) => {
                    if *vocab_size == 0 || *embedding_dim == 0 {
                        return Err(ModelError::InvalidConfig(
                            "vocab_size and embedding_size must be greater than zero".into(),
                        ));
                    }
                    Ok(EmbeddingSource::Learned {
                        vocab_size: *vocab_size,
                        embedding_dim: *embedding_dim,
                    })
                }
                (None, None) => Err(ModelError::MissingEmbeddingSize {
                    missing: "vocab_size and embedding_size".into(),
                }),
                (None, Some(_)) => Err(ModelError::MissingEmbeddingSize {
                    missing: "vocab_size".into(),
                }),
                (Some(_), None) => Err(ModelError::MissingEmbeddingSize {
                    missing: "embedding_size".into(),
                }),
            },
        }
    }

    /// Width of the embedding vectors fed to the word encoder.
    pub fn embedding_dim(&self) -> Option<usize> {
        match &self.embedding {
            EmbeddingSpec::Learned { embedding_size, .. } => *embedding_size,
            EmbeddingSpec::Pretrained(matrix) => matrix.dims().get(1).copied(),
        }
    }
}
