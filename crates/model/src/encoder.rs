//! Word-to-sentence encoder shared by every sentence position.

use std::sync::Arc;

use attention::{AttentionPooling, Pooling};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use embedding::TokenEmbedding;
use layers::{Bidirectional, BidirectionalConfig, Dropout};

use crate::{config::HanConfig, errors::ModelError};

/// Output of [`SentenceEncoder::encode`] for `n` sentences.
#[derive(Debug, Clone)]
pub struct SentenceEncoding {
    /// `(n, 2 * word_rnn_size)` sentence vectors.
    pub vectors: Tensor,
    /// `(n, max_seq, 1)` word attention weights.
    pub word_attention: Tensor,
}

/// Embedding, bidirectional word encoder and word attention for single
/// sentences shaped `(n, max_seq)`.
#[derive(Debug)]
pub struct SentenceEncoder {
    max_seq: usize,
    embedding: TokenEmbedding,
    embedding_dropout: Option<Dropout>,
    rnn: Bidirectional,
    rnn_dropout: Option<Dropout>,
    attention: AttentionPooling,
}

impl SentenceEncoder {
    /// `seed` feeds the two dropout stages.
    pub fn new(config: &HanConfig, seed: u64, vb: VarBuilder) -> Result<Self, ModelError> {
        let embedding = TokenEmbedding::new(config.embedding_source()?, vb.pp("embedding"))?;
        let embedding_dropout = Dropout::from_probability(config.drop_word_emb, seed)?;

        let rnn = Bidirectional::new(
            BidirectionalConfig::new(
                config.recurrent,
                embedding.embedding_dim(),
                config.word_rnn_size,
            ),
            vb.pp("word_rnn"),
        )?;
        let rnn_dropout = Dropout::from_probability(config.drop_word_rnn_out, seed.wrapping_add(1))?;

        let attention = AttentionPooling::new(rnn.output_dim(), config.pooling, vb.pp("word_attention"))?;

        log::debug!(
            "sentence encoder: embedding {}x{} ({}), word rnn {:?} {} per direction",
            embedding.vocab_size(),
            embedding.embedding_dim(),
            if embedding.is_trainable() { "learned" } else { "frozen" },
            config.recurrent,
            config.word_rnn_size
        );

        Ok(Self {
            max_seq: config.max_seq,
            embedding,
            embedding_dropout,
            rnn,
            rnn_dropout,
            attention,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.rnn.output_dim()
    }

    pub fn embedding(&self) -> &TokenEmbedding {
        &self.embedding
    }

    pub fn encode(&self, token_ids: &Tensor, train: bool) -> Result<SentenceEncoding, ModelError> {
        match token_ids.dims() {
            [n, steps] if *n > 0 && *steps == self.max_seq => {}
            dims => {
                return Err(ModelError::InvalidInput(format!(
                    "sentences must be shaped (n, {}), got {dims:?}",
                    self.max_seq
                )))
            }
        }

        let (mut hidden, mask) = self.embedding.forward(token_ids)?;
        if let Some(dropout) = &self.embedding_dropout {
            hidden = dropout.forward(&hidden, train)?;
        }

        let mut states = self.rnn.forward(&hidden, Some(&mask))?;
        if let Some(dropout) = &self.rnn_dropout {
            states = dropout.forward(&states, train)?;
        }

        let mask_ref = self.attention.propagate_mask(Some(&mask));
        let pooled = self.attention.pool(&states, mask_ref)?;
        Ok(SentenceEncoding {
            vectors: pooled.pooled,
            word_attention: pooled.weights,
        })
    }
}

/// Attention-only view over a shared [`SentenceEncoder`].
#[derive(Debug, Clone)]
pub struct SentenceAttentionInspector {
    encoder: Arc<SentenceEncoder>,
}

impl SentenceAttentionInspector {
    pub fn new(encoder: Arc<SentenceEncoder>) -> Self {
        Self { encoder }
    }

    /// Word attention `(n, max_seq, 1)` computed in inference mode.
    pub fn word_attention(&self, token_ids: &Tensor) -> Result<Tensor, ModelError> {
        Ok(self.encoder.encode(token_ids, false)?.word_attention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn encoder(varmap: &VarMap) -> Result<SentenceEncoder, ModelError> {
        let mut config = HanConfig::learned(5, 12, 4).without_dropout();
        config.word_rnn_size = 3;
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        SentenceEncoder::new(&config, 0, vb.pp("sentence_encoder"))
    }

    #[test]
    fn encodes_sentences_with_masked_weights() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let encoder = encoder(&varmap)?;
        let ids = Tensor::new(&[[3u32, 7, 2, 0, 0], [4, 0, 0, 0, 0], [0, 0, 0, 0, 0]], &Device::Cpu)?;
        let encoding = encoder.encode(&ids, false)?;

        assert_eq!(encoding.vectors.dims(), &[3, 6]);
        assert_eq!(encoding.word_attention.dims(), &[3, 5, 1]);
        let weights = encoding.word_attention.squeeze(2)?.to_vec2::<f32>()?;
        assert_eq!(&weights[0][3..], &[0.0, 0.0]);
        assert!(weights[2].iter().all(|w| *w == 0.0));
        let empty = encoding.vectors.get(2)?.to_vec1::<f32>()?;
        assert!(empty.iter().all(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn inspector_shares_the_encoder_parameters() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let shared = Arc::new(encoder(&varmap)?);
        let inspector = SentenceAttentionInspector::new(Arc::clone(&shared));
        let ids = Tensor::new(&[[5u32, 1, 0, 0, 0]], &Device::Cpu)?;

        let direct = shared.encode(&ids, false)?.word_attention;
        let inspected = inspector.word_attention(&ids)?;
        assert_eq!(
            direct.flatten_all()?.to_vec1::<f32>()?,
            inspected.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn rejects_wrong_sentence_length() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let encoder = encoder(&varmap)?;
        let ids = Tensor::new(&[[1u32, 2, 3]], &Device::Cpu)?;
        assert!(matches!(
            encoder.encode(&ids, false),
            Err(ModelError::InvalidInput(_))
        ));
        Ok(())
    }
}
