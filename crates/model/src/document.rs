//! Sentence-to-document encoder and classification head.
//!
//! Documents arrive as `(batch, sentences, max_seq)` ids. The shared
//! [`SentenceEncoder`] runs over the flattened `(batch * sentences, max_seq)`
//! view and its vectors are folded back to `(batch, sentences, dim)` before
//! the sentence-level recurrent encoder and attention run. The sentence mask
//! comes from the raw ids, not from the word masks.

use std::sync::Arc;

use attention::{masks, AttentionPooling, Pooling};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use layers::{Bidirectional, BidirectionalConfig, Dense, DenseActivation, Dropout};

use crate::{
    config::HanConfig,
    encoder::{SentenceAttentionInspector, SentenceEncoder},
    errors::ModelError,
};

/// Output of one document pass.
#[derive(Debug, Clone)]
pub struct DocumentEncoding {
    /// `(batch, 1)` positive-class probabilities.
    pub probabilities: Tensor,
    /// `(batch, sentences, max_seq, 1)` word attention weights.
    pub word_attention: Tensor,
    /// `(batch, sentences, 1)` sentence attention weights.
    pub sentence_attention: Tensor,
}

#[derive(Debug)]
pub struct DocumentEncoder {
    max_seq: usize,
    sentence_encoder: Arc<SentenceEncoder>,
    inspector: SentenceAttentionInspector,
    rnn: Bidirectional,
    rnn_dropout: Option<Dropout>,
    attention: AttentionPooling,
    head: Dense,
}

impl DocumentEncoder {
    pub fn new(config: &HanConfig, seed: u64, vb: VarBuilder) -> Result<Self, ModelError> {
        let sentence_encoder = Arc::new(SentenceEncoder::new(
            config,
            seed,
            vb.pp("sentence_encoder"),
        )?);
        let inspector = SentenceAttentionInspector::new(Arc::clone(&sentence_encoder));

        let vb = vb.pp("document_encoder");
        let rnn = Bidirectional::new(
            BidirectionalConfig::new(
                config.recurrent,
                sentence_encoder.output_dim(),
                config.sentence_rnn_size,
            ),
            vb.pp("sentence_rnn"),
        )?;
        let rnn_dropout =
            Dropout::from_probability(config.drop_sentence_rnn_out, seed.wrapping_add(2))?;
        let attention = AttentionPooling::new(
            rnn.output_dim(),
            config.pooling,
            vb.pp("sentence_attention"),
        )?;
        let head = Dense::new(rnn.output_dim(), 1, DenseActivation::Sigmoid, vb.pp("output"))?;

        log::debug!(
            "document encoder: sentence rnn {:?} {} per direction, head {} -> 1",
            config.recurrent,
            config.sentence_rnn_size,
            rnn.output_dim()
        );

        Ok(Self {
            max_seq: config.max_seq,
            sentence_encoder,
            inspector,
            rnn,
            rnn_dropout,
            attention,
            head,
        })
    }

    pub fn sentence_encoder(&self) -> &Arc<SentenceEncoder> {
        &self.sentence_encoder
    }

    pub fn inspector(&self) -> &SentenceAttentionInspector {
        &self.inspector
    }

    /// Runs the full graph. Dropout is active only when `train` is set.
    pub fn forward(&self, documents: &Tensor, train: bool) -> Result<DocumentEncoding, ModelError> {
        let (batch, sentences) = self.check_documents(documents)?;
        let sentence_mask = masks::sentence_mask(documents)?;

        let flat = documents.reshape((batch * sentences, self.max_seq))?;
        let encoded = self.sentence_encoder.encode(&flat, train)?;
        let sentence_vectors = encoded.vectors.reshape((
            batch,
            sentences,
            self.sentence_encoder.output_dim(),
        ))?;

        let mut states = self.rnn.forward(&sentence_vectors, Some(&sentence_mask))?;
        if let Some(dropout) = &self.rnn_dropout {
            states = dropout.forward(&states, train)?;
        }

        let pooled = self.attention.pool(&states, Some(&sentence_mask))?;
        let probabilities = self.head.forward(&pooled.pooled)?;
        Ok(DocumentEncoding {
            probabilities,
            word_attention: encoded
                .word_attention
                .reshape((batch, sentences, self.max_seq, 1))?,
            sentence_attention: pooled.weights,
        })
    }

    fn check_documents(&self, documents: &Tensor) -> Result<(usize, usize), ModelError> {
        if !documents.dtype().is_int() {
            return Err(ModelError::InvalidInput(format!(
                "documents must hold integer token ids, got {:?}",
                documents.dtype()
            )));
        }
        match documents.dims() {
            [batch, sentences, steps] if *steps == self.max_seq => {
                if *batch == 0 || *sentences == 0 {
                    return Err(ModelError::InvalidInput(format!(
                        "documents must have non-zero batch and sentence axes, got {:?}",
                        documents.dims()
                    )));
                }
                Ok((*batch, *sentences))
            }
            dims => Err(ModelError::InvalidInput(format!(
                "documents must be shaped (batch, sentences, {}), got {dims:?}",
                self.max_seq
            ))),
        }
    }
}
