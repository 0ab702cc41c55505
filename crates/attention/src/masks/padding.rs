//! Builders for word- and sentence-level padding masks.

use candle_core::{Result, Tensor};
use layers::checks;

use super::MASK_DTYPE;

/// Word mask for `[batch, steps]` token ids: `1.0` wherever the id is nonzero.
pub fn token_mask(ids: &Tensor) -> Result<Tensor> {
    checks::expect_rank("token_mask.ids", ids, 2)?;
    checks::expect_integer("token_mask.ids", ids)?;
    ids.ne(0u32)?.to_dtype(MASK_DTYPE)
}

/// Sentence mask for `[batch, sentences, max_seq]` documents.
///
/// A sentence row is content when any of its ids is nonzero, so a row that
/// is all zeros is padding regardless of the word masks inside it.
pub fn sentence_mask(documents: &Tensor) -> Result<Tensor> {
    checks::expect_rank("sentence_mask.documents", documents, 3)?;
    checks::expect_integer("sentence_mask.documents", documents)?;
    documents.ne(0u32)?.to_dtype(MASK_DTYPE)?.max(2)
}
