//! Token embedding table with zero-id masking.
//!
//! Learned tables are registered in the caller's parameter store under
//! `embeddings` and sampled uniformly in `[-0.05, 0.05]`. Pretrained tables
//! are plain tensors kept outside the store, so optimizers built from the
//! store never update them.

use std::path::Path;

use candle_core::{bail, DType, Device, Error, Result, Tensor};
use candle_nn::{Init, VarBuilder};
use layers::{checks, init::EMBEDDING_INIT_BOUND};

/// Where the embedding table comes from.
#[derive(Debug, Clone)]
pub enum EmbeddingSource {
    /// Randomly initialised, trainable table.
    Learned {
        vocab_size: usize,
        embedding_dim: usize,
    },
    /// Fixed `(vocab_size, embedding_dim)` matrix.
    Pretrained(Tensor),
}

/// Token embedding lookup that also reports which positions hold content.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    table: Tensor,
    vocab_size: usize,
    embedding_dim: usize,
    trainable: bool,
}

impl TokenEmbedding {
    pub fn new(source: EmbeddingSource, vb: VarBuilder) -> Result<Self> {
        match source {
            EmbeddingSource::Learned {
                vocab_size,
                embedding_dim,
            } => {
                if vocab_size == 0 {
                    bail!("token embedding requires vocab_size > 0");
                }
                if embedding_dim == 0 {
                    bail!("token embedding requires embedding_dim > 0");
                }
                let table = vb.get_with_hints(
                    (vocab_size, embedding_dim),
                    "embeddings",
                    Init::Uniform {
                        lo: -EMBEDDING_INIT_BOUND,
                        up: EMBEDDING_INIT_BOUND,
                    },
                )?;
                Ok(Self {
                    table,
                    vocab_size,
                    embedding_dim,
                    trainable: true,
                })
            }
            EmbeddingSource::Pretrained(matrix) => {
                checks::expect_rank("pretrained embeddings", &matrix, 2)?;
                let (vocab_size, embedding_dim) = matrix.dims2()?;
                if vocab_size == 0 || embedding_dim == 0 {
                    bail!("pretrained embeddings must be non-empty, got {vocab_size}x{embedding_dim}");
                }
                let table = matrix
                    .to_device(vb.device())?
                    .to_dtype(vb.dtype())?
                    .detach();
                log::debug!("using frozen pretrained embeddings {vocab_size}x{embedding_dim}");
                Ok(Self {
                    table,
                    vocab_size,
                    embedding_dim,
                    trainable: false,
                })
            }
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Whether the table lives in the parameter store and receives updates.
    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    /// Returns a clone of the underlying table.
    pub fn weight(&self) -> Tensor {
        self.table.clone()
    }

    /// Looks up embeddings for `(batch, steps)` ids.
    ///
    /// Returns the `(batch, steps, embedding_dim)` vectors together with the
    /// `(batch, steps)` mask that is `1.0` where the id is nonzero. Id `0` is a
    /// regular row of the table; only the mask marks it as padding.
    pub fn forward(&self, token_ids: &Tensor) -> Result<(Tensor, Tensor)> {
        checks::expect_rank("token_ids", token_ids, 2)?;
        checks::expect_integer("token_ids", token_ids)?;
        let (batch, steps) = token_ids.dims2()?;
        if batch == 0 || steps == 0 {
            bail!("token_ids must have non-zero batch and seq dimensions");
        }

        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let embeddings = self
            .table
            .index_select(&flat, 0)?
            .reshape((batch, steps, self.embedding_dim))?;
        let mask = attention::masks::token_mask(token_ids)?;
        Ok((embeddings, mask))
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min(0)?.to_scalar::<i64>()?;
        if min_id < 0 {
            return Err(Error::Msg(format!(
                "encountered negative token id {min_id} (minimum)"
            )));
        }
        let max_id = flat_ids.max(0)?.to_scalar::<i64>()?;
        let vocab = self.vocab_size as i64;
        if max_id >= vocab {
            return Err(Error::Msg(format!(
                "token id {max_id} exceeds vocab size {vocab}"
            )));
        }
        Ok(())
    }
}

/// Loads a `(vocab_size, embedding_dim)` matrix from `.npy` or `.safetensors`.
///
/// Safetensors files must hold a tensor named `embeddings` or exactly one
/// tensor. The result is converted to `f32` on `device`.
pub fn load_pretrained_matrix(path: impl AsRef<Path>, device: &Device) -> Result<Tensor> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    let matrix = match extension.as_deref() {
        Some("npy") => Tensor::read_npy(path)?,
        Some("safetensors") => {
            let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
            match tensors.remove("embeddings") {
                Some(tensor) => tensor,
                None if tensors.len() == 1 => match tensors.into_values().next() {
                    Some(tensor) => tensor,
                    None => bail!("{} holds no tensors", path.display()),
                },
                None => bail!(
                    "{} holds {} tensors and none is named 'embeddings'",
                    path.display(),
                    tensors.len()
                ),
            }
        }
        _ => bail!(
            "unsupported embedding file {}, expected .npy or .safetensors",
            path.display()
        ),
    };
    checks::expect_rank("pretrained embeddings", &matrix, 2)?;
    log::debug!(
        "loaded pretrained embeddings {:?} from {}",
        matrix.dims(),
        path.display()
    );
    matrix.to_dtype(DType::F32)?.to_device(device)
}
