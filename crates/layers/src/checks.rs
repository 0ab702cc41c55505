//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking. Every helper takes a
//! `label` naming the tensor under test so messages point at the failing site.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let dims = tensor.dims();
    if dims.len() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected rank {rank}, got shape {dims:?}"
        )))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Validates the `(batch, steps, features)` convention with a known feature size.
///
/// Zero-length batch or step axes are rejected since recurrent and pooling
/// stages cannot produce a meaningful result for them.
pub fn expect_batch_seq_hidden(label: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [batch, steps, actual] if *actual == hidden => {
            if *batch == 0 || *steps == 0 {
                Err(Error::Msg(format!(
                    "{label}: batch/steps dimensions must be non-zero, got {:?}",
                    tensor.dims()
                )))
            } else {
                Ok(())
            }
        }
        dims => Err(Error::Msg(format!(
            "{label}: expected (batch, steps, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Checks the tensor holds integer ids.
pub fn expect_integer(label: &str, tensor: &Tensor) -> Result<()> {
    let dtype = tensor.dtype();
    if dtype.is_int() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected integer dtype, got {dtype:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn rank_and_shape_mismatches_are_reported_with_label() -> Result<()> {
        let tensor = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        expect_rank("sample", &tensor, 2)?;
        let err = expect_rank("sample", &tensor, 3).unwrap_err();
        assert!(err.to_string().contains("sample: expected rank 3"));

        expect_shape("sample", &tensor, &[2, 3])?;
        assert!(expect_shape("sample", &tensor, &[3, 2]).is_err());
        Ok(())
    }

    #[test]
    fn batch_seq_hidden_rejects_empty_axes() -> Result<()> {
        let device = Device::Cpu;
        let ok = Tensor::zeros((2, 4, 8), DType::F32, &device)?;
        expect_batch_seq_hidden("states", &ok, 8)?;
        assert!(expect_batch_seq_hidden("states", &ok, 6).is_err());

        let empty = Tensor::zeros((2, 0, 8), DType::F32, &device)?;
        assert!(expect_batch_seq_hidden("states", &empty, 8).is_err());
        Ok(())
    }

    #[test]
    fn integer_check_distinguishes_ids_from_floats() -> Result<()> {
        let device = Device::Cpu;
        let ids = Tensor::new(&[1u32, 2, 0], &device)?;
        let floats = Tensor::new(&[1f32, 2.0], &device)?;
        expect_integer("ids", &ids)?;
        assert!(expect_integer("ids", &floats).is_err());
        expect_dtype_in("floats", &floats, &[DType::F32, DType::F64])?;
        assert!(expect_dtype_in("ids", &ids, &[DType::F32]).is_err());
        Ok(())
    }
}
