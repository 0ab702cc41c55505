//! Seeded parameter initialisation.
//!
//! Candle's CPU backend cannot be seeded, so layers are first created through a
//! [`VarMap`] with Candle's own initialisers. When a seed is supplied,
//! [`reseed_parameters`] overwrites every variable in name order from a
//! [`StdRng`], which makes graph construction reproducible. The sampling policy
//! for each variable is derived from the final segment of its name.

use candle_core::{Error, Result, Tensor};
use candle_nn::VarMap;
use rand::{
    distributions::{Distribution, Uniform},
    rngs::StdRng,
    SeedableRng,
};

/// Half-width of the uniform range used for learned embedding tables.
pub const EMBEDDING_INIT_BOUND: f64 = 0.05;

/// Supported initialisation policies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitPolicy {
    /// Xavier/Glorot uniform initialisation.
    GlorotUniform,
    /// Uniform samples in `[-bound, bound]`.
    Uniform { bound: f64 },
    /// All zeros (biases).
    Zeros,
}

impl InitPolicy {
    /// Chooses the policy for a parameter from its dotted name.
    pub fn for_parameter(name: &str) -> Self {
        let leaf = name.rsplit('.').next().unwrap_or(name);
        if leaf.starts_with("bias") {
            InitPolicy::Zeros
        } else if leaf == "embeddings" {
            InitPolicy::Uniform {
                bound: EMBEDDING_INIT_BOUND,
            }
        } else {
            InitPolicy::GlorotUniform
        }
    }

    /// Draws `dims.iter().product()` values from `rng`.
    pub fn sample(&self, dims: &[usize], rng: &mut StdRng) -> Vec<f32> {
        let count = dims.iter().product::<usize>();
        let bound = match self {
            InitPolicy::Zeros => return vec![0.0; count],
            InitPolicy::Uniform { bound } => *bound,
            InitPolicy::GlorotUniform => glorot_bound(dims),
        };
        if bound <= 0.0 {
            return vec![0.0; count];
        }
        let dist = Uniform::new_inclusive(-bound as f32, bound as f32);
        (0..count).map(|_| dist.sample(rng)).collect()
    }
}

/// Glorot uniform bound `sqrt(6 / (fan_in + fan_out))`.
///
/// Matrices use their two axes as fans. Any other rank uses
/// `sqrt(prod(dims))` for both fans, so a context vector of length `n` gets
/// `sqrt(3 / sqrt(n))`.
pub fn glorot_bound(dims: &[usize]) -> f64 {
    let (fan_in, fan_out) = match dims {
        [rows, cols] => (*cols as f64, *rows as f64),
        other => {
            let fan = (other.iter().product::<usize>() as f64).sqrt();
            (fan, fan)
        }
    };
    if fan_in + fan_out <= 0.0 {
        return 0.0;
    }
    (6.0 / (fan_in + fan_out)).sqrt()
}

/// Re-initialises every variable of `varmap` deterministically from `seed`.
///
/// Variables are visited in lexicographic name order so the result does not
/// depend on hash-map iteration order.
pub fn reseed_parameters(varmap: &VarMap, seed: u64) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Msg("parameter store mutex poisoned".into()))?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut rng = StdRng::seed_from_u64(seed);
    for name in names {
        let var = &data[name];
        let dims = var.dims().to_vec();
        let policy = InitPolicy::for_parameter(name);
        let values = policy.sample(&dims, &mut rng);
        let fresh = Tensor::from_vec(values, dims, var.device())?.to_dtype(var.dtype())?;
        var.set(&fresh)?;
    }
    log::debug!("reseeded {} parameters with seed {}", data.len(), seed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    #[test]
    fn policy_follows_parameter_names() {
        assert_eq!(InitPolicy::for_parameter("head.bias"), InitPolicy::Zeros);
        assert_eq!(
            InitPolicy::for_parameter("rnn.forward.bias_ih_l0"),
            InitPolicy::Zeros
        );
        assert_eq!(
            InitPolicy::for_parameter("sentence_encoder.embedding.embeddings"),
            InitPolicy::Uniform {
                bound: EMBEDDING_INIT_BOUND
            }
        );
        assert_eq!(
            InitPolicy::for_parameter("attention.context"),
            InitPolicy::GlorotUniform
        );
    }

    #[test]
    fn glorot_bound_uses_sqrt_fans_for_vectors() {
        let matrix = glorot_bound(&[4, 8]);
        assert!((matrix - (6.0f64 / 12.0).sqrt()).abs() < 1e-12);

        let vector = glorot_bound(&[16]);
        assert!((vector - (6.0f64 / 8.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn samples_stay_within_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let dims = [32, 16];
        let bound = glorot_bound(&dims) as f32;
        let values = InitPolicy::GlorotUniform.sample(&dims, &mut rng);
        assert_eq!(values.len(), 512);
        assert!(values.iter().all(|v| v.abs() <= bound));
        assert!(InitPolicy::Zeros
            .sample(&dims, &mut rng)
            .iter()
            .all(|v| *v == 0.0));
    }

    #[test]
    fn reseeding_is_reproducible() -> Result<()> {
        let device = Device::Cpu;
        let build = |seed: u64| -> Result<Vec<f32>> {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let weight = vb.get_with_hints((3, 5), "proj.weight", Init::Const(0.0))?;
            let bias = vb.get_with_hints(3, "proj.bias", Init::Const(1.0))?;
            reseed_parameters(&varmap, seed)?;
            assert!(bias.to_vec1::<f32>()?.iter().all(|v| *v == 0.0));
            weight.flatten_all()?.to_vec1::<f32>()
        };
        let first = build(11)?;
        let second = build(11)?;
        let other = build(12)?;
        assert_eq!(first, second);
        assert_ne!(first, other);
        Ok(())
    }
}
