use std::path::Path;
use std::sync::Arc;

use candle_core::Tensor;
use candle_nn::{VarBuilder, VarMap};
use layers::reseed_parameters;
use rand::Rng;

use crate::{
    config::HanConfig,
    document::{DocumentEncoder, DocumentEncoding},
    errors::ModelError,
};

/// Hierarchical attention network assembled from the shared crates.
///
/// Owns the parameter store; [`classifier`](Self::classifier) and
/// [`diagnostics`](Self::diagnostics) hand out graphs over the same weights.
pub struct HierarchicalAttentionNetwork {
    config: HanConfig,
    varmap: VarMap,
    graph: Arc<DocumentEncoder>,
}

impl HierarchicalAttentionNetwork {
    /// Builds the parameter store and the graph according to `config`.
    pub fn new(config: HanConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, config.dtype, &config.device);

        let dropout_seed = config
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen::<u64>());
        let graph = Arc::new(DocumentEncoder::new(&config, dropout_seed, vb)?);

        if let Some(seed) = config.seed {
            reseed_parameters(&varmap, seed)?;
        }

        let network = Self {
            config,
            varmap,
            graph,
        };
        log::info!(
            "built hierarchical attention network: {} trainable parameters, max_seq {}, seed {:?}",
            network.parameter_count(),
            network.config.max_seq,
            network.config.seed
        );
        Ok(network)
    }

    pub fn config(&self) -> &HanConfig {
        &self.config
    }

    /// Parameter store holding every trainable tensor.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn graph(&self) -> &Arc<DocumentEncoder> {
        &self.graph
    }

    pub fn classifier(&self) -> DocumentClassifier {
        DocumentClassifier {
            graph: Arc::clone(&self.graph),
        }
    }

    pub fn diagnostics(&self) -> AttentionDiagnostics {
        AttentionDiagnostics {
            graph: Arc::clone(&self.graph),
        }
    }

    /// Number of scalar values in the parameter store.
    pub fn parameter_count(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|var| var.elem_count())
            .sum()
    }

    /// Writes every trainable parameter to a safetensors file.
    pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        self.varmap.save(path.as_ref())?;
        Ok(())
    }

    /// Overwrites the trainable parameters in place from a safetensors file.
    pub fn load_weights(&mut self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        self.varmap.load(path.as_ref())?;
        log::debug!("loaded weights from {}", path.as_ref().display());
        Ok(())
    }
}

/// Primary model: documents to `(batch, 1)` probabilities.
#[derive(Debug, Clone)]
pub struct DocumentClassifier {
    graph: Arc<DocumentEncoder>,
}

impl DocumentClassifier {
    pub fn forward(&self, documents: &Tensor, train: bool) -> Result<Tensor, ModelError> {
        Ok(self.graph.forward(documents, train)?.probabilities)
    }

    /// Inference-mode probabilities.
    pub fn predict(&self, documents: &Tensor) -> Result<Tensor, ModelError> {
        self.forward(documents, false)
    }
}

/// Probabilities together with both attention grids.
#[derive(Debug, Clone)]
pub struct DiagnosticOutput {
    /// `(batch, 1)`
    pub probabilities: Tensor,
    /// `(batch, sentences, max_seq, 1)`
    pub word_attention: Tensor,
    /// `(batch, sentences, 1)`
    pub sentence_attention: Tensor,
}

/// Diagnostic model over the same weights as [`DocumentClassifier`].
#[derive(Debug, Clone)]
pub struct AttentionDiagnostics {
    graph: Arc<DocumentEncoder>,
}

impl AttentionDiagnostics {
    /// Runs in inference mode.
    pub fn forward(&self, documents: &Tensor) -> Result<DiagnosticOutput, ModelError> {
        let DocumentEncoding {
            probabilities,
            word_attention,
            sentence_attention,
        } = self.graph.forward(documents, false)?;
        Ok(DiagnosticOutput {
            probabilities,
            word_attention,
            sentence_attention,
        })
    }
}

/// Builds a network and returns its primary and diagnostic views.
pub fn build_models(
    config: HanConfig,
) -> Result<(DocumentClassifier, AttentionDiagnostics), ModelError> {
    let network = HierarchicalAttentionNetwork::new(config)?;
    Ok((network.classifier(), network.diagnostics()))
}
