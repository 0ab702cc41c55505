pub mod config;
pub mod document;
pub mod encoder;
pub mod errors;
pub mod model;

pub use config::{EmbeddingSpec, HanConfig};
pub use document::{DocumentEncoder, DocumentEncoding};
pub use encoder::{SentenceAttentionInspector, SentenceEncoder, SentenceEncoding};
pub use errors::ModelError;
pub use model::{
    build_models, AttentionDiagnostics, DiagnosticOutput, DocumentClassifier,
    HierarchicalAttentionNetwork,
};
