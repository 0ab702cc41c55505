//! Building blocks for the hierarchical attention encoder.
//!
//! The crate hosts the pieces the word and sentence levels share: shape
//! assertions, seeded parameter initialisation, train-only dropout, the
//! padding-aware bidirectional recurrent encoder, and the dense output head.
//! Everything is assembled from Candle primitives; parameters are created
//! through [`candle_nn::VarBuilder`] so a single [`candle_nn::VarMap`] owns them.

pub mod checks;
pub mod dense;
pub mod dropout;
pub mod init;
pub mod recurrent;

pub use dense::{Dense, DenseActivation};
pub use dropout::Dropout;
pub use init::{glorot_bound, reseed_parameters, InitPolicy};
pub use recurrent::{Bidirectional, BidirectionalConfig, RecurrentKind};
