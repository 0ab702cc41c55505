pub mod checkpoint;
pub mod config;
pub mod data;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod overrides;
pub mod trainer;

pub use config::{TrainingConfig, TrainingError};
pub use data::{Document, DocumentBatch, DocumentBatcher, DocumentDataset};
pub use loss::{BinaryCrossEntropyLoss, LossMetrics, LossOutput};
pub use metrics::EvaluationSummary;
pub use optimizer::TrainerOptimizer;
pub use overrides::{apply_overrides, OverrideArg};
pub use trainer::{select_device, EpochReport, Trainer};
