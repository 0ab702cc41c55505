//! Front end for the hierarchical attention network: device selection and
//! batch prediction over JSON-lines documents.

pub mod predict;

pub use model;
pub use training;

use candle_core::Device;

pub use predict::{predict_dataset, DocumentPrediction};

/// CPU when `CANDLE_FORCE_CPU` is set, otherwise the best available backend.
pub fn setup_device() -> Device {
    if std::env::var("CANDLE_FORCE_CPU").is_ok() {
        log::info!("CANDLE_FORCE_CPU set, using CPU backend");
        return Device::Cpu;
    }
    training::select_device()
}
