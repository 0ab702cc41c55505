use attention::PoolingConfig;
use candle_core::{DType, Device};
use layers::RecurrentKind;
use model::{EmbeddingSpec, HanConfig, ModelError};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub model: ModelSection,
    pub data: DataConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl TrainingConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: TrainingConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        Self::from_path(path)
    }

    /// Checks every section and reports all problems at once.
    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        if self.model.max_seq == 0 {
            errors.push("model.max_seq must be greater than 0".to_string());
        }

        if self.model.pretrained_embeddings.is_none() {
            if self.model.vocab_size.is_none() {
                errors.push(
                    "model.vocab_size is required without model.pretrained_embeddings".to_string(),
                );
            }
            if self.model.embedding_size.is_none() {
                errors.push(
                    "model.embedding_size is required without model.pretrained_embeddings"
                        .to_string(),
                );
            }
        }

        if self.model.word_rnn_size == 0 {
            errors.push("model.word_rnn_size must be greater than 0".to_string());
        }

        if self.model.sentence_rnn_size == 0 {
            errors.push("model.sentence_rnn_size must be greater than 0".to_string());
        }

        for (label, p) in [
            ("model.drop_word_emb", self.model.drop_word_emb),
            ("model.drop_word_rnn_out", self.model.drop_word_rnn_out),
            ("model.drop_sentence_rnn_out", self.model.drop_sentence_rnn_out),
        ] {
            if !(0.0..1.0).contains(&p) {
                errors.push(format!("{label} must be in [0, 1) (got {p})"));
            }
        }

        if self.data.train_path.as_os_str().is_empty() {
            errors.push("data.train_path must not be empty".to_string());
        }

        if self.data.batch_size == 0 {
            errors.push("data.batch_size must be greater than 0".to_string());
        }

        if let Some(0) = self.data.max_sentences {
            errors.push("data.max_sentences must be greater than 0".to_string());
        }

        if self.optimizer.learning_rate <= 0.0 {
            errors.push("optimizer.learning_rate must be greater than 0".to_string());
        }

        if self.optimizer.weight_decay < 0.0 {
            errors.push("optimizer.weight_decay must be >= 0".to_string());
        }

        if !(0.0 < self.optimizer.beta1 && self.optimizer.beta1 < 1.0) {
            errors.push("optimizer.beta1 must be in (0, 1)".to_string());
        }

        if !(0.0 < self.optimizer.beta2 && self.optimizer.beta2 < 1.0) {
            errors.push("optimizer.beta2 must be in (0, 1)".to_string());
        }

        if self.optimizer.epsilon <= 0.0 {
            errors.push("optimizer.epsilon must be greater than 0".to_string());
        }

        if self.runtime.epochs == 0 {
            errors.push("runtime.epochs must be greater than 0".to_string());
        }

        if self.runtime.log_every_n_steps == 0 {
            errors.push("runtime.log_every_n_steps must be greater than 0".to_string());
        }

        if let Some(dir) = &self.runtime.checkpoint_dir {
            if dir.as_os_str().is_empty() {
                errors.push("runtime.checkpoint_dir must not be empty".to_string());
            }
        }

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }

        Ok(())
    }

    fn apply_base_path(&mut self, base: &Path) {
        self.model.apply_base_path(base);
        self.data.apply_base_path(base);
        self.runtime.apply_base_path(base);
    }

    /// Builds the network configuration, loading pretrained embeddings when a
    /// path is configured.
    pub fn han_config(&self, device: &Device) -> Result<HanConfig, TrainingError> {
        let embedding = match &self.model.pretrained_embeddings {
            Some(path) => {
                let matrix = embedding::load_pretrained_matrix(path, device).map_err(|err| {
                    TrainingError::initialization(format!(
                        "failed to load pretrained embeddings {}: {err}",
                        path.display()
                    ))
                })?;
                EmbeddingSpec::Pretrained(matrix)
            }
            None => EmbeddingSpec::Learned {
                vocab_size: self.model.vocab_size,
                embedding_size: self.model.embedding_size,
            },
        };

        let config = HanConfig {
            max_seq: self.model.max_seq,
            embedding,
            recurrent: self.model.recurrent,
            word_rnn_size: self.model.word_rnn_size,
            sentence_rnn_size: self.model.sentence_rnn_size,
            drop_word_emb: self.model.drop_word_emb,
            drop_word_rnn_out: self.model.drop_word_rnn_out,
            drop_sentence_rnn_out: self.model.drop_sentence_rnn_out,
            pooling: PoolingConfig::default().stabilized(self.model.stabilize_attention),
            seed: Some(self.runtime.seed),
            dtype: DType::F32,
            device: device.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    pub max_seq: usize,
    #[serde(default)]
    pub vocab_size: Option<usize>,
    #[serde(default)]
    pub embedding_size: Option<usize>,
    /// `.npy` or `.safetensors` matrix; replaces the learned table when set.
    #[serde(default)]
    pub pretrained_embeddings: Option<PathBuf>,
    #[serde(default)]
    pub recurrent: RecurrentKind,
    #[serde(default = "default_rnn_size")]
    pub word_rnn_size: usize,
    #[serde(default = "default_rnn_size")]
    pub sentence_rnn_size: usize,
    #[serde(default = "default_drop_word_emb")]
    pub drop_word_emb: f32,
    #[serde(default = "default_drop_word_rnn_out")]
    pub drop_word_rnn_out: f32,
    #[serde(default = "default_drop_sentence_rnn_out")]
    pub drop_sentence_rnn_out: f32,
    #[serde(default)]
    pub stabilize_attention: bool,
}

impl ModelSection {
    fn apply_base_path(&mut self, base: &Path) {
        if let Some(path) = self.pretrained_embeddings.as_mut() {
            absolutize_in_place(path, base);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub train_path: PathBuf,
    #[serde(default)]
    pub validation_path: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    /// Documents longer than this keep only their first sentences.
    #[serde(default)]
    pub max_sentences: Option<usize>,
}

impl DataConfig {
    fn apply_base_path(&mut self, base: &Path) {
        absolutize_in_place(&mut self.train_path, base);
        if let Some(path) = self.validation_path.as_mut() {
            absolutize_in_place(path, base);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_adam_eps")]
    pub epsilon: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            weight_decay: 0.0,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_adam_eps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_log_every_n_steps")]
    pub log_every_n_steps: usize,
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
    /// One checkpoint per epoch is written here when set.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            seed: default_seed(),
            log_every_n_steps: default_log_every_n_steps(),
            enable_stdout: default_enable_stdout(),
            checkpoint_dir: None,
        }
    }
}

impl RuntimeConfig {
    fn apply_base_path(&mut self, base: &Path) {
        if let Some(dir) = self.checkpoint_dir.as_mut() {
            absolutize_in_place(dir, base);
        }
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn default_rnn_size() -> usize {
    100
}

fn default_drop_word_emb() -> f32 {
    0.2
}

fn default_drop_word_rnn_out() -> f32 {
    0.2
}

fn default_drop_sentence_rnn_out() -> f32 {
    0.5
}

fn default_batch_size() -> usize {
    32
}

fn default_shuffle() -> bool {
    true
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_adam_eps() -> f64 {
    1e-8
}

fn default_epochs() -> usize {
    10
}

fn default_seed() -> u64 {
    42
}

fn default_log_every_n_steps() -> usize {
    10
}

fn default_enable_stdout() -> bool {
    true
}

#[derive(Debug)]
pub enum TrainingError {
    Io(std::io::Error),
    ConfigFormat(String),
    Validation(Vec<String>),
    Initialization(String),
    Data(String),
    Model(ModelError),
    Runtime(String),
}

impl TrainingError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::Io(err) => write!(f, "i/o failure: {}", err),
            TrainingError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            TrainingError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            TrainingError::Initialization(msg) => {
                write!(f, "trainer initialization failed: {}", msg)
            }
            TrainingError::Data(msg) => write!(f, "invalid dataset: {}", msg),
            TrainingError::Model(err) => write!(f, "model error: {}", err),
            TrainingError::Runtime(msg) => write!(f, "training failed: {}", msg),
        }
    }
}

impl std::error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainingError::Io(err) => Some(err),
            TrainingError::Model(err) => Some(err),
            TrainingError::ConfigFormat(_)
            | TrainingError::Validation(_)
            | TrainingError::Initialization(_)
            | TrainingError::Data(_)
            | TrainingError::Runtime(_) => None,
        }
    }
}

impl From<std::io::Error> for TrainingError {
    fn from(value: std::io::Error) -> Self {
        TrainingError::Io(value)
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<ModelError> for TrainingError {
    fn from(value: ModelError) -> Self {
        TrainingError::Model(value)
    }
}

impl From<candle_core::Error> for TrainingError {
    fn from(value: candle_core::Error) -> Self {
        TrainingError::Runtime(value.to_string())
    }
}
