use std::path::{Path, PathBuf};

use burn::LearningRate;

use crate::cli::datasets::Dataset;

use super::features::Windowing;

/// The file name training arguments are saved under
pub static TRAINING_ARGS_FILE: &str = "training_args.json";

/// Training and evaluation parameters
#[derive(burn::config::Config)]
pub struct Training {
    /// Model type (e.g., "bert" or "roberta")
    #[config(default = "\"bert\".to_string()")]
    pub model_type: String,

    /// Model name on the Hugging Face Hub, or a local directory
    pub model_name_or_path: String,

    /// The directory where checkpoints, the final model and predictions are written
    pub output_dir: String,

    /// The directory holding the SQuAD files and the feature caches
    #[config(default = "\"data\".to_string()")]
    pub data_dir: String,

    /// Training file name within the data directory
    pub train_file: Option<String>,

    /// Evaluation file name within the data directory
    pub predict_file: Option<String>,

    /// Use SQuAD v2.0, where some questions have no answer
    #[config(default = false)]
    pub version_2_with_negative: bool,

    /// Predict the null answer when its score exceeds the best span score by this much
    #[config(default = 0.0)]
    pub null_score_diff_threshold: f32,

    /// Maximum input length after tokenization, longer contexts are windowed
    #[config(default = 384)]
    pub max_seq_length: usize,

    /// Step between context windows
    #[config(default = 128)]
    pub doc_stride: usize,

    /// Maximum number of question tokens
    #[config(default = 64)]
    pub max_query_length: usize,

    /// Whether the model is uncased, used when realigning predicted text
    #[config(default = false)]
    pub do_lower_case: bool,

    /// Batch size per device for training
    #[config(default = 8)]
    pub train_batch_size: usize,

    /// Batch size for evaluation
    #[config(default = 8)]
    pub eval_batch_size: usize,

    /// Initial learning rate
    #[config(default = 5e-5)]
    pub learning_rate: LearningRate,

    /// Number of batches to accumulate before an optimizer step
    #[config(default = 1)]
    pub gradient_accumulation_steps: usize,

    /// Weight decay
    #[config(default = 0.0)]
    pub weight_decay: f32,

    /// Adam epsilon
    #[config(default = 1e-8)]
    pub adam_epsilon: f32,

    /// Gradient norm clipping
    #[config(default = 1.0)]
    pub max_grad_norm: f32,

    /// Number of epochs
    #[config(default = 3)]
    pub num_train_epochs: usize,

    /// Total number of optimizer steps, overriding the number of epochs when positive
    #[config(default = 0)]
    pub max_steps: usize,

    /// Linear warmup steps
    #[config(default = 0)]
    pub warmup_steps: usize,

    /// Dropout rate
    #[config(default = 0.1)]
    pub hidden_dropout_prob: f64,

    /// Number of training features sampled for validation loss at the end of each epoch
    #[config(default = 1000)]
    pub valid_samples: usize,

    /// Number of n-best predictions to keep per question
    #[config(default = 20)]
    pub n_best_size: usize,

    /// Maximum length of a predicted answer, in tokens
    #[config(default = 30)]
    pub max_answer_length: usize,

    /// Random seed
    #[config(default = 42)]
    pub seed: u64,
}

impl Training {
    /// The selected SQuAD version
    pub fn dataset(&self) -> Dataset {
        Dataset::from_version(self.version_2_with_negative)
    }

    /// The windowing parameters for feature conversion
    pub fn windowing(&self) -> Windowing {
        Windowing::new(self.max_seq_length, self.doc_stride, self.max_query_length)
    }

    /// Path to the training file
    pub fn train_path(&self) -> PathBuf {
        let file = self
            .train_file
            .clone()
            .unwrap_or_else(|| self.dataset().train_file().to_string());

        Path::new(&self.data_dir).join(file)
    }

    /// Path to the evaluation file
    pub fn predict_path(&self) -> PathBuf {
        let file = self
            .predict_file
            .clone()
            .unwrap_or_else(|| self.dataset().dev_file().to_string());

        Path::new(&self.data_dir).join(file)
    }

    /// Validate parameter combinations that would fail later on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.doc_stride == 0 {
            return Err(ConfigError::Invalid("doc_stride must be positive".to_string()));
        }

        if self.max_query_length >= self.max_seq_length {
            return Err(ConfigError::Invalid(format!(
                "max_query_length ({}) must be lower than max_seq_length ({})",
                self.max_query_length, self.max_seq_length
            )));
        }

        if self.train_batch_size == 0 || self.eval_batch_size == 0 {
            return Err(ConfigError::Invalid("batch sizes must be positive".to_string()));
        }

        if self.gradient_accumulation_steps == 0 {
            return Err(ConfigError::Invalid(
                "gradient_accumulation_steps must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Config Error
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Parameters that cannot be used together
    #[error("invalid parameters: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_follow_the_squad_recipe() {
        let config = Training::new("bert-base-uncased".to_string(), "out".to_string());

        assert_eq!(config.max_seq_length, 384);
        assert_eq!(config.doc_stride, 128);
        assert_eq!(config.n_best_size, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn resolves_default_files_per_version() {
        let v1 = Training::new("bert-base-uncased".to_string(), "out".to_string());
        let v2 = v1.clone().with_version_2_with_negative(true);

        assert_eq!(v1.train_path(), Path::new("data/train-v1.1.json"));
        assert_eq!(v2.predict_path(), Path::new("data/dev-v2.0.json"));

        let custom = v1.with_predict_file(Some("mini.json".to_string()));
        assert_eq!(custom.predict_path(), Path::new("data/mini.json"));
    }

    #[test]
    fn rejects_a_zero_stride() {
        let config =
            Training::new("bert-base-uncased".to_string(), "out".to_string()).with_doc_stride(0);

        assert!(config.validate().is_err());
    }
}
