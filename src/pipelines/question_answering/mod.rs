/// Training and evaluation parameters
pub mod config;

/// Context windowing and answer span alignment
pub mod features;

/// Batching features into tensors
pub mod batcher;

/// Span prediction outputs
pub mod output;

/// Model traits for span prediction
pub mod model;

/// Learning rate schedule
pub mod schedule;

/// Fine-tuning
pub mod training;

/// Evaluation of saved models
pub mod evaluation;

/// Decoding logits into answer texts
pub mod predictions;

/// SQuAD exact match and F1
pub mod metrics;

pub use batcher::Batcher;
pub use config::Training;
pub use evaluation::{evaluate, Checkpoint};
pub use model::{Config, Model, ModelConfig, SpanModel};
pub use output::{Output, SpanLogits};
pub use training::train;
