use std::{fmt::Display, path::PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    tensor::backend::{AutodiffBackend, Backend},
    train::TrainStep,
};

use super::{
    batcher::{Infer, Train},
    output::{Output, SpanLogits},
};

/// The common model configuration properties needed for the pipeline
pub struct Config {
    /// The padding token ID
    pub pad_token_id: usize,

    /// The max position embeddings
    pub max_position_embeddings: usize,

    /// The size of the hidden state
    pub hidden_size: usize,

    /// An optional max sequence length, if different from max position embeddings
    pub max_seq_len: Option<usize>,

    /// The hidden dropout probability
    pub hidden_dropout_prob: f64,
}

/// A model that predicts answer spans
pub trait SpanModel<B: Backend>: Module<B> {
    /// Defines forward pass for inference
    fn infer(&self, input: Infer<B>) -> SpanLogits<B>;
}

/// A trait for models that can be fine-tuned for Question Answering
pub trait Model<B>:
    SpanModel<B> + AutodiffModule<B> + TrainStep<Train<B>, Output<B>> + Display
where
    B: AutodiffBackend,
{
    /// The model configuration
    type Config: ModelConfig;

    /// Perform a forward pass
    fn forward(&self, item: Train<B>) -> Output<B>;

    /// Load pretrained weights, with a freshly initialized span prediction head
    fn load_from_safetensors(
        device: &B::Device,
        model_file: PathBuf,
        config: Self::Config,
    ) -> anyhow::Result<Self>;
}

/// A trait for configs that can be used for Question Answering models
pub trait ModelConfig: burn::config::Config + Clone {
    /// Initialize the model
    fn init<B: Backend>(&self, device: &B::Device) -> impl SpanModel<B>;

    /// Initialize the model with pretrained weights. A span prediction head missing from the
    /// weights is freshly initialized.
    fn load_safetensors<B: Backend>(
        &self,
        device: &B::Device,
        model_file: PathBuf,
    ) -> anyhow::Result<impl SpanModel<B>>;

    /// Load a pretrained model configuration
    fn load_pretrained(config_file: PathBuf) -> anyhow::Result<Self>;

    /// Set the hidden dropout probability
    fn set_hidden_dropout_prob(&mut self, hidden_dropout_prob: f64);

    /// Return the Config needed for the question answering pipeline
    fn get_config(&self) -> Config;
}
