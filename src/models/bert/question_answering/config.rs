//! Adapt BERT to the Question Answering pipeline

use std::path::PathBuf;

use bert_burn::model::{BertModel, BertModelConfig};
use burn::{
    config::Config as _,
    module::Module,
    nn::{LinearConfig, LinearRecord},
    tensor::backend::Backend,
};

use crate::pipelines::question_answering::{self, SpanModel};

use super::{Model, ModelRecord};

/// The Model Configuration
#[derive(burn::config::Config)]
pub struct Config {
    // -- Fields copied from BertModelConfig because #[serde(flatten)] is not supported yet
    /// Number of attention heads in the multi-head attention
    pub num_attention_heads: usize,
    /// Number of transformer encoder layers/blocks
    pub num_hidden_layers: usize,
    /// Layer normalization epsilon
    pub layer_norm_eps: f64,
    /// Size of bert embedding (e.g., 768 for roberta-base)
    pub hidden_size: usize,
    /// Size of the intermediate position wise feedforward layer
    pub intermediate_size: usize,
    /// Size of the vocabulary
    pub vocab_size: usize,
    /// Max position embeddings, in RoBERTa equal to max_seq_len + 2 (514), for BERT equal to max_seq_len(512)
    pub max_position_embeddings: usize,
    /// Identifier for sentence type in input (e.g., 0 for single sentence, 1 for pair)
    pub type_vocab_size: usize,
    /// Dropout value across layers, typically 0.1
    pub hidden_dropout_prob: f64,
    /// BERT model name (roberta)
    pub model_type: String,
    /// Index of the padding token
    pub pad_token_id: usize,
    /// Maximum sequence length for the tokenizer
    pub max_seq_len: Option<usize>,
    // -- End fields copied from BertModelConfig
}

impl Config {
    /// Copy the pretrained BERT configuration
    pub fn from_bert_config(model: BertModelConfig) -> Self {
        Config::new(
            model.num_attention_heads,
            model.num_hidden_layers,
            model.layer_norm_eps,
            model.hidden_size,
            model.intermediate_size,
            model.vocab_size,
            model.max_position_embeddings,
            model.type_vocab_size,
            model.hidden_dropout_prob,
            model.model_type,
            model.pad_token_id,
        )
        .with_max_seq_len(model.max_seq_len)
    }

    /// Get the Bert model configuration. Span prediction works on the token states, so the
    /// pooling layer is left out.
    pub fn get_bert_config(&self) -> BertModelConfig {
        BertModelConfig::new(
            self.num_attention_heads,
            self.num_hidden_layers,
            self.layer_norm_eps,
            self.hidden_size,
            self.intermediate_size,
            self.vocab_size,
            self.max_position_embeddings,
            self.type_vocab_size,
            self.hidden_dropout_prob,
            self.model_type.clone(),
            self.pad_token_id,
        )
        .with_max_seq_len(self.max_seq_len)
        .with_with_pooling_layer(Some(false))
    }

    /// Initialize the model
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let model = self.get_bert_config().init(device);

        let output = LinearConfig::new(self.hidden_size, 2).init(device);

        Model { model, output }
    }

    /// Initialize the model with pretrained BERT weights and a fresh span prediction head
    pub fn load_safetensors<B: Backend>(
        &self,
        device: &B::Device,
        model_file: PathBuf,
    ) -> Model<B> {
        let output = LinearConfig::new(self.hidden_size, 2).init(device);

        let record = ModelRecord {
            model: BertModel::from_safetensors(model_file, device, self.get_bert_config()),
            output: LinearRecord {
                weight: output.weight,
                bias: output.bias,
            },
        };

        self.init(device).load_record(record)
    }
}

impl question_answering::ModelConfig for Config {
    /// Initialize the model
    fn init<B: Backend>(&self, device: &B::Device) -> impl SpanModel<B> {
        self.init(device)
    }

    fn load_safetensors<B: Backend>(
        &self,
        device: &B::Device,
        model_file: PathBuf,
    ) -> anyhow::Result<impl SpanModel<B>> {
        Ok(self.load_safetensors(device, model_file))
    }

    /// Load a pretrained model configuration
    fn load_pretrained(config_file: PathBuf) -> anyhow::Result<Self> {
        let bert_config = BertModelConfig::load(&config_file).map_err(|e| {
            anyhow!(
                "Unable to load Hugging Face Config file {}: {}",
                config_file.display(),
                e
            )
        })?;

        Ok(Config::from_bert_config(bert_config))
    }

    fn set_hidden_dropout_prob(&mut self, hidden_dropout_prob: f64) {
        self.hidden_dropout_prob = hidden_dropout_prob;
    }

    fn get_config(&self) -> question_answering::Config {
        question_answering::Config {
            pad_token_id: self.pad_token_id,
            max_position_embeddings: self.max_position_embeddings,
            hidden_size: self.hidden_size,
            max_seq_len: self.max_seq_len,
            hidden_dropout_prob: self.hidden_dropout_prob,
        }
    }
}
