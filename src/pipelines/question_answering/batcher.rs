use std::fmt::Debug;

use burn::{
    data::dataloader,
    nn::attention::generate_padding_mask,
    tensor::{backend::Backend, Bool, Int, Tensor},
};
use derive_new::new;

use crate::utils::tensors;

use super::{features::Feature, model::Config};

/// An inference batch for question answering
#[derive(Debug, Clone, new)]
pub struct Infer<B: Backend> {
    /// Tokenized question and context as 2D tensor: [batch_size, max_seq_length]
    pub tokens: Tensor<B, 2, Int>,

    /// Padding mask for the tokenized text containing booleans for padding locations
    pub mask_pad: Tensor<B, 2, Bool>,
}

/// A training batch for question answering
#[derive(Clone, Debug, new)]
pub struct Train<B: Backend> {
    /// Model input
    pub input: Infer<B>,

    /// Token index of the answer start for each item: [batch_size]
    pub start_positions: Tensor<B, 1, Int>,

    /// Token index of the answer end for each item: [batch_size]
    pub end_positions: Tensor<B, 1, Int>,
}

/// Struct for batching question answering features
#[derive(Clone)]
pub struct Batcher<B: Backend> {
    /// Maximum sequence length for tokenized text
    pub max_seq_length: usize,

    /// ID of the padding token
    pub pad_token_id: usize,

    /// Device on which to perform computation (e.g., CPU or CUDA device)
    pub device: B::Device,
}

impl<B: Backend> Batcher<B> {
    /// Creates a new batcher
    pub fn new(config: Config, max_seq_length: usize, device: B::Device) -> Self {
        let model_max = config.max_seq_len.unwrap_or(config.max_position_embeddings);

        Self {
            max_seq_length: max_seq_length.min(model_max),
            pad_token_id: config.pad_token_id,
            device,
        }
    }

    /// Collects features into an inference batch, padding to the longest feature
    pub fn infer(&self, features: &[Feature]) -> Infer<B> {
        let token_ids_list = features
            .iter()
            .map(|feature| feature.input_ids.iter().map(|id| *id as usize).collect())
            .collect();

        let padding = generate_padding_mask(
            self.pad_token_id,
            token_ids_list,
            Some(self.max_seq_length),
            &self.device,
        );

        Infer {
            tokens: padding.tensor,
            mask_pad: padding.mask,
        }
    }
}

/// Implement Batcher trait for Batcher struct for training
impl<B: Backend> dataloader::batcher::Batcher<Feature, Train<B>> for Batcher<B> {
    /// Collects a vector of features into a training batch
    fn batch(&self, items: Vec<Feature>) -> Train<B> {
        let input = self.infer(&items);

        let start_positions = items.iter().map(|item| item.start_position).collect();
        let end_positions = items.iter().map(|item| item.end_position).collect();

        Train {
            input,
            start_positions: tensors::int_tensor_1d(start_positions, &self.device),
            end_positions: tensors::int_tensor_1d(end_positions, &self.device),
        }
    }
}
