use std::path::PathBuf;

use bert_burn::{
    data::BertInferenceBatch,
    model::{BertModel, BertModelOutput},
};
use burn::{
    module::Module,
    nn::{loss::CrossEntropyLossConfig, Linear},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
};
use derive_new::new;

use crate::pipelines::question_answering::{
    self,
    batcher::{Infer, Train},
    Output, SpanLogits,
};

use super::Config;

/// BERT for Question Answering: a linear layer over the final hidden states predicts the start
/// and end of the answer span
#[derive(Module, Debug, new)]
pub struct Model<B: Backend> {
    /// The base BERT model
    pub model: BertModel<B>,

    /// Linear layer projecting each hidden state to a start and an end logit
    pub output: Linear<B>,
}

/// Define model behavior
impl<B: Backend> Model<B> {
    /// Defines forward pass for training
    pub fn forward(
        &self,
        input: BertInferenceBatch<B>,
        start_positions: Tensor<B, 1, Int>,
        end_positions: Tensor<B, 1, Int>,
    ) -> Output<B> {
        let [_batch_size, seq_length] = input.tokens.dims();
        let device = &self.model.devices()[0];

        // Positions outside the sequence are clamped onto its last token
        let max_position = seq_length as i64 - 1;
        let start_positions = start_positions.to_device(device).clamp(0, max_position);
        let end_positions = end_positions.to_device(device).clamp(0, max_position);

        let logits = self.logits(input);

        let loss_fn = CrossEntropyLossConfig::new().init(device);
        let start_loss = loss_fn.forward(logits.start_logits.clone(), start_positions.clone());
        let end_loss = loss_fn.forward(logits.end_logits.clone(), end_positions.clone());

        Output {
            loss: (start_loss + end_loss).div_scalar(2.0),
            logits,
            start_positions,
            end_positions,
        }
    }

    /// Compute start and end logits for every token
    pub fn logits(&self, input: BertInferenceBatch<B>) -> SpanLogits<B> {
        let [batch_size, seq_length] = input.tokens.dims();

        let BertModelOutput { hidden_states, .. } = self.model.forward(input);

        // [batch_size, seq_length, 2]
        let logits = self.output.forward(hidden_states);

        let start_logits = logits
            .clone()
            .slice([0..batch_size, 0..seq_length, 0..1])
            .reshape([batch_size, seq_length]);
        let end_logits = logits
            .slice([0..batch_size, 0..seq_length, 1..2])
            .reshape([batch_size, seq_length]);

        SpanLogits {
            start_logits,
            end_logits,
        }
    }
}

impl<B: Backend> question_answering::SpanModel<B> for Model<B> {
    /// Defines forward pass for inference
    fn infer(&self, input: Infer<B>) -> SpanLogits<B> {
        self.logits(BertInferenceBatch {
            tokens: input.tokens,
            mask_pad: input.mask_pad,
        })
    }
}

impl<B: AutodiffBackend> question_answering::Model<B> for Model<B> {
    /// The model configuration
    type Config = Config;

    /// Load a model from a file
    fn load_from_safetensors(
        device: &B::Device,
        model_file: PathBuf,
        config: Self::Config,
    ) -> anyhow::Result<Self> {
        Ok(config.load_safetensors(device, model_file))
    }

    /// Perform a forward pass
    fn forward(&self, item: Train<B>) -> Output<B> {
        self.forward(
            BertInferenceBatch {
                tokens: item.input.tokens,
                mask_pad: item.input.mask_pad,
            },
            item.start_positions,
            item.end_positions,
        )
    }
}

#[cfg(test)]
mod tests {
    use burn::{
        backend::{libtorch::LibTorchDevice, LibTorch},
        data::dataloader::batcher::Batcher as _,
    };
    use pretty_assertions::assert_eq;

    use crate::{
        pipelines::question_answering::{
            evaluation::predict, features::Feature, Batcher, ModelConfig as _,
        },
        utils::tensors::to_rows,
    };

    use super::*;

    type TestBackend = LibTorch;

    fn config() -> Config {
        Config::new(2, 1, 1e-12, 8, 16, 32, 16, 2, 0.0, "bert".to_string(), 0)
            .with_max_seq_len(Some(16))
    }

    fn feature(unique_id: usize, input_ids: Vec<u32>, start: usize, end: usize) -> Feature {
        let len = input_ids.len();

        Feature {
            unique_id,
            example_index: 0,
            doc_span_index: 0,
            tokens: input_ids.iter().map(|id| id.to_string()).collect(),
            token_type_ids: vec![0; len],
            token_to_orig: vec![None; len],
            token_is_max_context: vec![false; len],
            p_mask: vec![0; len],
            paragraph_len: 0,
            start_position: start,
            end_position: end,
            is_impossible: false,
            input_ids,
        }
    }

    /// A long and a short feature, so the batch needs padding
    fn features() -> Vec<Feature> {
        vec![
            feature(1, vec![1, 5, 6, 2, 7, 8, 2], 4, 5),
            feature(2, vec![1, 5, 2, 9, 2], 3, 3),
        ]
    }

    fn cross_entropy(rows: &[Vec<f32>], targets: &[usize]) -> f32 {
        let total: f32 = rows
            .iter()
            .zip(targets)
            .map(|(row, target)| {
                let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let log_sum_exp = row.iter().map(|v| (v - max).exp()).sum::<f32>().ln() + max;

                log_sum_exp - row[*target]
            })
            .sum();

        total / rows.len() as f32
    }

    #[test]
    fn pads_and_masks_batches() {
        let batcher = Batcher::<TestBackend>::new(config().get_config(), 384, LibTorchDevice::Cpu);

        // Capped by the model's maximum sequence length
        assert_eq!(batcher.max_seq_length, 16);

        let batch = batcher.batch(features());

        assert_eq!(batch.input.tokens.dims(), [2, 7]);
        assert_eq!(batch.input.mask_pad.dims(), [2, 7]);

        let tokens = batch.input.tokens.into_data().convert::<i64>().value;
        assert_eq!(&tokens[..7], &[1, 5, 6, 2, 7, 8, 2]);
        assert_eq!(&tokens[7..], &[1, 5, 2, 9, 2, 0, 0]);

        let mask = batch.input.mask_pad.into_data().value;
        assert_eq!(&mask[..7], &[false; 7]);
        assert_eq!(&mask[7..], &[false, false, false, false, false, true, true]);

        let starts = batch.start_positions.into_data().convert::<i64>().value;
        let ends = batch.end_positions.into_data().convert::<i64>().value;
        assert_eq!(starts, vec![4, 3]);
        assert_eq!(ends, vec![5, 3]);
    }

    #[test]
    fn averages_start_and_end_losses() {
        let device = LibTorchDevice::Cpu;
        let model = config().init::<TestBackend>(&device);
        let batcher = Batcher::<TestBackend>::new(config().get_config(), 16, device);

        let batch = batcher.batch(features());
        let output = model.forward(
            BertInferenceBatch {
                tokens: batch.input.tokens,
                mask_pad: batch.input.mask_pad,
            },
            batch.start_positions,
            batch.end_positions,
        );

        assert_eq!(output.logits.start_logits.dims(), [2, 7]);
        assert_eq!(output.logits.end_logits.dims(), [2, 7]);
        assert_eq!(output.loss.dims(), [1]);

        let expected = (cross_entropy(&to_rows(output.logits.start_logits.clone()), &[4, 3])
            + cross_entropy(&to_rows(output.logits.end_logits.clone()), &[5, 3]))
            / 2.0;

        let loss = output.loss.into_scalar();
        assert!(loss.is_finite());
        assert!((loss - expected).abs() < 1e-4, "{} != {}", loss, expected);
    }

    #[test]
    fn clamps_positions_outside_the_sequence() {
        let device = LibTorchDevice::Cpu;
        let model = config().init::<TestBackend>(&device);
        let batcher = Batcher::<TestBackend>::new(config().get_config(), 16, device);

        let mut features = features();
        features[0].start_position = 40;
        features[0].end_position = 41;

        let batch = batcher.batch(features);
        let output = model.forward(
            BertInferenceBatch {
                tokens: batch.input.tokens,
                mask_pad: batch.input.mask_pad,
            },
            batch.start_positions,
            batch.end_positions,
        );

        let starts = output.start_positions.into_data().convert::<i64>().value;
        let ends = output.end_positions.into_data().convert::<i64>().value;
        assert_eq!(starts, vec![6, 3]);
        assert_eq!(ends, vec![6, 3]);

        assert!(output.loss.into_scalar().is_finite());
    }

    #[test]
    fn predicts_one_row_per_feature_token() {
        let device = LibTorchDevice::Cpu;
        let model = config().init::<TestBackend>(&device);
        let batcher = Batcher::<TestBackend>::new(config().get_config(), 16, device);
        let features = features();

        let padded = predict(&model, &batcher, &features, 2);
        let single = predict(&model, &batcher, &features, 1);

        assert_eq!(padded.len(), 2);
        assert_eq!(padded[0].unique_id, 1);
        assert_eq!(padded[0].start_logits.len(), 7);
        assert_eq!(padded[1].unique_id, 2);
        assert_eq!(padded[1].start_logits.len(), 5);
        assert_eq!(padded[1].end_logits.len(), 5);

        // Padding is masked out of attention, so it does not change the logits
        for (a, b) in padded[1].start_logits.iter().zip(&single[1].start_logits) {
            assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
        }
    }
}
