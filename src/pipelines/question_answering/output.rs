use burn::{
    tensor::{backend::Backend, Int, Tensor},
    train::metric::{AccuracyInput, Adaptor, LossInput},
};
use derive_new::new;

/// Start and end logits for every token
#[derive(Clone, Debug, new)]
pub struct SpanLogits<B: Backend> {
    /// Answer start logits: [batch_size, seq_length]
    pub start_logits: Tensor<B, 2>,

    /// Answer end logits: [batch_size, seq_length]
    pub end_logits: Tensor<B, 2>,
}

/// Span prediction output adapted for multiple metrics.
#[derive(new)]
pub struct Output<B: Backend> {
    /// The loss, averaged over the start and end predictions.
    pub loss: Tensor<B, 1>,

    /// The logits.
    pub logits: SpanLogits<B>,

    /// The target start positions.
    pub start_positions: Tensor<B, 1, Int>,

    /// The target end positions.
    pub end_positions: Tensor<B, 1, Int>,
}

/// Accuracy of the predicted answer start
impl<B: Backend> Adaptor<AccuracyInput<B>> for Output<B> {
    fn adapt(&self) -> AccuracyInput<B> {
        AccuracyInput::new(
            self.logits.start_logits.clone(),
            self.start_positions.clone(),
        )
    }
}

impl<B: Backend> Adaptor<LossInput<B>> for Output<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}
