use burn::train::renderer::{MetricState, MetricsRenderer, TrainingProgress};
use derive_new::new;

/// A simple renderer that writes progress to the log, for TUI-disabled modes
#[derive(new)]
pub struct Simple {}

impl MetricsRenderer for Simple {
    fn update_train(&mut self, state: MetricState) {
        if let MetricState::Numeric(entry, _) = state {
            debug!("[train] {}", entry.formatted);
        }
    }

    fn update_valid(&mut self, state: MetricState) {
        if let MetricState::Numeric(entry, _) = state {
            debug!("[valid] {}", entry.formatted);
        }
    }

    fn render_train(&mut self, item: TrainingProgress) {
        info!(
            "Train epoch {}/{} - iteration {} ({}/{})",
            item.epoch,
            item.epoch_total,
            item.iteration,
            item.progress.items_processed,
            item.progress.items_total
        );
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        info!(
            "Valid epoch {}/{} - iteration {} ({}/{})",
            item.epoch,
            item.epoch_total,
            item.iteration,
            item.progress.items_processed,
            item.progress.items_total
        );
    }
}
